//! Per-pixel exclusion masks

use super::grid::SkyGrid;
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1};

/// Pixels excluded from every statistical reduction.
///
/// A mask is tied to the grid resolution it was built for; applying it to a
/// map of different length is a configuration error.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    masked: Vec<bool>,
}

impl Mask {
    /// Mask that excludes nothing
    pub fn none(grid: &SkyGrid) -> Self {
        Self {
            masked: vec![false; grid.npix()],
        }
    }

    /// Exclude every pixel whose center lies south of `min_declination_deg`.
    pub fn below_declination(grid: &SkyGrid, min_declination_deg: f64) -> Self {
        let min_lat = min_declination_deg.to_radians();
        let masked = (0..grid.npix())
            .map(|p| grid.center(p).1 < min_lat)
            .collect();
        Self { masked }
    }

    pub fn len(&self) -> usize {
        self.masked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masked.is_empty()
    }

    pub fn is_masked(&self, pixel: usize) -> bool {
        self.masked[pixel]
    }

    pub fn n_unmasked(&self) -> usize {
        self.masked.iter().filter(|&&m| !m).count()
    }

    /// Fraction of the sky left unmasked
    pub fn sky_fraction(&self) -> f64 {
        if self.masked.is_empty() {
            return 0.0;
        }
        self.n_unmasked() as f64 / self.masked.len() as f64
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.masked.len() {
            return Err(Error::Configuration(format!(
                "mask covers {} pixels but map has {len}",
                self.masked.len()
            )));
        }
        Ok(())
    }

    /// Zero the masked pixels of a single map.
    pub fn apply(&self, mut map: ArrayViewMut1<f64>) -> Result<()> {
        self.check_len(map.len())?;
        map.iter_mut()
            .zip(&self.masked)
            .filter(|(_, &m)| m)
            .for_each(|(value, _)| *value = 0.0);
        Ok(())
    }

    /// Zero the masked pixels of every row of a (bins x pixels) map set.
    pub fn apply_to_maps(&self, maps: &mut Array2<f64>) -> Result<()> {
        for row in maps.rows_mut() {
            self.apply(row)?;
        }
        Ok(())
    }

    /// Relative fluctuation x / mean(x) - 1 over the unmasked pixels.
    ///
    /// Masked pixels are zero in the result, as is every pixel of a map
    /// whose unmasked mean is zero or whose unmasked pixels are all equal.
    pub fn overdensity(&self, map: ArrayView1<f64>) -> Result<Array1<f64>> {
        self.check_len(map.len())?;
        let n_unmasked = self.n_unmasked();
        let unmasked = || {
            map.iter()
                .zip(&self.masked)
                .filter(|(_, &m)| !m)
                .map(|(&v, _)| v)
        };
        let total: f64 = unmasked().sum();
        // A flat map has no fluctuation; rounding in the mean would invent one
        let flat = unmasked()
            .next()
            .map_or(true, |first| unmasked().all(|v| v == first));
        if n_unmasked == 0 || total == 0.0 || flat {
            return Ok(Array1::zeros(map.len()));
        }
        let mean = total / n_unmasked as f64;
        Ok(map
            .iter()
            .zip(&self.masked)
            .map(|(&v, &m)| if m { 0.0 } else { v / mean - 1.0 })
            .collect())
    }
}
