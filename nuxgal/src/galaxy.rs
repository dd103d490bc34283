//! Galaxy density templates.
//!
//! A template is a non-negative per-pixel density normalized to unit sum,
//! used both as the signal placement probability and as the reference map
//! the event maps are cross-correlated against.

use crate::error::{Error, Result};
use crate::sky::{cross_power, map_to_alm, synthesize_gaussian, Mask, SkyGrid};
use ndarray::{Array1, ArrayView1};
use rand::Rng;

/// Unit-sum galaxy density on a [`SkyGrid`].
#[derive(Debug, Clone, PartialEq)]
pub struct GalaxyTemplate {
    density: Array1<f64>,
    /// Power spectrum of the Gaussian field the template was drawn from, if known
    field_cl: Option<Vec<f64>>,
}

impl GalaxyTemplate {
    /// Template from an arbitrary non-negative density map.
    pub fn from_density(grid: &SkyGrid, density: ArrayView1<f64>) -> Result<Self> {
        grid.check_map_len(density.len())?;
        if density.iter().any(|&d| !d.is_finite() || d < 0.0) {
            return Err(Error::Configuration(
                "galaxy density must be finite and non-negative".to_string(),
            ));
        }
        let total = density.sum();
        if total <= 0.0 {
            return Err(Error::Configuration(
                "galaxy density sums to zero".to_string(),
            ));
        }
        Ok(Self {
            density: density.mapv(|d| d / total),
            field_cl: None,
        })
    }

    /// Uniform template, every pixel equally likely.
    pub fn uniform(grid: &SkyGrid) -> Self {
        let npix = grid.npix();
        Self {
            density: Array1::from_elem(npix, 1.0 / npix as f64),
            field_cl: None,
        }
    }

    /// Log-normal sky: exp of a Gaussian realization of `cl`, normalized.
    pub fn from_power_spectrum<R: Rng + ?Sized>(
        grid: &SkyGrid,
        cl: &[f64],
        rng: &mut R,
    ) -> Result<Self> {
        if cl.iter().any(|c| !c.is_finite()) {
            return Err(Error::Configuration(
                "galaxy power spectrum has non-finite entries".to_string(),
            ));
        }
        let field = synthesize_gaussian(grid, cl, rng);
        let density = field.mapv(f64::exp);
        let mut template = Self::from_density(grid, density.view())?;
        template.field_cl = Some(cl.to_vec());
        Ok(template)
    }

    pub fn density(&self) -> ArrayView1<'_, f64> {
        self.density.view()
    }

    pub fn npix(&self) -> usize {
        self.density.len()
    }

    /// Full-sky auto power spectrum of the template overdensity up to the grid band limit.
    pub fn power_spectrum(&self, grid: &SkyGrid) -> Result<Array1<f64>> {
        let delta = Mask::none(grid).overdensity(self.density.view())?;
        let alm = map_to_alm(grid, delta.view(), grid.lmax());
        Ok(cross_power(&alm, &alm))
    }

    /// Spectrum used to draw skies that share the template's statistics but
    /// not its realization.
    ///
    /// This is the generating spectrum when the template came from
    /// [`GalaxyTemplate::from_power_spectrum`], otherwise the measured one.
    pub fn field_power_spectrum(&self, grid: &SkyGrid) -> Result<Vec<f64>> {
        match &self.field_cl {
            Some(cl) => Ok(cl.clone()),
            None => Ok(self.power_spectrum(grid)?.to_vec()),
        }
    }

    /// An independent log-normal sky with the same field spectrum.
    pub fn unrelated_realization<R: Rng + ?Sized>(
        &self,
        grid: &SkyGrid,
        rng: &mut R,
    ) -> Result<Self> {
        let cl = self.field_power_spectrum(grid)?;
        Self::from_power_spectrum(grid, &cl, rng)
    }
}

/// Power-law angular spectrum C_l = amplitude (l + 1)^-slope with C_0 = 0.
pub fn reference_power_spectrum(lmax: usize, amplitude: f64, slope: f64) -> Vec<f64> {
    (0..=lmax)
        .map(|l| {
            if l == 0 {
                0.0
            } else {
                amplitude * ((l + 1) as f64).powf(-slope)
            }
        })
        .collect()
}
