//! Detector acceptance: effective area versus cos(zenith) and the background
//! zenith distribution, per energy bin.
//!
//! Effective-area tables live on a uniform cos(zenith) grid spanning [-1, 1]
//! and are looked up by nearest bin. The background distribution is an
//! empirical histogram that is sampled through its piecewise-linear CDF.

use crate::config::{CalibrationPaths, EnergyBinning};
use crate::error::{Error, Result};
use crate::io;
use crate::sky::SkyGrid;
use log::debug;
use ndarray::Array1;
use rand::Rng;

/// Empirical background cos(zenith) histogram for one energy bin.
#[derive(Debug, Clone, PartialEq)]
pub struct CosZenithHistogram {
    /// Bin edges in cos(zenith), one more than `counts`
    edges: Vec<f64>,
    counts: Vec<f64>,
    /// Running sum of `counts`, starting at zero
    cumulative: Vec<f64>,
}

impl CosZenithHistogram {
    /// Build from bin centers and counts.
    ///
    /// Edges sit half-way between neighbouring centers; the outer edges
    /// extend by half a bin and are clamped to [-1, 1].
    pub fn from_centers(centers: &[f64], counts: &[f64]) -> Result<Self> {
        if centers.is_empty() || centers.len() != counts.len() {
            return Err(Error::Configuration(format!(
                "cos-zenith histogram needs matching non-empty centers and counts, got {} and {}",
                centers.len(),
                counts.len()
            )));
        }
        if centers.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(Error::Configuration(
                "cos-zenith histogram centers must be strictly ascending".to_string(),
            ));
        }
        if counts.iter().any(|&c| !(c >= 0.0) || !c.is_finite()) {
            return Err(Error::Configuration(
                "cos-zenith histogram counts must be finite and non-negative".to_string(),
            ));
        }

        let n = centers.len();
        let mut edges = Vec::with_capacity(n + 1);
        if n == 1 {
            edges.extend([-1.0, 1.0]);
        } else {
            edges.push((centers[0] - 0.5 * (centers[1] - centers[0])).max(-1.0));
            edges.extend(centers.windows(2).map(|w| 0.5 * (w[0] + w[1])));
            edges.push((centers[n - 1] + 0.5 * (centers[n - 1] - centers[n - 2])).min(1.0));
        }

        let mut cumulative = Vec::with_capacity(n + 1);
        cumulative.push(0.0);
        for &count in counts {
            let last = cumulative[cumulative.len() - 1];
            cumulative.push(last + count);
        }

        Ok(Self {
            edges,
            counts: counts.to_vec(),
            cumulative,
        })
    }

    /// Parse rows of (cos-zenith, count).
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        if let Some(bad) = rows.iter().find(|row| row.len() < 2) {
            return Err(Error::Configuration(format!(
                "cos-zenith histogram rows need two columns, found {}",
                bad.len()
            )));
        }
        let centers: Vec<f64> = rows.iter().map(|row| row[0]).collect();
        let counts: Vec<f64> = rows.iter().map(|row| row[1]).collect();
        Self::from_centers(&centers, &counts)
    }

    pub fn total(&self) -> f64 {
        self.cumulative[self.cumulative.len() - 1]
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    /// Inverse CDF at `u` in [0, 1], linear within each histogram bin.
    pub fn quantile(&self, u: f64) -> f64 {
        let target = u.clamp(0.0, 1.0) * self.total();
        // First bin whose upper cumulative value exceeds the target
        let upper = self
            .cumulative
            .partition_point(|&c| c <= target)
            .clamp(1, self.counts.len());
        let bin = upper - 1;
        let count = self.counts[bin];
        let fraction = if count > 0.0 {
            (target - self.cumulative[bin]) / count
        } else {
            0.0
        };
        let (lo, hi) = (self.edges[bin], self.edges[bin + 1]);
        lo + fraction.clamp(0.0, 1.0) * (hi - lo)
    }
}

/// One row of a published effective-area release table.
///
/// Energies in GeV; the area is taken as given, in the unit the caller
/// wants the model to carry (m² throughout this crate).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReleaseAeffRow {
    pub energy_min_gev: f64,
    pub energy_max_gev: f64,
    pub cos_zenith_min: f64,
    pub cos_zenith_max: f64,
    pub effective_area: f64,
}

impl ReleaseAeffRow {
    fn log_center(&self) -> f64 {
        0.5 * (self.energy_min_gev.log10() + self.energy_max_gev.log10())
    }
}

/// Per-bin effective area, background zenith distribution and expected counts.
#[derive(Debug, Clone)]
pub struct AcceptanceModel {
    binning: EnergyBinning,
    /// Effective area (m²) per bin on a uniform cos(zenith) grid over [-1, 1]
    effective_area: Vec<Vec<f64>>,
    cos_zenith: Vec<CosZenithHistogram>,
    expected_counts_per_year: Vec<f64>,
}

impl AcceptanceModel {
    pub fn new(
        binning: EnergyBinning,
        effective_area: Vec<Vec<f64>>,
        cos_zenith: Vec<CosZenithHistogram>,
        expected_counts_per_year: Vec<f64>,
    ) -> Result<Self> {
        let n_bins = binning.n_bins();
        if effective_area.len() != n_bins
            || cos_zenith.len() != n_bins
            || expected_counts_per_year.len() != n_bins
        {
            return Err(Error::Configuration(format!(
                "acceptance tables disagree with the {n_bins}-bin energy binning: \
                 {} effective-area tables, {} cos-zenith histograms, {} expected counts",
                effective_area.len(),
                cos_zenith.len(),
                expected_counts_per_year.len()
            )));
        }
        for (bin, table) in effective_area.iter().enumerate() {
            if table.is_empty() {
                return Err(Error::Configuration(format!(
                    "effective-area table for bin {bin} is empty"
                )));
            }
            if table.iter().any(|&a| !(a >= 0.0) || !a.is_finite()) {
                return Err(Error::Configuration(format!(
                    "effective-area table for bin {bin} has negative or non-finite entries"
                )));
            }
        }
        for (bin, (&expected, histogram)) in expected_counts_per_year
            .iter()
            .zip(&cos_zenith)
            .enumerate()
        {
            if !(expected >= 0.0) || !expected.is_finite() {
                return Err(Error::Configuration(format!(
                    "expected count {expected} for bin {bin} must be finite and non-negative"
                )));
            }
            if expected > 0.0 && histogram.total() <= 0.0 {
                return Err(Error::Configuration(format!(
                    "background cos-zenith histogram for bin {bin} is empty \
                     but {expected} events per year are expected"
                )));
            }
        }

        Ok(Self {
            binning,
            effective_area,
            cos_zenith,
            expected_counts_per_year,
        })
    }

    /// Load the calibration tables described by `paths`.
    ///
    /// Each `Aeff{i}` grid has one row per cos(zenith) bin; its columns are
    /// energy samples inside the analysis bin and are averaged.
    pub fn load(paths: &CalibrationPaths, binning: EnergyBinning) -> Result<Self> {
        let n_bins = binning.n_bins();
        let mut effective_area = Vec::with_capacity(n_bins);
        let mut cos_zenith = Vec::with_capacity(n_bins);

        for bin in 0..n_bins {
            let aeff_path = paths.effective_area_path(bin);
            let grid = io::read_grid(&aeff_path)?;
            let table: Vec<f64> = grid
                .rows()
                .into_iter()
                .map(|row| row.mean().unwrap_or(0.0))
                .collect();
            debug!(
                "Loaded {} cos-zenith bins of effective area from {}",
                table.len(),
                aeff_path.display()
            );
            effective_area.push(table);

            let hist_path = paths.cos_zenith_histogram_path(bin);
            let rows = io::text::read_table(&hist_path)?;
            let histogram = CosZenithHistogram::from_rows(&rows).map_err(|e| {
                Error::Configuration(format!("{}: {e}", hist_path.display()))
            })?;
            cos_zenith.push(histogram);
        }

        let counts_path = paths.expected_counts_path();
        let expected = io::text::read_values(&counts_path)?;
        if expected.len() != n_bins {
            return Err(Error::Configuration(format!(
                "{} lists {} expected counts for {n_bins} energy bins",
                counts_path.display(),
                expected.len()
            )));
        }

        Self::new(binning, effective_area, cos_zenith, expected)
    }

    /// Build effective-area tables from a release table.
    ///
    /// For each analysis bin, the tabulated energy band whose log-center is
    /// nearest the bin center is used as-is, resampled onto a uniform
    /// cos(zenith) grid with one cell per tabulated zenith band.
    pub fn from_tabulated_release(
        rows: &[ReleaseAeffRow],
        binning: EnergyBinning,
        cos_zenith: Vec<CosZenithHistogram>,
        expected_counts_per_year: Vec<f64>,
    ) -> Result<Self> {
        if rows.is_empty() {
            return Err(Error::Configuration(
                "effective-area release table is empty".to_string(),
            ));
        }

        let effective_area = (0..binning.n_bins())
            .map(|bin| {
                let center = binning.log_center(bin);
                let nearest = rows
                    .iter()
                    .map(ReleaseAeffRow::log_center)
                    .min_by(|a, b| (a - center).abs().total_cmp(&(b - center).abs()))
                    .unwrap_or(center);

                let mut band: Vec<&ReleaseAeffRow> = rows
                    .iter()
                    .filter(|row| (row.log_center() - nearest).abs() < 1e-9)
                    .collect();
                band.sort_by(|a, b| a.cos_zenith_min.total_cmp(&b.cos_zenith_min));

                let n_cells = band.len();
                (0..n_cells)
                    .map(|cell| {
                        let cos_z = -1.0 + (cell as f64 + 0.5) * 2.0 / n_cells as f64;
                        band.iter()
                            .find(|row| cos_z >= row.cos_zenith_min && cos_z <= row.cos_zenith_max)
                            .map_or(0.0, |row| row.effective_area)
                    })
                    .collect()
            })
            .collect();

        Self::new(binning, effective_area, cos_zenith, expected_counts_per_year)
    }

    pub fn binning(&self) -> &EnergyBinning {
        &self.binning
    }

    pub fn n_bins(&self) -> usize {
        self.binning.n_bins()
    }

    /// Effective area in m² for `bin` at `cos_zenith`, nearest cos-zenith bin.
    pub fn effective_area(&self, bin: usize, cos_zenith: f64) -> Result<f64> {
        self.binning.check_bin(bin)?;
        if !(-1.0..=1.0).contains(&cos_zenith) {
            return Err(Error::OutOfRange {
                what: "cos_zenith",
                value: cos_zenith,
                min: -1.0,
                max: 1.0,
            });
        }
        let table = &self.effective_area[bin];
        let n = table.len();
        let index = (((cos_zenith + 1.0) / 2.0 * n as f64).floor() as usize).min(n - 1);
        Ok(table[index])
    }

    /// Largest tabulated effective area in `bin`.
    pub fn max_effective_area(&self, bin: usize) -> Result<f64> {
        self.binning.check_bin(bin)?;
        Ok(self.effective_area[bin]
            .iter()
            .copied()
            .fold(0.0, f64::max))
    }

    pub fn expected_counts_per_year(&self) -> &[f64] {
        &self.expected_counts_per_year
    }

    pub fn cos_zenith_histogram(&self, bin: usize) -> Result<&CosZenithHistogram> {
        self.binning.check_bin(bin)?;
        Ok(&self.cos_zenith[bin])
    }

    /// Draw `n` background cos(zenith) values for `bin`.
    pub fn sample_cos_zenith<R: Rng + ?Sized>(
        &self,
        bin: usize,
        n: usize,
        rng: &mut R,
    ) -> Result<Vec<f64>> {
        let histogram = self.cos_zenith_histogram(bin)?;
        if n > 0 && histogram.total() <= 0.0 {
            return Err(Error::Configuration(format!(
                "cannot sample {n} events from the empty cos-zenith histogram of bin {bin}"
            )));
        }
        Ok((0..n).map(|_| histogram.quantile(rng.gen::<f64>())).collect())
    }

    /// Effective area of every pixel for a detector at the South Pole.
    ///
    /// The zenith points to the south celestial pole, so
    /// cos(zenith) = -sin(declination).
    pub fn exposure_map(&self, bin: usize, grid: &SkyGrid) -> Result<Array1<f64>> {
        self.binning.check_bin(bin)?;
        (0..grid.npix())
            .map(|pix| {
                let (_, lat) = grid.center(pix);
                self.effective_area(bin, (-lat.sin()).clamp(-1.0, 1.0))
            })
            .collect::<Result<Vec<f64>>>()
            .map(Array1::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn two_bin_model() -> AcceptanceModel {
        let binning = EnergyBinning::new(vec![2.0, 3.0, 4.0]).unwrap();
        let histogram =
            CosZenithHistogram::from_centers(&[-0.75, -0.25, 0.25, 0.75], &[1.0, 2.0, 3.0, 4.0])
                .unwrap();
        AcceptanceModel::new(
            binning,
            vec![vec![1.0, 2.0, 3.0, 4.0], vec![0.0, 10.0]],
            vec![histogram.clone(), histogram],
            vec![100.0, 10.0],
        )
        .unwrap()
    }

    #[test]
    fn test_nearest_bin_lookup() {
        let model = two_bin_model();
        assert_eq!(model.effective_area(0, -1.0).unwrap(), 1.0);
        assert_eq!(model.effective_area(0, -0.4).unwrap(), 2.0);
        assert_eq!(model.effective_area(0, 0.1).unwrap(), 3.0);
        assert_eq!(model.effective_area(0, 1.0).unwrap(), 4.0);
        assert_eq!(model.effective_area(1, -0.5).unwrap(), 0.0);
        assert_eq!(model.max_effective_area(1).unwrap(), 10.0);
    }

    #[test]
    fn test_lookup_range_errors() {
        let model = two_bin_model();
        assert!(matches!(
            model.effective_area(0, 1.2),
            Err(Error::OutOfRange { what: "cos_zenith", .. })
        ));
        assert!(matches!(
            model.effective_area(2, 0.0),
            Err(Error::OutOfRange { what: "energy bin", .. })
        ));
    }

    #[test]
    fn test_histogram_edges_and_quantiles() {
        let histogram =
            CosZenithHistogram::from_centers(&[-0.75, -0.25, 0.25, 0.75], &[1.0, 1.0, 1.0, 1.0])
                .unwrap();
        assert_eq!(histogram.edges(), &[-1.0, -0.5, 0.0, 0.5, 1.0]);
        assert_relative_eq!(histogram.quantile(0.0), -1.0);
        assert_relative_eq!(histogram.quantile(0.5), 0.0);
        assert_relative_eq!(histogram.quantile(0.125), -0.75);
        assert_relative_eq!(histogram.quantile(1.0), 1.0);
    }

    #[test]
    fn test_quantile_skips_empty_bins() {
        let histogram =
            CosZenithHistogram::from_centers(&[-0.5, 0.5], &[0.0, 5.0]).unwrap();
        for u in [0.0, 0.01, 0.5, 0.99] {
            assert!(histogram.quantile(u) >= 0.0);
        }
    }

    #[test]
    fn test_sampled_cos_zenith_in_range() {
        let model = two_bin_model();
        let mut rng = StdRng::seed_from_u64(3);
        let samples = model.sample_cos_zenith(0, 5000, &mut rng).unwrap();
        assert!(samples.iter().all(|c| (-1.0..=1.0).contains(c)));

        // Weights 1:2:3:4 put 30% of the mass below zero
        let below = samples.iter().filter(|&&c| c < 0.0).count() as f64 / 5000.0;
        assert!((below - 0.3).abs() < 0.03);
    }

    #[test]
    fn test_empty_histogram_with_expected_counts_rejected() {
        let binning = EnergyBinning::new(vec![2.0, 3.0]).unwrap();
        let empty = CosZenithHistogram::from_centers(&[0.0], &[0.0]).unwrap();
        let result = AcceptanceModel::new(binning.clone(), vec![vec![1.0]], vec![empty.clone()], vec![5.0]);
        assert!(matches!(result, Err(Error::Configuration(_))));

        // Nothing expected: allowed
        assert!(AcceptanceModel::new(binning, vec![vec![1.0]], vec![empty], vec![0.0]).is_ok());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let binning = EnergyBinning::new(vec![2.0, 3.0, 4.0]).unwrap();
        let histogram = CosZenithHistogram::from_centers(&[0.0], &[1.0]).unwrap();
        let result = AcceptanceModel::new(binning, vec![vec![1.0]], vec![histogram], vec![1.0, 1.0]);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_exposure_map_south_pole_frame() {
        let binning = EnergyBinning::new(vec![2.0, 3.0]).unwrap();
        let histogram = CosZenithHistogram::from_centers(&[0.0], &[1.0]).unwrap();
        // Upgoing (cos z < 0) has area 1, downgoing 0
        let model =
            AcceptanceModel::new(binning, vec![vec![1.0, 0.0]], vec![histogram], vec![1.0]).unwrap();
        let grid = SkyGrid::new(2).unwrap();
        let exposure = model.exposure_map(0, &grid).unwrap();
        for pix in 0..grid.npix() {
            let (_, lat) = grid.center(pix);
            if lat > 0.01 {
                assert_eq!(exposure[pix], 1.0, "northern pixel {pix}");
            } else if lat < -0.01 {
                assert_eq!(exposure[pix], 0.0, "southern pixel {pix}");
            }
        }
    }

    #[test]
    fn test_from_tabulated_release_picks_nearest_band() {
        let binning = EnergyBinning::new(vec![2.0, 3.0, 4.0]).unwrap();
        let mut rows = Vec::new();
        for (emin, emax, area) in [(1e2, 1e3, 1.0), (1e3, 1e4, 5.0), (1e5, 1e6, 50.0)] {
            for (cmin, cmax) in [(-1.0, 0.0), (0.0, 1.0)] {
                rows.push(ReleaseAeffRow {
                    energy_min_gev: emin,
                    energy_max_gev: emax,
                    cos_zenith_min: cmin,
                    cos_zenith_max: cmax,
                    effective_area: if cmin < 0.0 { area } else { area / 10.0 },
                });
            }
        }
        let histogram = CosZenithHistogram::from_centers(&[0.0], &[1.0]).unwrap();
        let model = AcceptanceModel::from_tabulated_release(
            &rows,
            binning,
            vec![histogram.clone(), histogram],
            vec![1.0, 1.0],
        )
        .unwrap();

        assert_relative_eq!(model.effective_area(0, -0.5).unwrap(), 1.0);
        assert_relative_eq!(model.effective_area(0, 0.5).unwrap(), 0.1);
        assert_relative_eq!(model.effective_area(1, -0.5).unwrap(), 5.0);
    }

    #[test]
    fn test_load_from_calibration_directory() {
        let dir = TempDir::new().unwrap();
        let paths = CalibrationPaths::with_root(dir.path());
        for bin in 0..2 {
            std::fs::write(
                paths.effective_area_path(bin),
                "# cosz rows x energy samples\n1 3\n2 4\n",
            )
            .unwrap();
            std::fs::write(
                paths.cos_zenith_histogram_path(bin),
                "-0.5 10\n0.5 30\n",
            )
            .unwrap();
        }
        std::fs::write(paths.expected_counts_path(), "120\n7\n").unwrap();

        let binning = EnergyBinning::new(vec![2.0, 3.0, 4.0]).unwrap();
        let model = AcceptanceModel::load(&paths, binning).unwrap();
        assert_eq!(model.expected_counts_per_year(), &[120.0, 7.0]);
        // Columns are averaged
        assert_relative_eq!(model.effective_area(1, -0.9).unwrap(), 2.0);
        assert_relative_eq!(model.effective_area(1, 0.9).unwrap(), 3.0);
        assert_relative_eq!(model.cos_zenith_histogram(0).unwrap().total(), 40.0);
    }

    #[test]
    fn test_load_missing_table_names_path() {
        let dir = TempDir::new().unwrap();
        let paths = CalibrationPaths::with_root(dir.path());
        let err = AcceptanceModel::load(&paths, EnergyBinning::default()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("Aeff0.txt"));
    }
}
