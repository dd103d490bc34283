//! Analysis configuration: energy binning, calibration file layout and run defaults.
//!
//! Every numeric constant the analysis depends on lives here so that batch
//! runs can be reproduced from a single JSON file.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Ordered partition of log10(E / GeV) into contiguous bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyBinning {
    log_edges: Vec<f64>,
}

impl EnergyBinning {
    /// Create a binning from strictly ascending log10 energy edges.
    pub fn new(log_edges: Vec<f64>) -> Result<Self> {
        if log_edges.len() < 2 {
            return Err(Error::Configuration(format!(
                "energy binning needs at least two edges, got {}",
                log_edges.len()
            )));
        }
        if log_edges.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(Error::Configuration(
                "energy bin edges must be strictly ascending".to_string(),
            ));
        }
        Ok(Self { log_edges })
    }

    /// `n_bins` equal-width bins spanning [log_min, log_max].
    pub fn uniform(log_min: f64, log_max: f64, n_bins: usize) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::Configuration(
                "energy binning needs at least one bin".to_string(),
            ));
        }
        let step = (log_max - log_min) / n_bins as f64;
        Self::new((0..=n_bins).map(|i| log_min + i as f64 * step).collect())
    }

    pub fn n_bins(&self) -> usize {
        self.log_edges.len() - 1
    }

    pub fn log_edges(&self) -> &[f64] {
        &self.log_edges
    }

    /// Center of bin `bin` in log10(E / GeV).
    pub fn log_center(&self, bin: usize) -> f64 {
        0.5 * (self.log_edges[bin] + self.log_edges[bin + 1])
    }

    /// Width of bin `bin` in log10(E / GeV).
    pub fn log_width(&self, bin: usize) -> f64 {
        self.log_edges[bin + 1] - self.log_edges[bin]
    }

    /// Bin containing `log_e`, with the last edge inclusive.
    ///
    /// Values outside the edges return `None`.
    pub fn bin_of(&self, log_e: f64) -> Option<usize> {
        let first = self.log_edges[0];
        let last = self.log_edges[self.n_bins()];
        if !(log_e >= first && log_e <= last) {
            return None;
        }
        if log_e == last {
            return Some(self.n_bins() - 1);
        }
        // partition_point gives the number of edges <= log_e
        Some(self.log_edges.partition_point(|&edge| edge <= log_e) - 1)
    }

    /// Check that `bin` is a valid bin index.
    pub fn check_bin(&self, bin: usize) -> Result<()> {
        if bin >= self.n_bins() {
            return Err(Error::OutOfRange {
                what: "energy bin",
                value: bin as f64,
                min: 0.0,
                max: (self.n_bins() - 1) as f64,
            });
        }
        Ok(())
    }
}

impl Default for EnergyBinning {
    fn default() -> Self {
        Self {
            log_edges: (0..=7).map(|i| 2.0 + i as f64).collect(),
        }
    }
}

/// Energy bounds in GeV for power-law event energy draws.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerLawRange {
    pub emin_gev: f64,
    pub emax_gev: f64,
}

impl PowerLawRange {
    pub fn new(emin_gev: f64, emax_gev: f64) -> Result<Self> {
        if !(emin_gev > 0.0 && emax_gev > emin_gev) {
            return Err(Error::Configuration(format!(
                "power-law range requires 0 < emin < emax, got [{emin_gev}, {emax_gev}]"
            )));
        }
        Ok(Self { emin_gev, emax_gev })
    }
}

impl Default for PowerLawRange {
    fn default() -> Self {
        Self {
            emin_gev: 1e2,
            emax_gev: 1e9,
        }
    }
}

/// Diffuse astrophysical flux dN/dE = norm * (E / pivot)^(-index).
///
/// Units: GeV^-1 cm^-2 s^-1 sr^-1, per flavor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiffuseFlux {
    pub normalization: f64,
    pub pivot_gev: f64,
    pub index: f64,
    /// Detector livetime of one analysis year
    pub livetime_days: f64,
}

impl DiffuseFlux {
    /// Differential flux at `energy_gev`
    pub fn dn_de(&self, energy_gev: f64) -> f64 {
        self.normalization * (energy_gev / self.pivot_gev).powf(-self.index)
    }
}

impl Default for DiffuseFlux {
    fn default() -> Self {
        Self {
            normalization: 1.44e-18,
            pivot_gev: 100e3,
            index: 2.28,
            livetime_days: 333.0,
        }
    }
}

/// Location of the per-bin calibration tables.
///
/// File names are templates where `{i}` is replaced by the energy bin index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPaths {
    pub root: PathBuf,
    pub cos_zenith_histogram: String,
    pub effective_area: String,
    pub expected_counts: String,
}

impl CalibrationPaths {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn cos_zenith_histogram_path(&self, bin: usize) -> PathBuf {
        self.root.join(expand_bin_template(&self.cos_zenith_histogram, bin))
    }

    pub fn effective_area_path(&self, bin: usize) -> PathBuf {
        self.root.join(expand_bin_template(&self.effective_area, bin))
    }

    pub fn expected_counts_path(&self) -> PathBuf {
        self.root.join(&self.expected_counts)
    }
}

impl Default for CalibrationPaths {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/irfs"),
            cos_zenith_histogram: "N_coszenith{i}.txt".to_string(),
            effective_area: "Aeff{i}.txt".to_string(),
            expected_counts: "eventNumber_Ebin_perIC86year.txt".to_string(),
        }
    }
}

/// Replace `{i}` in a file name template with the bin index.
pub fn expand_bin_template(template: &str, bin: usize) -> String {
    template.replace("{i}", &bin.to_string())
}

/// Complete set of parameters for one analysis session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// HEALPix depth; nside = 2^depth
    pub depth: u8,
    pub binning: EnergyBinning,
    /// Exposure of the (synthetic) data set in years
    pub years: f64,
    /// Synthetic draws per null-hypothesis statistics estimate
    pub null_trials: usize,
    /// Smallest multipole entering the likelihood
    pub lmin: usize,
    /// Upper cap on the number of fitted energy bins
    pub max_fit_bins: usize,
    /// Pixels south of this declination (degrees) are masked
    pub mask_min_declination_deg: f64,
    pub diffuse_flux: DiffuseFlux,
    pub power_law: PowerLawRange,
    pub calibration: CalibrationPaths,
    /// Base seed for all stochastic stages
    pub seed: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            depth: 7,
            binning: EnergyBinning::default(),
            years: 3.0,
            null_trials: 100,
            lmin: 20,
            max_fit_bins: 5,
            mask_min_declination_deg: -5.0,
            diffuse_flux: DiffuseFlux::default(),
            power_law: PowerLawRange::default(),
            calibration: CalibrationPaths::default(),
            seed: 42,
        }
    }
}

impl AnalysisConfig {
    /// Load a configuration from a JSON file; missing fields take defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| Error::io(path, e))
    }

    pub fn validate(&self) -> Result<()> {
        if self.depth > 12 {
            return Err(Error::Configuration(format!(
                "HEALPix depth {} is larger than the supported maximum 12",
                self.depth
            )));
        }
        if self.null_trials == 0 {
            return Err(Error::Configuration(
                "null_trials must be at least 1".to_string(),
            ));
        }
        if !(self.years > 0.0) {
            return Err(Error::Configuration(format!(
                "years must be positive, got {}",
                self.years
            )));
        }
        // Re-run the constructors' checks on deserialized values
        EnergyBinning::new(self.binning.log_edges.clone())?;
        PowerLawRange::new(self.power_law.emin_gev, self.power_law.emax_gev)?;
        Ok(())
    }
}
