use crate::config::{AnalysisConfig, CalibrationPaths, EnergyBinning};
use crate::error::Result;
use crate::sims::session::TemplateSource;
use clap::Parser;
use std::path::PathBuf;

/// Common arguments shared across the analysis binaries
#[derive(Parser, Debug, Clone)]
pub struct SharedAnalysisArgs {
    /// JSON analysis configuration; defaults are used when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding the calibration tables
    #[arg(long)]
    pub calibration_dir: Option<PathBuf>,

    /// HEALPix depth (nside = 2^depth)
    #[arg(long)]
    pub depth: Option<u8>,

    /// Energy bin edges in log10(E/GeV), comma separated
    #[arg(long, value_delimiter = ',')]
    pub edges: Option<Vec<f64>>,

    /// Exposure of the synthetic data sets in years
    #[arg(long)]
    pub years: Option<f64>,

    /// Synthetic draws per null-statistics estimate
    #[arg(long)]
    pub null_trials: Option<usize>,

    /// Base random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Galaxy density map; a log-normal sky is drawn when omitted
    #[arg(long)]
    pub galaxy_map: Option<PathBuf>,

    /// Amplitude of the log-normal template spectrum
    #[arg(long, default_value_t = 1e-3)]
    pub template_amplitude: f64,

    /// Power-law slope of the log-normal template spectrum
    #[arg(long, default_value_t = 1.0)]
    pub template_slope: f64,
}

impl SharedAnalysisArgs {
    /// Overlay the command-line overrides onto `config`.
    pub fn apply(&self, config: &mut AnalysisConfig) -> Result<()> {
        if let Some(dir) = &self.calibration_dir {
            config.calibration = CalibrationPaths {
                root: dir.clone(),
                ..config.calibration.clone()
            };
        }
        if let Some(depth) = self.depth {
            config.depth = depth;
        }
        if let Some(edges) = &self.edges {
            config.binning = EnergyBinning::new(edges.clone())?;
        }
        if let Some(years) = self.years {
            config.years = years;
        }
        if let Some(null_trials) = self.null_trials {
            config.null_trials = null_trials;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        Ok(())
    }

    /// Configuration file (or defaults) with overrides applied and validated.
    pub fn load_config(&self) -> Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::load_from_file(path)?,
            None => AnalysisConfig::default(),
        };
        self.apply(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn template_source(&self, seed: u64) -> TemplateSource {
        match &self.galaxy_map {
            Some(path) => TemplateSource::Map(path.clone()),
            None => TemplateSource::LogNormal {
                amplitude: self.template_amplitude,
                slope: self.template_slope,
                seed,
            },
        }
    }
}
