//! Shared fixtures for the integration tests: a small calibration directory,
//! a peaked galaxy template on disk and the configuration tying them together.

#![allow(dead_code)]

use nuxgal::config::{AnalysisConfig, CalibrationPaths, EnergyBinning};
use nuxgal::sims::{AnalysisInputs, TemplateSource};
use nuxgal::{io, SkyGrid};
use ndarray::Array1;
use std::f64::consts::FRAC_PI_2;
use std::path::PathBuf;
use tempfile::TempDir;
use test_helpers::CalibrationFixture;

pub const DEPTH: u8 = 2;

/// Galaxy density twenty times higher in a northern patch.
pub fn peaked_density(grid: &SkyGrid) -> Array1<f64> {
    Array1::from_shape_fn(grid.npix(), |p| {
        let (lon, lat) = grid.center(p);
        if lat > 0.5 && lon < FRAC_PI_2 {
            21.0
        } else {
            1.0
        }
    })
}

pub struct Fixture {
    pub dir: TempDir,
    pub config: AnalysisConfig,
    pub template_path: PathBuf,
}

impl Fixture {
    /// Calibration tables with the given background rates and a peaked
    /// template map, analysed at depth 2 with multipoles from l = 1.
    pub fn new(expected_counts: Vec<f64>) -> Self {
        let dir = TempDir::new().unwrap();
        let n_bins = expected_counts.len();
        CalibrationFixture::upgoing(expected_counts)
            .write(dir.path())
            .unwrap();

        let grid = SkyGrid::new(DEPTH).unwrap();
        let template_path = dir.path().join("galaxy.txt");
        io::write_map(&template_path, peaked_density(&grid).view()).unwrap();

        let config = AnalysisConfig {
            depth: DEPTH,
            binning: EnergyBinning::uniform(2.0, 2.0 + n_bins as f64, n_bins).unwrap(),
            years: 1.0,
            null_trials: 60,
            lmin: 1,
            calibration: CalibrationPaths::with_root(dir.path()),
            seed: 42,
            ..AnalysisConfig::default()
        };
        Self {
            dir,
            config,
            template_path,
        }
    }

    pub fn inputs(&self) -> AnalysisInputs {
        AnalysisInputs::load(&self.config, &TemplateSource::Map(self.template_path.clone()))
            .unwrap()
    }
}
