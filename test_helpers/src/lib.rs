//! Test helpers for nuxgal
//!
//! Workspace discovery, a scratch directory for test artifacts, and a
//! writer for small synthetic calibration directories.

use once_cell::sync::Lazy;
use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for test helper operations
#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("Failed to find project root: {0}")]
    ProjectRootNotFound(String),

    #[error("Failed to write fixture {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Returns the workspace root, i.e. the closest ancestor of the current
/// directory whose Cargo.toml declares `[workspace]`.
pub fn find_project_root() -> Result<PathBuf, TestHelperError> {
    let mut current_dir = env::current_dir().map_err(|e| {
        TestHelperError::ProjectRootNotFound(format!("Failed to get current directory: {}", e))
    })?;

    loop {
        let cargo_toml = current_dir.join("Cargo.toml");
        if cargo_toml.exists() {
            let content = fs::read_to_string(&cargo_toml).map_err(|e| {
                TestHelperError::ProjectRootNotFound(format!("Failed to read Cargo.toml: {}", e))
            })?;
            if content.contains("[workspace]") {
                return Ok(current_dir);
            }
        }
        if !current_dir.pop() {
            break;
        }
    }

    Err(TestHelperError::ProjectRootNotFound(
        "Workspace root not found".to_string(),
    ))
}

static PROJECT_ROOT: Lazy<PathBuf> =
    Lazy::new(|| find_project_root().expect("Failed to find project root directory"));

/// Directory for artifacts tests want to keep around (TS arrays, maps).
///
/// Created on first use under `<workspace>/test_output`.
pub fn get_output_dir() -> PathBuf {
    let output_dir = PROJECT_ROOT.join("test_output");
    if !output_dir.exists() {
        fs::create_dir_all(&output_dir).expect("Failed to create output directory");
    }
    output_dir
}

pub fn output_path<P: AsRef<Path>>(path: P) -> PathBuf {
    get_output_dir().join(path)
}

/// A small calibration set in the on-disk layout the analysis reads:
/// `N_coszenith{i}.txt`, `Aeff{i}.txt` and `eventNumber_Ebin_perIC86year.txt`.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationFixture {
    /// Background events per year in each energy bin
    pub expected_counts: Vec<f64>,
    /// Cos-zenith histogram centers, shared by all bins
    pub cos_zenith_centers: Vec<f64>,
    /// Cos-zenith histogram counts per bin
    pub cos_zenith_counts: Vec<Vec<f64>>,
    /// Effective area per bin: rows are cos-zenith cells over [-1, 1],
    /// columns are energy samples
    pub effective_area: Vec<Vec<Vec<f64>>>,
}

impl CalibrationFixture {
    /// Upgoing-dominated background with area only below the horizon
    /// (cos zenith < 0.2), similar in shape to a through-the-Earth detector.
    pub fn upgoing(expected_counts: Vec<f64>) -> Self {
        let n_bins = expected_counts.len();
        let cells = 10;
        let centers: Vec<f64> = (0..cells)
            .map(|i| -1.0 + (i as f64 + 0.5) * 2.0 / cells as f64)
            .collect();
        let counts: Vec<f64> = centers
            .iter()
            .map(|&c| if c < 0.2 { 10.0 - 5.0 * c } else { 1.0 })
            .collect();
        let effective_area = (0..n_bins)
            .map(|bin| {
                let scale = 10f64.powi(bin as i32);
                centers
                    .iter()
                    .map(|&c| {
                        let area = if c < 0.2 { scale * (1.0 - c) } else { 0.0 };
                        vec![area, 1.5 * area]
                    })
                    .collect()
            })
            .collect();
        Self {
            expected_counts,
            cos_zenith_centers: centers,
            cos_zenith_counts: vec![counts; n_bins],
            effective_area,
        }
    }

    pub fn n_bins(&self) -> usize {
        self.expected_counts.len()
    }

    /// Write every table into `dir`.
    pub fn write(&self, dir: &Path) -> Result<(), TestHelperError> {
        for bin in 0..self.n_bins() {
            let mut histogram = String::from("# cos_zenith count\n");
            for (center, count) in self.cos_zenith_centers.iter().zip(&self.cos_zenith_counts[bin]) {
                let _ = writeln!(histogram, "{center} {count}");
            }
            write_file(&dir.join(format!("N_coszenith{bin}.txt")), &histogram)?;

            let mut area = String::new();
            for row in &self.effective_area[bin] {
                let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                let _ = writeln!(area, "{}", cells.join(" "));
            }
            write_file(&dir.join(format!("Aeff{bin}.txt")), &area)?;
        }

        let counts: String = self
            .expected_counts
            .iter()
            .map(|n| format!("{n}\n"))
            .collect();
        write_file(&dir.join("eventNumber_Ebin_perIC86year.txt"), &counts)
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), TestHelperError> {
    fs::write(path, contents).map_err(|source| TestHelperError::Write {
        path: path.to_path_buf(),
        source,
    })
}
