//! Error types shared by every analysis stage.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by calibration loading, simulation, and inference.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed calibration input, or inputs that disagree in shape
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A lookup argument fell outside its declared range
    #[error("{what} = {value} is outside the declared range [{min}, {max}]")]
    OutOfRange {
        what: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Parameter outside its bounds (e.g. a signal fraction outside [0, 1])
    #[error("Domain error: {0}")]
    Domain(String),

    /// Optimizer or sampler did not converge
    #[error("Convergence error: {0}")]
    Convergence(String),

    /// The requested fit range carries no information (all counts zero)
    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    /// Ensemble walkers could not be initialized inside the parameter bounds
    #[error("Sampler initialization error: {0}")]
    Initialization(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "fits")]
    #[error("FITS I/O error: {0}")]
    Fits(#[from] fitsio::errors::Error),
}

impl Error {
    /// Errors that indicate a systemic setup problem rather than trial-to-trial noise.
    ///
    /// Batch drivers abort on these instead of recording a failed trial.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Configuration(_) | Error::Io { .. } | Error::Json(_) => true,
            #[cfg(feature = "fits")]
            Error::Fits(_) => true,
            _ => false,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
