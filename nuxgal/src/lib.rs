//! Galaxy cross-correlation analysis of pixelized event skies
//!
//! This crate simulates event maps from a detector acceptance model,
//! cross-correlates them with a galaxy density template, and infers the
//! fraction of events that trace the galaxies through a likelihood fit,
//! ensemble MCMC sampling, and test-statistic trial batches.

pub mod acceptance;
pub mod algo;
pub mod config;
pub mod error;
pub mod events;
pub mod galaxy;
pub mod generator;
pub mod io;
pub mod likelihood;
pub mod shared_args;
pub mod sims;
pub mod sky;
pub mod xcorr;

// Re-exports for easier access
pub use acceptance::AcceptanceModel;
pub use config::{AnalysisConfig, EnergyBinning};
pub use error::{Error, Result};
pub use galaxy::GalaxyTemplate;
pub use generator::{EventGenerator, EventMaps, SignalSource};
pub use likelihood::{FitRange, FitResult, Likelihood, Observation};
pub use sims::{TrialContext, TrialHypothesis, TsDistribution};
pub use sky::{Mask, SkyGrid};
pub use xcorr::{CrossCorrelator, NullStatistics};
