//! Batch simulation drivers
//!
//! Builds test-statistic distributions under background and signal
//! hypotheses from repeated synthetic data sets.

pub mod session;
pub mod ts_trials;

pub use session::{AnalysisInputs, TemplateSource};
pub use ts_trials::{
    run_trial, run_ts_batch, BatchWarning, Significance, TrialContext, TrialHypothesis,
    TrialOutcome, TrialSettings, TsDistribution, TRIAL_SEED_STRIDE,
};
