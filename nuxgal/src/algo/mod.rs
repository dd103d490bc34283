//! Numerical helpers shared by the simulation and inference stages.

pub mod parallel;
pub mod stats;

pub use parallel::{map_trials_in_parallel, trial_seed, SeedStream};
pub use stats::{chi2_one_dof_survival, mean_and_std, normal_cdf, percentile};
