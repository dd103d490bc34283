//! Affine-invariant ensemble sampler (stretch move) for the signal fractions.
//!
//! The ensemble is split into two halves; each half is updated in parallel
//! using the other half as the complementary ensemble. Every (step, walker)
//! update draws from its own seeded RNG, so chains do not depend on the
//! thread count.

use super::{FitOptions, FitRange, Likelihood, Observation};
use crate::algo::{percentile, trial_seed, SeedStream};
use crate::error::{Error, Result};
use log::{info, warn};
use ndarray::{s, Array1, Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Sampler settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerOptions {
    /// Stretch scale a of the proposal z ~ g(z) ∝ 1/sqrt(z) on [1/a, a]
    pub stretch: f64,
    /// Standard deviation of the initial walker cloud around the best fit
    pub init_spread: f64,
    pub seed: u64,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            stretch: 2.0,
            init_spread: 1e-2,
            seed: 0,
        }
    }
}

/// Reject a burn-in that would discard a whole `steps`-long chain.
pub fn check_burn_in(steps: usize, burn_in: usize) -> Result<()> {
    if burn_in >= steps {
        return Err(Error::Domain(format!(
            "burn-in of {burn_in} steps leaves nothing of a {steps}-step chain"
        )));
    }
    Ok(())
}

/// Posterior samples from an ensemble run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    /// (walkers x steps x parameters)
    pub samples: Array3<f64>,
    /// (walkers x steps) log-likelihood of each sample
    pub log_prob: Array2<f64>,
    /// Accepted fraction of proposals per walker
    pub acceptance: Array1<f64>,
}

/// 16th, 50th and 84th percentile of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub p16: f64,
    pub median: f64,
    pub p84: f64,
}

impl Chain {
    pub fn n_walkers(&self) -> usize {
        self.samples.shape()[0]
    }

    pub fn n_steps(&self) -> usize {
        self.samples.shape()[1]
    }

    pub fn n_params(&self) -> usize {
        self.samples.shape()[2]
    }

    /// Samples after discarding the first `burn_in` steps of every walker,
    /// flattened to (samples x parameters).
    pub fn flat_samples(&self, burn_in: usize) -> Result<Array2<f64>> {
        check_burn_in(self.n_steps(), burn_in)?;
        let kept = self.samples.slice(s![.., burn_in.., ..]);
        let n = kept.shape()[0] * kept.shape()[1];
        Array2::from_shape_vec((n, self.n_params()), kept.iter().copied().collect())
            .map_err(|e| Error::Domain(e.to_string()))
    }

    /// Percentile summary of each parameter after burn-in.
    pub fn summary(&self, burn_in: usize) -> Result<Vec<ParameterSummary>> {
        let flat = self.flat_samples(burn_in)?;
        flat.axis_iter(Axis(1))
            .map(|column| {
                let values: Vec<f64> = column.to_vec();
                let at = |q| percentile(&values, q).map_err(Error::DegenerateInput);
                Ok(ParameterSummary {
                    p16: at(16.0)?,
                    median: at(50.0)?,
                    p84: at(84.0)?,
                })
            })
            .collect()
    }
}

/// Reflect a coordinate back into [0, 1].
fn fold_into_unit(v: f64) -> f64 {
    let v = v.abs() % 2.0;
    if v > 1.0 {
        2.0 - v
    } else {
        v
    }
}

impl Likelihood {
    fn log_prob(&self, x: &[f64], obs: &Observation, range: &FitRange) -> f64 {
        if x.iter().any(|v| !(0.0..=1.0).contains(v)) {
            return f64::NEG_INFINITY;
        }
        self.evaluate(x, obs, range).unwrap_or(f64::NEG_INFINITY)
    }

    /// Sample the posterior with walkers started around the best fit.
    pub fn sample_chain(
        &self,
        obs: &Observation,
        range: &FitRange,
        walkers: usize,
        steps: usize,
        options: &SamplerOptions,
    ) -> Result<Chain> {
        let fit = self.fit(
            obs,
            range,
            &FitOptions {
                seed: options.seed,
                ..FitOptions::default()
            },
        )?;
        info!(
            "Starting {walkers} walkers around f = {:?} (TS = {:.3})",
            fit.fractions, fit.test_statistic
        );

        let ndim = fit.fractions.len();
        let mut rng = StdRng::seed_from_u64(SeedStream::ChainStart.base(options.seed));
        let initial = Array2::from_shape_fn((walkers, ndim), |(_, k)| {
            let jitter: f64 = rng.sample(StandardNormal);
            fold_into_unit(fit.fractions[k] + options.init_spread * jitter)
        });
        self.sample_chain_from(initial, obs, range, steps, options)
    }

    /// Sample the posterior from an explicit (walkers x parameters) start.
    pub fn sample_chain_from(
        &self,
        initial: Array2<f64>,
        obs: &Observation,
        range: &FitRange,
        steps: usize,
        options: &SamplerOptions,
    ) -> Result<Chain> {
        self.check_inputs(None, obs, range)?;
        let (walkers, ndim) = initial.dim();
        if ndim != range.n_params() {
            return Err(Error::Initialization(format!(
                "walkers have {ndim} parameters but the fit range has {}",
                range.n_params()
            )));
        }
        if walkers < 2 * ndim || walkers < 2 {
            return Err(Error::Initialization(format!(
                "{walkers} walkers is fewer than twice the {ndim} parameters"
            )));
        }
        if initial.iter().any(|v| !(0.0..=1.0).contains(v)) {
            return Err(Error::Initialization(
                "initial walker positions must lie inside [0, 1]".to_string(),
            ));
        }
        if !(options.stretch > 1.0) {
            return Err(Error::Initialization(format!(
                "stretch scale must exceed 1, got {}",
                options.stretch
            )));
        }

        let mut positions: Vec<Vec<f64>> = initial.rows().into_iter().map(|r| r.to_vec()).collect();
        let mut current: Vec<f64> = positions
            .iter()
            .map(|x| self.log_prob(x, obs, range))
            .collect();
        if current.iter().all(|lp| !lp.is_finite()) {
            return Err(Error::Initialization(
                "no walker starts at a finite log-likelihood".to_string(),
            ));
        }

        let mut samples = Array3::zeros((walkers, steps, ndim));
        let mut log_prob = Array2::zeros((walkers, steps));
        let mut accepted = vec![0usize; walkers];
        let half = walkers / 2;
        let a = options.stretch;
        let update_seed = SeedStream::ChainUpdate.base(options.seed);

        for step in 0..steps {
            for (active, complement) in [(0..half, half..walkers), (half..walkers, 0..half)] {
                let others: Vec<Vec<f64>> = positions[complement].to_vec();
                let updates: Vec<(usize, Option<(Vec<f64>, f64)>)> = active
                    .into_par_iter()
                    .map(|k| {
                        let mut rng =
                            StdRng::seed_from_u64(trial_seed(update_seed, step * walkers + k));
                        let partner = &others[rng.gen_range(0..others.len())];
                        let u: f64 = rng.gen();
                        let z = ((a - 1.0) * u + 1.0).powi(2) / a;
                        let proposal: Vec<f64> = positions[k]
                            .iter()
                            .zip(partner)
                            .map(|(x, y)| y + z * (x - y))
                            .collect();
                        let lp = self.log_prob(&proposal, obs, range);
                        let log_ratio = (ndim as f64 - 1.0) * z.ln() + lp - current[k];
                        let accept = lp.is_finite() && rng.gen::<f64>().ln() < log_ratio;
                        (k, accept.then_some((proposal, lp)))
                    })
                    .collect();

                for (k, update) in updates {
                    if let Some((x, lp)) = update {
                        positions[k] = x;
                        current[k] = lp;
                        accepted[k] += 1;
                    }
                }
            }

            for k in 0..walkers {
                for (d, &v) in positions[k].iter().enumerate() {
                    samples[[k, step, d]] = v;
                }
                log_prob[[k, step]] = current[k];
            }
        }

        let total_accepted: usize = accepted.iter().sum();
        if steps > 0 && total_accepted == 0 {
            return Err(Error::Convergence(format!(
                "no proposal accepted in {steps} steps of {walkers} walkers"
            )));
        }
        let acceptance = Array1::from_iter(
            accepted
                .iter()
                .map(|&n| if steps > 0 { n as f64 / steps as f64 } else { 0.0 }),
        );
        let mean_acceptance = acceptance.mean().unwrap_or(0.0);
        if mean_acceptance < 0.05 {
            warn!("Low ensemble acceptance fraction {mean_acceptance:.3}");
        }
        info!("Sampled {steps} steps with mean acceptance {mean_acceptance:.3}");

        Ok(Chain {
            samples,
            log_prob,
            acceptance,
        })
    }
}
