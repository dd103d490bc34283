//! Test-statistic distributions from repeated synthetic data sets.
//!
//! Each trial synthesizes a data set under one hypothesis, masks it,
//! cross-correlates it with the galaxy template and fits the signal
//! fractions. Per-trial failures become NaN entries; configuration and I/O
//! failures abort the batch.

use crate::algo::{chi2_one_dof_survival, percentile, SeedStream};
use crate::config::AnalysisConfig;
use crate::error::{Error, Result};
use crate::galaxy::GalaxyTemplate;
use crate::generator::{EventGenerator, SignalSource};
use crate::likelihood::{FitOptions, FitRange, FitResult, Likelihood, Observation};
use crate::sky::Mask;
use crate::xcorr::CrossCorrelator;
use log::{debug, info, warn};
use ndarray::Axis;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seed stride between consecutive trials of a batch
pub const TRIAL_SEED_STRIDE: u64 = 7;

/// What the synthetic data of a trial contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrialHypothesis {
    /// Atmospheric background only
    Background,
    /// Full diffuse flux from a sky unrelated to the galaxy template
    SignalOffTemplate,
    /// Full diffuse flux following the galaxy template
    SignalOnTemplate,
}

impl TrialHypothesis {
    pub const ALL: [TrialHypothesis; 3] = [
        TrialHypothesis::Background,
        TrialHypothesis::SignalOffTemplate,
        TrialHypothesis::SignalOnTemplate,
    ];

    /// Injected flux as a multiple of the reference diffuse flux
    pub fn flux_scale(&self) -> f64 {
        match self {
            TrialHypothesis::Background => 0.0,
            _ => 1.0,
        }
    }

    pub fn signal_source(&self) -> SignalSource {
        match self {
            TrialHypothesis::SignalOnTemplate => SignalSource::Galaxy,
            _ => SignalSource::Unrelated,
        }
    }

    /// Offset of this hypothesis' trial seeds inside the trial stream.
    ///
    /// Background and signal offsets differ by less than the stride, so the
    /// two sequences never share a seed.
    pub fn seed_offset(&self) -> u64 {
        match self {
            TrialHypothesis::Background => 109,
            _ => 103,
        }
    }

    /// Seed of trial `index` for the configured `seed`: offset + 7 index
    /// past the base of the trial stream.
    pub fn trial_seed(&self, seed: u64, index: usize) -> u64 {
        SeedStream::Trials
            .base(seed)
            .wrapping_add(self.seed_offset())
            .wrapping_add(TRIAL_SEED_STRIDE.wrapping_mul(index as u64))
    }

    /// Conventional output file name of the TS array
    pub fn file_name(&self) -> &'static str {
        match self {
            TrialHypothesis::Background => "TS_atm.txt",
            TrialHypothesis::SignalOffTemplate => "TS_nonGal.txt",
            TrialHypothesis::SignalOnTemplate => "TS_Gal.txt",
        }
    }
}

impl fmt::Display for TrialHypothesis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrialHypothesis::Background => "background",
            TrialHypothesis::SignalOffTemplate => "signal off template",
            TrialHypothesis::SignalOnTemplate => "signal on template",
        };
        f.write_str(name)
    }
}

/// Per-trial analysis settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialSettings {
    pub years: f64,
    pub lmin: usize,
    /// Cap on the number of fitted energy bins
    pub max_fit_bins: usize,
    pub fit: FitOptions,
}

impl TrialSettings {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            years: config.years,
            lmin: config.lmin,
            max_fit_bins: config.max_fit_bins,
            fit: FitOptions {
                seed: SeedStream::Fit.base(config.seed),
                ..FitOptions::default()
            },
        }
    }
}

/// Immutable state shared by every trial of a batch.
#[derive(Debug, Clone)]
pub struct TrialContext {
    pub generator: EventGenerator,
    pub correlator: CrossCorrelator,
    pub template: GalaxyTemplate,
    pub likelihood: Likelihood,
    pub settings: TrialSettings,
}

impl TrialContext {
    pub fn new(
        generator: EventGenerator,
        correlator: CrossCorrelator,
        template: GalaxyTemplate,
        likelihood: Likelihood,
        settings: TrialSettings,
    ) -> Result<Self> {
        if likelihood.n_bins() != generator.n_bins() {
            return Err(Error::Configuration(format!(
                "likelihood calibrated for {} bins but the generator has {}",
                likelihood.n_bins(),
                generator.n_bins()
            )));
        }
        if likelihood.lmax() != correlator.lmax() {
            return Err(Error::Configuration(format!(
                "likelihood calibrated up to l = {} but the correlator reaches l = {}",
                likelihood.lmax(),
                correlator.lmax()
            )));
        }
        if settings.max_fit_bins == 0 {
            return Err(Error::Configuration(
                "max_fit_bins must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            generator,
            correlator,
            template,
            likelihood,
            settings,
        })
    }

    /// Build the correlator and calibrate the likelihood by simulation.
    pub fn calibrate(
        generator: EventGenerator,
        template: GalaxyTemplate,
        mask: Mask,
        settings: TrialSettings,
        null_trials: usize,
        seed: u64,
        progress: Option<&(dyn Fn() + Sync)>,
    ) -> Result<Self> {
        let correlator = CrossCorrelator::new(generator.grid(), mask, &template)?;
        info!("Calibrating null statistics with {null_trials} trials per hypothesis");
        let likelihood = Likelihood::calibrate(
            &generator,
            &correlator,
            &template,
            settings.years,
            null_trials,
            seed,
            progress,
        )?;
        Self::new(generator, correlator, template, likelihood, settings)
    }

    /// Reduce a map set to the likelihood's observation: mask, count, correlate.
    pub fn observe(&self, mut counts: ndarray::Array2<f64>) -> Result<Observation> {
        self.correlator.mask().apply_to_maps(&mut counts)?;
        let cross_correlation = self.correlator.cross_correlation_set(&counts)?;
        Ok(Observation {
            cross_correlation,
            counts: counts.sum_axis(Axis(1)),
        })
    }

    /// Energy bins to fit: up to the last non-empty bin, capped.
    pub fn fit_range(&self, obs: &Observation) -> Result<FitRange> {
        let last = obs
            .counts
            .iter()
            .rposition(|&n| n != 0.0)
            .ok_or_else(|| Error::DegenerateInput("every energy bin is empty".to_string()))?;
        Ok(FitRange {
            lmin: self.settings.lmin,
            ebin_min: 0,
            ebin_max: (last + 1).min(self.settings.max_fit_bins),
        })
    }
}

/// Result of one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialOutcome {
    pub fit: FitResult,
    pub range: FitRange,
    pub counts: Vec<f64>,
}

/// Synthesize, reduce and fit one data set.
pub fn run_trial(context: &TrialContext, hypothesis: TrialHypothesis, seed: u64) -> Result<TrialOutcome> {
    let mut rng = StdRng::seed_from_u64(seed);
    let maps = context.generator.synthetic_data(
        context.settings.years,
        hypothesis.signal_source(),
        &context.template,
        hypothesis.flux_scale(),
        &mut rng,
    )?;
    let obs = context.observe(maps.into_counts())?;
    let range = context.fit_range(&obs)?;
    let fit = context.likelihood.fit(&obs, &range, &context.settings.fit)?;
    debug!(
        "{hypothesis} trial (seed {seed}): TS = {:.4}, f = {:?}",
        fit.test_statistic, fit.fractions
    );
    Ok(TrialOutcome {
        fit,
        range,
        counts: obs.counts.to_vec(),
    })
}

/// Aggregate warning for a batch where most trials are unreliable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWarning {
    pub n_trials: usize,
    pub failed: usize,
    pub not_converged: usize,
}

impl fmt::Display for BatchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} trials failed and {} did not converge",
            self.failed, self.n_trials, self.not_converged
        )
    }
}

/// Test statistics of a trial batch in trial order; failed trials are NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsDistribution {
    pub hypothesis: TrialHypothesis,
    pub values: Vec<f64>,
    pub failed: usize,
    pub not_converged: usize,
    pub warning: Option<BatchWarning>,
}

/// Empirical and asymptotic significance of an observed test statistic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Significance {
    /// Fraction of valid trials with TS at least as large
    pub empirical_p_value: f64,
    /// Chi-squared (1 dof) survival probability
    pub asymptotic_p_value: f64,
    /// Gaussian-equivalent significance sqrt(TS)
    pub sigma: f64,
}

impl TsDistribution {
    /// Summarize per-trial outcomes, aborting on the first fatal error.
    pub fn from_outcomes(
        hypothesis: TrialHypothesis,
        outcomes: Vec<Result<TrialOutcome>>,
    ) -> Result<Self> {
        let n_trials = outcomes.len();
        let mut values = Vec::with_capacity(n_trials);
        let mut failed = 0;
        let mut not_converged = 0;
        for (trial, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(outcome) => {
                    if !outcome.fit.converged {
                        not_converged += 1;
                    }
                    values.push(outcome.fit.test_statistic);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!("{hypothesis} trial {trial} failed: {e}");
                    failed += 1;
                    values.push(f64::NAN);
                }
            }
        }

        let warning = ((failed + not_converged) * 2 > n_trials).then(|| {
            let warning = BatchWarning {
                n_trials,
                failed,
                not_converged,
            };
            warn!("Unreliable {hypothesis} batch: {warning}");
            warning
        });

        Ok(Self {
            hypothesis,
            values,
            failed,
            not_converged,
            warning,
        })
    }

    pub fn valid_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied().filter(|v| !v.is_nan())
    }

    /// Percentile `q` (in percent) of the valid test statistics.
    pub fn percentile(&self, q: f64) -> Result<f64> {
        percentile(&self.values, q).map_err(Error::DegenerateInput)
    }

    /// Significance of `ts` against this distribution taken as the null.
    pub fn significance_above(&self, ts: f64) -> Result<Significance> {
        let valid: Vec<f64> = self.valid_values().collect();
        if valid.is_empty() {
            return Err(Error::DegenerateInput(format!(
                "no valid trials in the {} distribution",
                self.hypothesis
            )));
        }
        let above = valid.iter().filter(|&&v| v >= ts).count();
        Ok(Significance {
            empirical_p_value: above as f64 / valid.len() as f64,
            asymptotic_p_value: chi2_one_dof_survival(ts),
            sigma: ts.max(0.0).sqrt(),
        })
    }
}

/// Run `n_trials` trials in parallel; trial `i` is seeded with
/// `hypothesis.trial_seed(seed, i)`.
pub fn run_ts_batch(
    context: &TrialContext,
    hypothesis: TrialHypothesis,
    n_trials: usize,
    seed: u64,
    progress: Option<&(dyn Fn() + Sync)>,
) -> Result<TsDistribution> {
    info!("Running {n_trials} {hypothesis} trials");
    let outcomes: Vec<Result<TrialOutcome>> = (0..n_trials)
        .into_par_iter()
        .map(|i| {
            let outcome = run_trial(context, hypothesis, hypothesis.trial_seed(seed, i));
            if let Some(report) = progress {
                report();
            }
            outcome
        })
        .collect();

    let distribution = TsDistribution::from_outcomes(hypothesis, outcomes)?;
    info!(
        "{hypothesis}: {} trials, {} failed, {} not converged",
        n_trials, distribution.failed, distribution.not_converged
    );
    Ok(distribution)
}
