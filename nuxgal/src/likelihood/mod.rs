//! Gaussian likelihood of the observed cross-correlation as a mixture of
//! background and signal expectations, its maximization and posterior sampling.
//!
//! For a signal fraction f in energy bin i and multipole l:
//!
//! ```text
//! mu      = (1 - f) mu_bg + f mu_sig
//! sigma^2 = [(1 - f) sigma_bg^2 N_bg + f sigma_sig^2 N_sig] / N_obs
//! lnL    += -1/2 [(w - mu)^2 / sigma^2 + ln(2 pi sigma^2)]
//! ```
//!
//! where N_bg and N_sig are the event counts the null statistics were
//! generated with and N_obs the observed count in the bin.

pub mod mcmc;
pub mod optimize;

pub use mcmc::{check_burn_in, Chain, ParameterSummary, SamplerOptions};
pub use optimize::{minimize_in_unit_box, NelderMeadOptions, NelderMeadResult};

use crate::algo::SeedStream;
use crate::error::{Error, Result};
use crate::galaxy::GalaxyTemplate;
use crate::generator::EventGenerator;
use crate::xcorr::{CrossCorrelator, NullStatistics};
use log::{debug, warn};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Measured data entering the likelihood.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// (bins x (lmax + 1)) cross-correlation of the data with the template
    pub cross_correlation: Array2<f64>,
    /// Unmasked event count per bin
    pub counts: Array1<f64>,
}

/// Multipoles and energy bins included in a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitRange {
    pub lmin: usize,
    pub ebin_min: usize,
    /// Exclusive
    pub ebin_max: usize,
}

impl FitRange {
    pub fn n_params(&self) -> usize {
        self.ebin_max.saturating_sub(self.ebin_min)
    }
}

/// Settings of the multi-start maximum-likelihood fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    /// Seeded random starts in addition to the zero and mid-point starts
    pub random_starts: usize,
    pub seed: u64,
    pub nelder_mead: NelderMeadOptions,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            random_starts: 2,
            seed: 0,
            nelder_mead: NelderMeadOptions::default(),
        }
    }
}

/// Outcome of the maximum-likelihood fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// Best-fit signal fraction per fitted bin
    pub fractions: Vec<f64>,
    pub log_likelihood: f64,
    /// 2 (lnL(best) - lnL(0))
    pub test_statistic: f64,
    pub converged: bool,
    /// True when any fraction sits on the edge of [0, 1]
    pub at_bound: bool,
    pub evaluations: usize,
}

impl FitResult {
    /// Turn a non-converged fit into an error.
    pub fn require_converged(self) -> Result<Self> {
        if self.converged {
            Ok(self)
        } else {
            Err(Error::Convergence(format!(
                "fit stopped after {} evaluations at f = {:?}",
                self.evaluations, self.fractions
            )))
        }
    }
}

const BOUND_TOLERANCE: f64 = 1e-6;

/// Calibrated likelihood: null statistics for both hypotheses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Likelihood {
    pub background: NullStatistics,
    pub signal: NullStatistics,
    /// Expected background events per year, per bin
    pub background_counts_per_year: Vec<f64>,
    /// Auto power spectrum of the galaxy template
    pub galaxy_cl: Array1<f64>,
}

impl Likelihood {
    pub fn new(
        background: NullStatistics,
        signal: NullStatistics,
        background_counts_per_year: Vec<f64>,
        galaxy_cl: Array1<f64>,
    ) -> Result<Self> {
        if background.mean.dim() != signal.mean.dim()
            || background.std.dim() != background.mean.dim()
            || signal.std.dim() != signal.mean.dim()
        {
            return Err(Error::Configuration(format!(
                "background statistics {:?} and signal statistics {:?} disagree in shape",
                background.mean.dim(),
                signal.mean.dim()
            )));
        }
        let n_bins = background.n_bins();
        if background.reference_counts.len() != n_bins
            || signal.reference_counts.len() != n_bins
            || background_counts_per_year.len() != n_bins
        {
            return Err(Error::Configuration(format!(
                "per-bin reference counts do not cover {n_bins} energy bins"
            )));
        }
        Ok(Self {
            background,
            signal,
            background_counts_per_year,
            galaxy_cl,
        })
    }

    /// Estimate both null statistics by simulation.
    ///
    /// Background and signal draws come from their own streams of `seed`.
    pub fn calibrate(
        generator: &EventGenerator,
        correlator: &CrossCorrelator,
        template: &GalaxyTemplate,
        years: f64,
        n_trials: usize,
        seed: u64,
        progress: Option<&(dyn Fn() + Sync)>,
    ) -> Result<Self> {
        let background = correlator.background_null_statistics(
            generator,
            years,
            n_trials,
            SeedStream::BackgroundNull.base(seed),
            progress,
        )?;
        let signal = correlator.signal_null_statistics(
            generator,
            template,
            years,
            n_trials,
            SeedStream::SignalNull.base(seed),
            progress,
        )?;
        let galaxy_cl = template.power_spectrum(correlator.grid())?;
        Self::new(
            background,
            signal,
            generator.acceptance().expected_counts_per_year().to_vec(),
            galaxy_cl,
        )
    }

    pub fn n_bins(&self) -> usize {
        self.background.n_bins()
    }

    pub fn lmax(&self) -> usize {
        self.background.lmax()
    }

    fn check_inputs(&self, fractions: Option<&[f64]>, obs: &Observation, range: &FitRange) -> Result<()> {
        if range.ebin_min >= range.ebin_max || range.ebin_max > self.n_bins() {
            return Err(Error::Domain(format!(
                "energy bin range [{}, {}) is empty or exceeds the {} calibrated bins",
                range.ebin_min,
                range.ebin_max,
                self.n_bins()
            )));
        }
        if range.lmin > self.lmax() {
            return Err(Error::Domain(format!(
                "lmin = {} exceeds lmax = {}",
                range.lmin,
                self.lmax()
            )));
        }
        if obs.cross_correlation.dim() != self.background.mean.dim()
            || obs.counts.len() != self.n_bins()
        {
            return Err(Error::Configuration(format!(
                "observation of shape {:?} with {} counts does not match statistics of shape {:?}",
                obs.cross_correlation.dim(),
                obs.counts.len(),
                self.background.mean.dim()
            )));
        }
        if let Some(f) = fractions {
            if f.len() != range.n_params() {
                return Err(Error::Domain(format!(
                    "expected {} signal fractions, got {}",
                    range.n_params(),
                    f.len()
                )));
            }
            if let Some(bad) = f.iter().find(|v| !(0.0..=1.0).contains(*v)) {
                return Err(Error::Domain(format!(
                    "signal fraction {bad} outside [0, 1]"
                )));
            }
        }
        Ok(())
    }

    /// Log-likelihood of the signal fractions `f`, one per bin of the range.
    pub fn log_likelihood(&self, f: &[f64], obs: &Observation, range: &FitRange) -> Result<f64> {
        self.check_inputs(Some(f), obs, range)?;
        self.evaluate(f, obs, range)
    }

    /// Inner evaluation without argument checks.
    fn evaluate(&self, f: &[f64], obs: &Observation, range: &FitRange) -> Result<f64> {
        let mut total = 0.0;
        let mut contributing = 0;
        for (k, bin) in (range.ebin_min..range.ebin_max).enumerate() {
            let n_obs = obs.counts[bin];
            if n_obs <= 0.0 {
                continue;
            }
            contributing += 1;
            let fraction = f[k];
            let n_bg = self.background.reference_counts[bin];
            let n_sig = self.signal.reference_counts[bin];
            for l in range.lmin..=self.lmax() {
                let mu = (1.0 - fraction) * self.background.mean[[bin, l]]
                    + fraction * self.signal.mean[[bin, l]];
                let var = ((1.0 - fraction) * self.background.std[[bin, l]].powi(2) * n_bg
                    + fraction * self.signal.std[[bin, l]].powi(2) * n_sig)
                    / n_obs;
                if var <= 0.0 {
                    continue;
                }
                let residual = obs.cross_correlation[[bin, l]] - mu;
                total -= 0.5 * (residual * residual / var + (2.0 * PI * var).ln());
            }
        }
        if contributing == 0 {
            return Err(Error::DegenerateInput(format!(
                "no events in energy bins [{}, {})",
                range.ebin_min, range.ebin_max
            )));
        }
        Ok(total)
    }

    /// Maximum-likelihood signal fractions over [0, 1]^n.
    ///
    /// Runs Nelder–Mead from the all-zero vector, the mid-point and
    /// `options.random_starts` seeded random points and keeps the best.
    /// Non-convergence is flagged in the result and logged, not raised.
    pub fn fit(&self, obs: &Observation, range: &FitRange, options: &FitOptions) -> Result<FitResult> {
        self.check_inputs(None, obs, range)?;
        let n = range.n_params();
        let null_value = self.evaluate(&vec![0.0; n], obs, range)?;

        let mut starts = vec![vec![0.0; n], vec![0.5; n]];
        let mut rng = StdRng::seed_from_u64(options.seed);
        for _ in 0..options.random_starts {
            starts.push((0..n).map(|_| rng.gen::<f64>()).collect());
        }

        let objective = |x: &[f64]| match self.evaluate(x, obs, range) {
            Ok(value) => -value,
            Err(_) => f64::INFINITY,
        };

        let mut best: Option<NelderMeadResult> = None;
        let mut evaluations = 0;
        for start in &starts {
            let run = minimize_in_unit_box(objective, start, &options.nelder_mead);
            evaluations += run.evaluations;
            debug!(
                "Nelder-Mead from {start:?}: f = {:?}, -lnL = {}, converged = {}",
                run.x, run.value, run.converged
            );
            if best.as_ref().map_or(true, |b| run.value < b.value) {
                best = Some(run);
            }
        }
        let best = best.ok_or_else(|| Error::Convergence("no optimizer runs".to_string()))?;

        let log_likelihood = -best.value;
        let test_statistic = (2.0 * (log_likelihood - null_value)).max(0.0);
        let at_bound = best
            .x
            .iter()
            .any(|&v| v < BOUND_TOLERANCE || v > 1.0 - BOUND_TOLERANCE);
        if !best.converged {
            warn!(
                "Likelihood fit did not converge after {evaluations} evaluations; best f = {:?}",
                best.x
            );
        }

        Ok(FitResult {
            fractions: best.x,
            log_likelihood,
            test_statistic,
            converged: best.converged,
            at_bound,
            evaluations,
        })
    }
}
