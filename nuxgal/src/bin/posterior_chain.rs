//! Posterior sampling of the signal fractions on one synthetic data set
//!
//! Draws a data set with the requested injected flux, fits the signal
//! fractions, runs the ensemble sampler around the best fit and writes the
//! fit, the chain and its percentile summary as JSON.

use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use nuxgal::io;
use nuxgal::algo::SeedStream;
use nuxgal::likelihood::{check_burn_in, Chain, ParameterSummary, SamplerOptions};
use nuxgal::shared_args::SharedAnalysisArgs;
use nuxgal::sims::AnalysisInputs;
use nuxgal::{FitRange, FitResult, SignalSource};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::path::PathBuf;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Source {
    /// Astrophysical events follow the galaxy template
    Galaxy,
    /// Astrophysical events follow an unrelated sky
    Unrelated,
}

#[derive(Parser, Debug)]
#[command(
    name = "Posterior Chain",
    about = "Fits and samples the signal fractions of a synthetic data set",
    long_about = None
)]
struct Args {
    #[command(flatten)]
    shared: SharedAnalysisArgs,

    /// Injected flux relative to the reference diffuse flux
    #[arg(long, default_value_t = 1.0)]
    f_diff: f64,

    #[arg(long, value_enum, default_value_t = Source::Galaxy)]
    source: Source,

    /// Ensemble walkers
    #[arg(long, default_value_t = 20)]
    walkers: usize,

    /// Steps per walker
    #[arg(long, default_value_t = 500)]
    steps: usize,

    /// Steps discarded before summarizing
    #[arg(long, default_value_t = 100)]
    burn_in: usize,

    /// Output JSON file
    #[arg(long, default_value = "chain.json")]
    output: PathBuf,
}

impl Args {
    /// Sampler settings that can be rejected before the expensive calibration.
    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.walkers >= 2, "need at least 2 walkers, got {}", self.walkers);
        check_burn_in(self.steps, self.burn_in)?;
        Ok(())
    }
}

#[derive(Serialize)]
struct ChainReport {
    f_diff: f64,
    counts: Vec<f64>,
    range: FitRange,
    fit: FitResult,
    summary: Vec<ParameterSummary>,
    chain: Chain,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    args.validate()?;

    let config = args.shared.load_config()?;
    let inputs = AnalysisInputs::load(&config, &args.shared.template_source(config.seed))?;

    let pb = ProgressBar::new(2 * config.null_trials as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("█▉▊▋▌▍▎▏ "),
    );
    pb.set_message("Null statistics");
    let tick = || pb.inc(1);
    let context = inputs.into_trial_context(&config, Some(&tick))?;
    pb.finish_and_clear();

    let source = match args.source {
        Source::Galaxy => SignalSource::Galaxy,
        Source::Unrelated => SignalSource::Unrelated,
    };
    let mut rng = StdRng::seed_from_u64(SeedStream::SyntheticData.base(config.seed));
    let maps = context.generator.synthetic_data(
        config.years,
        source,
        &context.template,
        args.f_diff,
        &mut rng,
    )?;
    let obs = context.observe(maps.into_counts())?;
    let range = context.fit_range(&obs)?;

    let fit = context.likelihood.fit(&obs, &range, &context.settings.fit)?;
    println!(
        "Best fit f = {:?}, TS = {:.3}{}",
        fit.fractions,
        fit.test_statistic,
        if fit.converged { "" } else { " (not converged)" }
    );

    let options = SamplerOptions {
        seed: context.settings.fit.seed,
        ..SamplerOptions::default()
    };
    info!("Sampling {} walkers x {} steps", args.walkers, args.steps);
    let chain = context
        .likelihood
        .sample_chain(&obs, &range, args.walkers, args.steps, &options)?;
    let summary = chain.summary(args.burn_in)?;
    for (bin, s) in summary.iter().enumerate() {
        println!(
            "bin {bin}: f = {:.3} (+{:.3} / -{:.3})",
            s.median,
            s.p84 - s.median,
            s.median - s.p16
        );
    }

    let report = ChainReport {
        f_diff: args.f_diff,
        counts: obs.counts.to_vec(),
        range,
        fit,
        summary,
        chain,
    };
    io::write_json(&args.output, &report)?;
    println!("Chain written to {}", args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burn_in_checked_before_sampling() {
        let args = Args::parse_from(["posterior_chain", "--steps", "50", "--burn-in", "50"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from(["posterior_chain", "--walkers", "1"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from(["posterior_chain"]);
        assert!(args.validate().is_ok());
    }
}
