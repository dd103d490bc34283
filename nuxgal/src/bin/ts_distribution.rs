//! Test-statistic distributions under background and signal hypotheses
//!
//! Calibrates the likelihood from simulated null skies, then repeats the
//! synthesize / cross-correlate / fit cycle many times for each of:
//! - atmospheric background only (`TS_atm.txt`)
//! - astrophysical flux unrelated to the galaxies (`TS_nonGal.txt`)
//! - astrophysical flux tracing the galaxies (`TS_Gal.txt`)
//!
//! Usage:
//! ```
//! cargo run --release --bin ts_distribution -- --calibration-dir data/irfs --trials 200
//! ```

use anyhow::Context;
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::info;
use nuxgal::io;
use nuxgal::shared_args::SharedAnalysisArgs;
use nuxgal::sims::{run_ts_batch, AnalysisInputs, TrialHypothesis, TsDistribution};
use std::path::PathBuf;

/// Command line arguments for the TS distribution run
#[derive(Parser, Debug)]
#[command(
    name = "TS Distribution",
    about = "Builds test-statistic distributions for background and signal hypotheses",
    long_about = None
)]
struct Args {
    #[command(flatten)]
    shared: SharedAnalysisArgs,

    /// Trials per hypothesis
    #[arg(long, default_value_t = 100)]
    trials: usize,

    /// Directory for the TS arrays
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Also write the calibrated likelihood as JSON
    #[arg(long)]
    save_likelihood: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = args.shared.load_config()?;
    let inputs = AnalysisInputs::load(&config, &args.shared.template_source(config.seed))?;

    let multi_progress = MultiProgress::new();
    let progress_style = ProgressStyle::default_bar()
        .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
        .progress_chars("█▉▊▋▌▍▎▏ ");

    let pb = multi_progress.add(ProgressBar::new(2 * config.null_trials as u64));
    pb.set_style(progress_style.clone());
    pb.set_message("Null statistics");
    let tick = || pb.inc(1);
    let context = inputs.into_trial_context(&config, Some(&tick))?;
    pb.finish_with_message("Null statistics done");

    if let Some(path) = &args.save_likelihood {
        io::write_json(path, &context.likelihood)?;
        info!("Likelihood written to {}", path.display());
    }

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    let mut distributions: Vec<TsDistribution> = Vec::new();
    for hypothesis in TrialHypothesis::ALL {
        let pb = multi_progress.add(ProgressBar::new(args.trials as u64));
        pb.set_style(progress_style.clone());
        pb.set_message(hypothesis.to_string());
        let tick = || pb.inc(1);

        let distribution = run_ts_batch(
            &context,
            hypothesis,
            args.trials,
            config.seed,
            Some(&tick),
        )?;
        pb.finish();

        let path = args.output_dir.join(hypothesis.file_name());
        io::text::write_values(&path, &distribution.values)?;
        if let Some(warning) = &distribution.warning {
            println!("WARNING ({hypothesis}): {warning}");
        }
        match distribution.percentile(50.0) {
            Ok(median) => println!("{hypothesis}: median TS {median:.3} -> {}", path.display()),
            Err(e) => println!("{hypothesis}: no valid trials ({e})"),
        }
        distributions.push(distribution);
    }

    // Signal-on-template median against the background distribution
    let background = &distributions[0];
    let signal = &distributions[2];
    if let (Ok(threshold), Ok(median)) = (background.percentile(95.0), signal.percentile(50.0)) {
        let significance = background.significance_above(median)?;
        println!(
            "Background 95th percentile TS {threshold:.3}; median galaxy-traced TS {median:.3} \
             (p = {:.4}, asymptotic p = {:.2e}, {:.2} sigma)",
            significance.empirical_p_value, significance.asymptotic_p_value, significance.sigma
        );
    }

    Ok(())
}
