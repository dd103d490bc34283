//! Synthetic count maps
//!
//! Writes one count map per energy bin, plus the galaxy template used for
//! placement. The maps hold either a mixed background and astrophysical data
//! set or pure signal whose energies follow a power law over the configured
//! energy range.

use clap::{Parser, ValueEnum};
use log::info;
use nuxgal::algo::SeedStream;
use nuxgal::io;
use nuxgal::shared_args::SharedAnalysisArgs;
use nuxgal::sims::AnalysisInputs;
use nuxgal::SignalSource;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Source {
    Galaxy,
    Unrelated,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
enum Content {
    /// Atmospheric background mixed with the injected diffuse flux
    Mixture,
    /// Signal only, with power-law energies binned per energy bin
    PowerLaw,
}

#[derive(Parser, Debug)]
#[command(
    name = "Synthetic Maps",
    about = "Writes synthetic per-bin count maps",
    long_about = None
)]
struct Args {
    #[command(flatten)]
    shared: SharedAnalysisArgs,

    /// Injected flux relative to the reference diffuse flux
    #[arg(long, default_value_t = 0.0)]
    f_diff: f64,

    #[arg(long, value_enum, default_value_t = Source::Galaxy)]
    source: Source,

    #[arg(long, value_enum, default_value_t = Content::Mixture)]
    content: Content,

    /// Power-law events drawn before binning (`--content power-law`)
    #[arg(long, default_value_t = 1000)]
    power_law_events: usize,

    /// Spectral index of dN/dE for `--content power-law`
    #[arg(long, default_value_t = -2.0, allow_hyphen_values = true)]
    spectral_index: f64,

    /// Output directory
    #[arg(long, default_value = "syntheticData")]
    output_dir: PathBuf,

    /// Map file name; `{i}` is replaced by the bin index. A `.fits`
    /// extension needs the `fits` feature.
    #[arg(long, default_value = "syntheticData{i}.txt")]
    name: String,

    /// Apply the declination mask before writing
    #[arg(long, default_value_t = false)]
    masked: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = args.shared.load_config()?;
    let inputs = AnalysisInputs::load(&config, &args.shared.template_source(config.seed))?;

    let source = match args.source {
        Source::Galaxy => SignalSource::Galaxy,
        Source::Unrelated => SignalSource::Unrelated,
    };
    let mut rng = StdRng::seed_from_u64(SeedStream::SyntheticData.base(config.seed));
    let maps = match args.content {
        Content::Mixture => inputs.generator.synthetic_data(
            config.years,
            source,
            &inputs.template,
            args.f_diff,
            &mut rng,
        )?,
        Content::PowerLaw => {
            let template = match source {
                SignalSource::Galaxy => inputs.template.clone(),
                SignalSource::Unrelated => inputs
                    .template
                    .unrelated_realization(inputs.generator.grid(), &mut rng)?,
            };
            info!(
                "Drawing {} power-law events with index {} over [{:e}, {:e}] GeV",
                args.power_law_events,
                args.spectral_index,
                config.power_law.emin_gev,
                config.power_law.emax_gev
            );
            inputs.generator.generate_power_law_signal_map(
                args.power_law_events,
                &template,
                args.spectral_index,
                &config.power_law,
                &mut rng,
            )?
        }
    };
    info!("Generated {:?} events per bin", maps.totals);

    let mut counts = maps.into_counts();
    if args.masked {
        inputs.mask.apply_to_maps(&mut counts)?;
    }
    let written = io::write_maps(&args.output_dir, &args.name, &counts)?;
    let template_path = args.output_dir.join("galaxy_template.txt");
    io::write_map(&template_path, inputs.template.density())?;

    for path in &written {
        println!("{}", path.display());
    }
    println!("{}", template_path.display());
    Ok(())
}
