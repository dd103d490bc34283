//! Assembly of the long-lived analysis inputs from a configuration.

use crate::acceptance::AcceptanceModel;
use crate::algo::SeedStream;
use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::galaxy::{reference_power_spectrum, GalaxyTemplate};
use crate::generator::EventGenerator;
use crate::io;
use crate::sims::ts_trials::{TrialContext, TrialSettings};
use crate::sky::{Mask, SkyGrid};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

/// Where the galaxy template comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSource {
    /// Density map on disk (text or FITS), NESTED order
    Map(PathBuf),
    /// Log-normal sky drawn from C_l = amplitude (l + 1)^-slope, using the
    /// template stream of `seed`
    LogNormal { amplitude: f64, slope: f64, seed: u64 },
}

/// Acceptance-driven generator, galaxy template and sky mask for one session.
#[derive(Debug, Clone)]
pub struct AnalysisInputs {
    pub generator: EventGenerator,
    pub template: GalaxyTemplate,
    pub mask: Mask,
}

impl AnalysisInputs {
    pub fn load(config: &AnalysisConfig, source: &TemplateSource) -> Result<Self> {
        config.validate()?;
        let grid = SkyGrid::new(config.depth)?;
        info!(
            "Loading calibration tables from {} (nside {}, {} bins)",
            config.calibration.root.display(),
            grid.nside(),
            config.binning.n_bins()
        );
        let acceptance = AcceptanceModel::load(&config.calibration, config.binning.clone())?;

        let template = match source {
            TemplateSource::Map(path) => {
                info!("Reading galaxy template from {}", path.display());
                let density = io::read_map(path)?;
                GalaxyTemplate::from_density(&grid, density.view())?
            }
            TemplateSource::LogNormal {
                amplitude,
                slope,
                seed,
            } => {
                let cl = reference_power_spectrum(grid.lmax(), *amplitude, *slope);
                let mut rng = StdRng::seed_from_u64(SeedStream::Template.base(*seed));
                GalaxyTemplate::from_power_spectrum(&grid, &cl, &mut rng)?
            }
        };

        let mask = Mask::below_declination(&grid, config.mask_min_declination_deg);
        info!(
            "Mask below {}° declination leaves sky fraction {:.3}",
            config.mask_min_declination_deg,
            mask.sky_fraction()
        );
        let generator = EventGenerator::with_diffuse_flux(acceptance, grid, &config.diffuse_flux)?;
        Ok(Self {
            generator,
            template,
            mask,
        })
    }

    /// Calibrate the likelihood and bundle everything a trial needs.
    pub fn into_trial_context(
        self,
        config: &AnalysisConfig,
        progress: Option<&(dyn Fn() + Sync)>,
    ) -> Result<TrialContext> {
        TrialContext::calibrate(
            self.generator,
            self.template,
            self.mask,
            TrialSettings::from_config(config),
            config.null_trials,
            config.seed,
            progress,
        )
    }
}
