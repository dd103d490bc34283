//! Synthetic event maps: atmospheric background from the detector acceptance
//! and astrophysical signal placed on a galaxy template.
//!
//! All draws go through a caller-supplied RNG, so a map is a pure function
//! of the generator state and the seed.

use crate::acceptance::AcceptanceModel;
use crate::config::{DiffuseFlux, PowerLawRange};
use crate::error::{Error, Result};
use crate::galaxy::GalaxyTemplate;
use crate::sky::SkyGrid;
use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1};
use rand::distributions::WeightedIndex;
use rand::Rng;
use rand_distr::{Distribution, Poisson};
use std::f64::consts::{LN_10, PI, TAU};

const SECONDS_PER_DAY: f64 = 86_400.0;
const CM2_PER_M2: f64 = 1e4;

/// Per-bin count maps together with the number of events drawn in each bin.
///
/// `counts.row(i).sum() == totals[i]` holds exactly: every event lands in
/// exactly one pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMaps {
    /// (bins x pixels) integer counts stored as f64
    pub counts: Array2<f64>,
    pub totals: Vec<u64>,
}

impl EventMaps {
    pub fn zeros(n_bins: usize, npix: usize) -> Self {
        Self {
            counts: Array2::zeros((n_bins, npix)),
            totals: vec![0; n_bins],
        }
    }

    pub fn n_bins(&self) -> usize {
        self.totals.len()
    }

    /// Add another map set event by event.
    pub fn merge(&mut self, other: &EventMaps) -> Result<()> {
        if self.counts.dim() != other.counts.dim() {
            return Err(Error::Configuration(format!(
                "cannot merge event maps of shape {:?} and {:?}",
                self.counts.dim(),
                other.counts.dim()
            )));
        }
        self.counts += &other.counts;
        for (total, extra) in self.totals.iter_mut().zip(&other.totals) {
            *total += extra;
        }
        Ok(())
    }

    pub fn into_counts(self) -> Array2<f64> {
        self.counts
    }
}

/// Where the astrophysical events of a synthetic data set come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    /// The galaxy template itself
    Galaxy,
    /// An independent log-normal sky with the template's power spectrum
    Unrelated,
}

/// Draw from Poisson(`expected`); a zero expectation yields zero.
pub fn draw_poisson<R: Rng + ?Sized>(expected: f64, rng: &mut R) -> Result<u64> {
    if expected == 0.0 {
        return Ok(0);
    }
    let poisson = Poisson::new(expected).map_err(|e| {
        Error::Domain(format!("invalid Poisson expectation {expected}: {e}"))
    })?;
    Ok(poisson.sample(rng) as u64)
}

/// Energies (GeV) drawn from dN/dE ∝ E^`index` on the range.
///
/// Index -1 is log-uniform; other indices invert the power-law CDF.
pub fn random_power_law<R: Rng + ?Sized>(
    index: f64,
    n: usize,
    range: &PowerLawRange,
    rng: &mut R,
) -> Vec<f64> {
    let (emin, emax) = (range.emin_gev, range.emax_gev);
    if index == -1.0 {
        let (lo, hi) = (emin.ln(), emax.ln());
        return (0..n)
            .map(|_| ((hi - lo) * rng.gen::<f64>() + lo).exp())
            .collect();
    }
    let exponent = index + 1.0;
    let lo = emin.powf(exponent);
    let hi = emax.powf(exponent);
    (0..n)
        .map(|_| ((hi - lo) * rng.gen::<f64>() + lo).powf(1.0 / exponent))
        .collect()
}

/// Accumulate `n` events into `row`, each pixel chosen with probability
/// proportional to `weights`.
fn place_events<R: Rng + ?Sized>(
    n: u64,
    weights: ArrayView1<f64>,
    mut row: ArrayViewMut1<f64>,
    rng: &mut R,
) -> Result<()> {
    if n == 0 {
        return Ok(());
    }
    let sampler = WeightedIndex::new(weights.iter().copied()).map_err(|e| {
        Error::Configuration(format!("cannot place events on template: {e}"))
    })?;
    for _ in 0..n {
        row[sampler.sample(rng)] += 1.0;
    }
    Ok(())
}

/// Synthetic event source for one detector configuration and sky resolution.
#[derive(Debug, Clone)]
pub struct EventGenerator {
    acceptance: AcceptanceModel,
    grid: SkyGrid,
    /// Astrophysical events per year per bin for the reference diffuse flux
    astro_counts_per_year: Vec<f64>,
}

impl EventGenerator {
    pub fn new(acceptance: AcceptanceModel, grid: SkyGrid) -> Result<Self> {
        Self::with_diffuse_flux(acceptance, grid, &DiffuseFlux::default())
    }

    pub fn with_diffuse_flux(
        acceptance: AcceptanceModel,
        grid: SkyGrid,
        flux: &DiffuseFlux,
    ) -> Result<Self> {
        let astro_counts_per_year = expected_signal_counts(&acceptance, flux)?;
        debug!("Astrophysical events per year by bin: {astro_counts_per_year:?}");
        Ok(Self {
            acceptance,
            grid,
            astro_counts_per_year,
        })
    }

    pub fn acceptance(&self) -> &AcceptanceModel {
        &self.acceptance
    }

    pub fn grid(&self) -> &SkyGrid {
        &self.grid
    }

    pub fn n_bins(&self) -> usize {
        self.acceptance.n_bins()
    }

    /// Expected astrophysical events per year for the flux this generator was built with
    pub fn astro_counts_per_year(&self) -> &[f64] {
        &self.astro_counts_per_year
    }

    /// Expected astrophysical events per year per bin for `flux`.
    pub fn expected_signal_counts_per_year(&self, flux: &DiffuseFlux) -> Result<Vec<f64>> {
        expected_signal_counts(&self.acceptance, flux)
    }

    /// Atmospheric background for `duration_years` of exposure.
    pub fn generate_background_map<R: Rng + ?Sized>(
        &self,
        duration_years: f64,
        rng: &mut R,
    ) -> Result<EventMaps> {
        if !(duration_years >= 0.0) {
            return Err(Error::Domain(format!(
                "duration must be non-negative, got {duration_years} years"
            )));
        }
        let expected: Vec<f64> = self
            .acceptance
            .expected_counts_per_year()
            .iter()
            .map(|&rate| rate * duration_years)
            .collect();
        self.generate_background_map_with_expected(&expected, rng)
    }

    /// Atmospheric background with explicit per-bin expected counts.
    ///
    /// Directions follow the background cos(zenith) distribution with a
    /// uniform azimuth, mapped to the sky for a detector at the South Pole.
    pub fn generate_background_map_with_expected<R: Rng + ?Sized>(
        &self,
        expected: &[f64],
        rng: &mut R,
    ) -> Result<EventMaps> {
        self.check_bins(expected.len())?;
        let mut maps = EventMaps::zeros(self.n_bins(), self.grid.npix());

        for (bin, &lambda) in expected.iter().enumerate() {
            let n = draw_poisson(lambda, rng)?;
            let cos_zenith = self.acceptance.sample_cos_zenith(bin, n as usize, rng)?;
            let mut row = maps.counts.row_mut(bin);
            for cz in cos_zenith {
                let dec = (-cz).clamp(-1.0, 1.0).asin();
                let ra = rng.gen::<f64>() * TAU;
                row[self.grid.pixel_of(ra, dec)] += 1.0;
            }
            maps.totals[bin] = n;
        }
        Ok(maps)
    }

    /// Astrophysical signal placed on the template, Poisson totals per bin.
    pub fn generate_signal_map<R: Rng + ?Sized>(
        &self,
        expected: &[f64],
        template: &GalaxyTemplate,
        rng: &mut R,
    ) -> Result<EventMaps> {
        self.check_bins(expected.len())?;
        self.grid.check_map_len(template.npix())?;
        let mut maps = EventMaps::zeros(self.n_bins(), self.grid.npix());
        for (bin, &lambda) in expected.iter().enumerate() {
            let n = draw_poisson(lambda, rng)?;
            place_events(n, template.density(), maps.counts.row_mut(bin), rng)?;
            maps.totals[bin] = n;
        }
        Ok(maps)
    }

    /// Signal whose per-bin expectations come from `total` power-law energies.
    ///
    /// Energies falling outside the binning are dropped.
    pub fn generate_power_law_signal_map<R: Rng + ?Sized>(
        &self,
        total: usize,
        template: &GalaxyTemplate,
        spectral_index: f64,
        range: &PowerLawRange,
        rng: &mut R,
    ) -> Result<EventMaps> {
        let binning = self.acceptance.binning();
        let mut per_bin = vec![0.0; self.n_bins()];
        for energy in random_power_law(spectral_index, total, range, rng) {
            if let Some(bin) = binning.bin_of(energy.log10()) {
                per_bin[bin] += 1.0;
            }
        }
        self.generate_signal_map(&per_bin, template, rng)
    }

    /// Template weighted by the exposure of `bin`, renormalized to unit sum.
    pub fn exposure_weighted_template(
        &self,
        template: &GalaxyTemplate,
        bin: usize,
    ) -> Result<Array1<f64>> {
        self.grid.check_map_len(template.npix())?;
        let weighted = &template.density() * &self.acceptance.exposure_map(bin, &self.grid)?;
        let total = weighted.sum();
        if total <= 0.0 {
            return Err(Error::Configuration(format!(
                "galaxy template has no overlap with the exposure of bin {bin}"
            )));
        }
        Ok(weighted / total)
    }

    /// Fraction of each bin's events that are astrophysical for an injected
    /// flux `f_diff` times the reference diffuse flux.
    pub fn astro_fraction(&self, f_diff: f64) -> Vec<f64> {
        self.acceptance
            .expected_counts_per_year()
            .iter()
            .zip(&self.astro_counts_per_year)
            .map(|(&n_atm, &n_astro)| {
                if n_atm != 0.0 {
                    n_astro * f_diff / n_atm
                } else if n_astro != 0.0 {
                    1.0
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Mixed background + astrophysical data set.
    ///
    /// The astrophysical part carries `f_diff` times the reference diffuse
    /// flux and replaces the same number of background events, so the
    /// expected total per bin is unchanged. Signal is placed on the
    /// exposure-weighted template.
    pub fn synthetic_data<R: Rng + ?Sized>(
        &self,
        years: f64,
        source: SignalSource,
        template: &GalaxyTemplate,
        f_diff: f64,
        rng: &mut R,
    ) -> Result<EventMaps> {
        if !(f_diff >= 0.0) {
            return Err(Error::Domain(format!(
                "injected flux fraction must be non-negative, got {f_diff}"
            )));
        }
        let f_astro = self.astro_fraction(f_diff);
        let background_expected: Vec<f64> = self
            .acceptance
            .expected_counts_per_year()
            .iter()
            .zip(&f_astro)
            .map(|(&n_atm, &f)| (n_atm * years * (1.0 - f)).max(0.0))
            .collect();
        let mut maps = self.generate_background_map_with_expected(&background_expected, rng)?;

        let signal_template = match source {
            SignalSource::Galaxy => template.clone(),
            SignalSource::Unrelated => template.unrelated_realization(&self.grid, rng)?,
        };

        let signal_expected: Vec<f64> = self
            .astro_counts_per_year
            .iter()
            .map(|&n_astro| n_astro * years * f_diff)
            .collect();
        let signal = self.generate_exposed_signal_map(&signal_expected, &signal_template, rng)?;
        maps.merge(&signal)?;
        Ok(maps)
    }

    /// Signal placed on the exposure-weighted template, Poisson totals per bin.
    pub fn generate_exposed_signal_map<R: Rng + ?Sized>(
        &self,
        expected: &[f64],
        template: &GalaxyTemplate,
        rng: &mut R,
    ) -> Result<EventMaps> {
        self.check_bins(expected.len())?;
        let mut maps = EventMaps::zeros(self.n_bins(), self.grid.npix());
        for (bin, &lambda) in expected.iter().enumerate() {
            let n = draw_poisson(lambda, rng)?;
            if n == 0 {
                continue;
            }
            let weights = self.exposure_weighted_template(template, bin)?;
            place_events(n, weights.view(), maps.counts.row_mut(bin), rng)?;
            maps.totals[bin] = n;
        }
        Ok(maps)
    }

    fn check_bins(&self, len: usize) -> Result<()> {
        if len != self.n_bins() {
            return Err(Error::Configuration(format!(
                "expected {} per-bin values, got {len}",
                self.n_bins()
            )));
        }
        Ok(())
    }
}

/// Astrophysical events per year in each bin for a diffuse flux, evaluated
/// at the bin center with the maximal effective area over the full sky.
fn expected_signal_counts(acceptance: &AcceptanceModel, flux: &DiffuseFlux) -> Result<Vec<f64>> {
    let binning = acceptance.binning();
    let livetime_s = flux.livetime_days * SECONDS_PER_DAY;
    (0..binning.n_bins())
        .map(|bin| {
            let energy = 10f64.powf(binning.log_center(bin));
            // dE = E ln10 dlog10E
            let de = energy * LN_10 * binning.log_width(bin);
            let area_cm2 = acceptance.max_effective_area(bin)? * CM2_PER_M2;
            Ok(flux.dn_de(energy) * de * area_cm2 * livetime_s * 4.0 * PI)
        })
        .collect()
}
