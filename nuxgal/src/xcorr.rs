//! Angular cross-correlation between event maps and the galaxy template, and
//! its Monte Carlo null-hypothesis statistics.

use crate::algo::{map_trials_in_parallel, mean_and_std};
use crate::error::{Error, Result};
use crate::galaxy::GalaxyTemplate;
use crate::generator::{EventGenerator, EventMaps};
use crate::sky::{cross_power, map_to_alm, Alm, Mask, SkyGrid};
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Mean and spread of the cross-correlation under one hypothesis.
///
/// Each row is an energy bin, each column a multipole. `reference_counts`
/// holds the mean number of unmasked events per bin in the draws, against
/// which the variance is rescaled for a data set of different size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullStatistics {
    pub mean: Array2<f64>,
    pub std: Array2<f64>,
    pub reference_counts: Array1<f64>,
    pub n_trials: usize,
}

impl NullStatistics {
    pub fn n_bins(&self) -> usize {
        self.mean.nrows()
    }

    /// Largest multipole covered
    pub fn lmax(&self) -> usize {
        self.mean.ncols().saturating_sub(1)
    }
}

/// Cross-correlates masked event maps with a fixed galaxy template.
#[derive(Debug, Clone)]
pub struct CrossCorrelator {
    grid: SkyGrid,
    mask: Mask,
    lmax: usize,
    template_alm: Alm,
}

impl CrossCorrelator {
    /// Prepare a correlator; the template overdensity transform is cached.
    pub fn new(grid: &SkyGrid, mask: Mask, template: &GalaxyTemplate) -> Result<Self> {
        grid.check_map_len(mask.len())?;
        if mask.n_unmasked() == 0 {
            return Err(Error::Configuration(
                "mask leaves no sky to correlate".to_string(),
            ));
        }
        let lmax = grid.lmax();
        let delta = mask.overdensity(template.density())?;
        let template_alm = map_to_alm(grid, delta.view(), lmax);
        Ok(Self {
            grid: grid.clone(),
            mask,
            lmax,
            template_alm,
        })
    }

    pub fn grid(&self) -> &SkyGrid {
        &self.grid
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    pub fn lmax(&self) -> usize {
        self.lmax
    }

    fn overdensity_alm(&self, map: ArrayView1<f64>) -> Result<Alm> {
        let delta = self.mask.overdensity(map)?;
        Ok(map_to_alm(&self.grid, delta.view(), self.lmax))
    }

    /// Cross power of two maps' overdensities, corrected for the masked sky.
    ///
    /// # Returns
    /// One value per multipole 0..=lmax.
    pub fn cross_correlation(
        &self,
        event_map: ArrayView1<f64>,
        template_map: ArrayView1<f64>,
    ) -> Result<Array1<f64>> {
        let a = self.overdensity_alm(event_map)?;
        let b = self.overdensity_alm(template_map)?;
        Ok(cross_power(&a, &b) / self.mask.sky_fraction())
    }

    /// Cross-correlation of one event map with the cached template.
    pub fn cross_correlation_with_template(&self, event_map: ArrayView1<f64>) -> Result<Array1<f64>> {
        let a = self.overdensity_alm(event_map)?;
        Ok(cross_power(&a, &self.template_alm) / self.mask.sky_fraction())
    }

    /// Cross-correlation of every bin of a map set with the template.
    ///
    /// # Returns
    /// (bins x (lmax + 1)) array.
    pub fn cross_correlation_set(&self, maps: &Array2<f64>) -> Result<Array2<f64>> {
        self.grid.check_map_len(maps.ncols())?;
        let rows = maps
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| self.cross_correlation_with_template(row))
            .collect::<Result<Vec<Array1<f64>>>>()?;

        let mut out = Array2::zeros((maps.nrows(), self.lmax + 1));
        for (mut dst, src) in out.rows_mut().into_iter().zip(rows) {
            dst.assign(&src);
        }
        Ok(out)
    }

    /// Monte Carlo estimate of the cross-correlation mean and spread.
    ///
    /// Each trial draws a map set with its own RNG seeded `seed + trial`,
    /// masks it and cross-correlates every bin. Trials run in parallel and
    /// results are combined in trial order.
    ///
    /// # Arguments
    /// * `draw` - Produces one synthetic map set
    /// * `n_trials` - Number of draws; one draw gives zero spread
    /// * `seed` - Base seed
    /// * `progress` - Called once per finished trial, from worker threads
    pub fn estimate_null_statistics<F>(
        &self,
        draw: F,
        n_trials: usize,
        seed: u64,
        progress: Option<&(dyn Fn() + Sync)>,
    ) -> Result<NullStatistics>
    where
        F: Fn(&mut StdRng) -> Result<EventMaps> + Sync,
    {
        if n_trials == 0 {
            return Err(Error::Domain(
                "null statistics need at least one trial".to_string(),
            ));
        }

        let trials = map_trials_in_parallel(n_trials, seed, |trial, rng| {
            let result = draw(rng).and_then(|maps| {
                let mut counts = maps.into_counts();
                self.mask.apply_to_maps(&mut counts)?;
                let w = self.cross_correlation_set(&counts)?;
                Ok((w, counts.sum_axis(Axis(1))))
            });
            debug!("Null trial {trial} finished");
            if let Some(report) = progress {
                report();
            }
            result
        });
        let trials = trials.into_iter().collect::<Result<Vec<_>>>()?;

        let n_bins = trials[0].0.nrows();
        let n_ell = self.lmax + 1;
        let mut mean = Array2::zeros((n_bins, n_ell));
        let mut std = Array2::zeros((n_bins, n_ell));
        for bin in 0..n_bins {
            let samples = Array2::from_shape_fn((n_trials, n_ell), |(t, l)| trials[t].0[[bin, l]]);
            let (m, s) = mean_and_std(samples.view()).ok_or_else(|| {
                Error::Domain("null statistics need at least one trial".to_string())
            })?;
            mean.row_mut(bin).assign(&m);
            std.row_mut(bin).assign(&s);
        }

        let mut reference_counts = Array1::zeros(n_bins);
        for (_, counts) in &trials {
            reference_counts += counts;
        }
        reference_counts /= n_trials as f64;

        info!("Estimated null statistics from {n_trials} trials over {n_bins} energy bins");
        Ok(NullStatistics {
            mean,
            std,
            reference_counts,
            n_trials,
        })
    }

    /// Null statistics of pure atmospheric background over `years`.
    pub fn background_null_statistics(
        &self,
        generator: &EventGenerator,
        years: f64,
        n_trials: usize,
        seed: u64,
        progress: Option<&(dyn Fn() + Sync)>,
    ) -> Result<NullStatistics> {
        self.estimate_null_statistics(
            |rng| generator.generate_background_map(years, rng),
            n_trials,
            seed,
            progress,
        )
    }

    /// Null statistics of pure signal on the exposure-weighted galaxy template.
    ///
    /// Each bin draws as many events as the background expects over `years`,
    /// or the astrophysical expectation where the background is empty.
    pub fn signal_null_statistics(
        &self,
        generator: &EventGenerator,
        template: &GalaxyTemplate,
        years: f64,
        n_trials: usize,
        seed: u64,
        progress: Option<&(dyn Fn() + Sync)>,
    ) -> Result<NullStatistics> {
        let expected: Vec<f64> = generator
            .acceptance()
            .expected_counts_per_year()
            .iter()
            .zip(generator.astro_counts_per_year())
            .map(|(&n_atm, &n_astro)| (if n_atm > 0.0 { n_atm } else { n_astro }) * years)
            .collect();
        self.estimate_null_statistics(
            |rng| generator.generate_exposed_signal_map(&expected, template, rng),
            n_trials,
            seed,
            progress,
        )
    }
}
