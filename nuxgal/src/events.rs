//! Binning of reconstructed event lists into count and flux maps.

use crate::acceptance::AcceptanceModel;
use crate::config::EnergyBinning;
use crate::error::{Error, Result};
use crate::io;
use crate::sky::SkyGrid;
use log::{debug, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One reconstructed event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// log10 of the reconstructed energy in GeV
    pub log_energy: f64,
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub zenith_deg: f64,
}

impl Event {
    fn from_row(row: &[f64], line: usize) -> Result<Self> {
        match *row {
            [log_energy, ra_deg, dec_deg, zenith_deg, ..] => {
                let event = Self {
                    log_energy,
                    ra_deg,
                    dec_deg,
                    zenith_deg,
                };
                if !(-90.0..=90.0).contains(&dec_deg) || !(0.0..=180.0).contains(&zenith_deg) {
                    return Err(Error::Configuration(format!(
                        "event {line}: declination {dec_deg} or zenith {zenith_deg} out of range"
                    )));
                }
                Ok(event)
            }
            _ => Err(Error::Configuration(format!(
                "event {line}: expected (log10 E, RA, Dec, zenith), got {} columns",
                row.len()
            ))),
        }
    }
}

/// Parse table rows of (log10 E, RA°, Dec°, zenith°).
pub fn parse_events(rows: &[Vec<f64>]) -> Result<Vec<Event>> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| Event::from_row(row, i))
        .collect()
}

/// Read an event list from a text table.
pub fn read_events(path: &Path) -> Result<Vec<Event>> {
    let rows = io::text::read_table(path)?;
    parse_events(&rows).map_err(|e| match e {
        Error::Configuration(msg) => Error::Configuration(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// Per-bin maps built from an event list.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedEvents {
    /// Event counts, bins × pixels
    pub counts: Array2<f64>,
    /// Sum of 1 / A_eff (m⁻²), bins × pixels
    pub flux: Array2<f64>,
    /// Events without acceptance on the far side of the horizon
    pub excluded: Vec<Event>,
    /// Events above the last energy edge
    pub above_range: usize,
}

/// Accumulate events into count and inverse-effective-area maps.
///
/// Events below the first energy edge are grouped into bin 0. Events whose
/// effective area is zero while their zenith exceeds 90° are dropped from
/// both maps and listed in `excluded`; other zero-area events are counted
/// without a flux contribution.
pub fn bin_events(
    events: &[Event],
    acceptance: &AcceptanceModel,
    grid: &SkyGrid,
    binning: &EnergyBinning,
) -> Result<BinnedEvents> {
    if binning.n_bins() != acceptance.n_bins() {
        return Err(Error::Configuration(format!(
            "event binning has {} bins but the acceptance model has {}",
            binning.n_bins(),
            acceptance.n_bins()
        )));
    }
    let first_edge = binning.log_edges()[0];
    let shape = (binning.n_bins(), grid.npix());
    let mut counts = Array2::zeros(shape);
    let mut flux = Array2::zeros(shape);
    let mut excluded = Vec::new();
    let mut above_range = 0;

    for event in events {
        let bin = match binning.bin_of(event.log_energy) {
            Some(bin) => bin,
            None if event.log_energy < first_edge => 0,
            None => {
                above_range += 1;
                continue;
            }
        };
        let cos_zenith = event.zenith_deg.to_radians().cos().clamp(-1.0, 1.0);
        let area = acceptance.effective_area(bin, cos_zenith)?;
        if area == 0.0 && event.zenith_deg > 90.0 {
            warn!(
                "Excluding event at RA {:.3}, Dec {:.3} (zenith {:.2}°): no effective area in bin {bin}",
                event.ra_deg, event.dec_deg, event.zenith_deg
            );
            excluded.push(*event);
            continue;
        }

        let pixel = grid.pixel_of(event.ra_deg.to_radians(), event.dec_deg.to_radians());
        counts[[bin, pixel]] += 1.0;
        if area > 0.0 {
            flux[[bin, pixel]] += 1.0 / area;
        }
    }

    if above_range > 0 {
        debug!("{above_range} events above the last energy edge were skipped");
    }
    Ok(BinnedEvents {
        counts,
        flux,
        excluded,
        above_range,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acceptance::CosZenithHistogram;
    use approx::assert_relative_eq;
    use std::fs;
    use tempfile::TempDir;

    fn model() -> AcceptanceModel {
        let binning = EnergyBinning::new(vec![2.0, 3.0, 4.0]).unwrap();
        let histogram = CosZenithHistogram::from_centers(&[-0.5, 0.5], &[1.0, 1.0]).unwrap();
        // Downgoing half (cos z > 0) has no area in bin 1
        AcceptanceModel::new(
            binning,
            vec![vec![2.0, 4.0], vec![5.0, 0.0]],
            vec![histogram.clone(), histogram],
            vec![10.0, 10.0],
        )
        .unwrap()
    }

    fn event(log_energy: f64, dec_deg: f64, zenith_deg: f64) -> Event {
        Event {
            log_energy,
            ra_deg: 45.0,
            dec_deg,
            zenith_deg,
        }
    }

    #[test]
    fn test_counts_and_flux() {
        let acceptance = model();
        let grid = SkyGrid::new(2).unwrap();
        let events = vec![
            event(2.5, 30.0, 120.0),
            event(2.5, 30.0, 120.0),
            event(3.5, -30.0, 120.0),
        ];
        let binned = bin_events(&events, &acceptance, &grid, acceptance.binning()).unwrap();

        assert_eq!(binned.counts.row(0).sum(), 2.0);
        assert_eq!(binned.counts.row(1).sum(), 1.0);
        // cos(120°) < 0 selects the first cell of bin 0
        assert_relative_eq!(binned.flux.row(0).sum(), 1.0);
        assert_relative_eq!(binned.flux.row(1).sum(), 0.2);
        assert!(binned.excluded.is_empty());
    }

    #[test]
    fn test_below_first_edge_goes_to_bin_zero() {
        let acceptance = model();
        let grid = SkyGrid::new(2).unwrap();
        let events = vec![event(1.2, 0.0, 100.0), event(4.5, 0.0, 100.0)];
        let binned = bin_events(&events, &acceptance, &grid, acceptance.binning()).unwrap();
        assert_eq!(binned.counts.row(0).sum(), 1.0);
        assert_eq!(binned.above_range, 1);
    }

    #[test]
    fn test_zero_area_exclusion_rule() {
        let binning = EnergyBinning::new(vec![2.0, 3.0]).unwrap();
        let histogram = CosZenithHistogram::from_centers(&[-0.5, 0.5], &[1.0, 1.0]).unwrap();
        // No area anywhere in the upgoing half
        let acceptance = AcceptanceModel::new(
            binning,
            vec![vec![0.0, 3.0]],
            vec![histogram],
            vec![10.0],
        )
        .unwrap();
        let grid = SkyGrid::new(2).unwrap();

        let beyond_horizon = event(2.5, 10.0, 100.0);
        let events = vec![beyond_horizon, event(2.5, -10.0, 80.0)];
        let binned = bin_events(&events, &acceptance, &grid, acceptance.binning()).unwrap();
        assert_eq!(binned.excluded, vec![beyond_horizon]);
        assert_eq!(binned.counts.sum(), 1.0);

        // Zero area at zenith under 90° still counts, without flux
        let area_free = AcceptanceModel::new(
            EnergyBinning::new(vec![2.0, 3.0]).unwrap(),
            vec![vec![3.0, 0.0]],
            vec![CosZenithHistogram::from_centers(&[-0.5, 0.5], &[1.0, 1.0]).unwrap()],
            vec![10.0],
        )
        .unwrap();
        let binned =
            bin_events(&[event(2.5, -10.0, 30.0)], &area_free, &grid, area_free.binning()).unwrap();
        assert_eq!(binned.counts.sum(), 1.0);
        assert_eq!(binned.flux.sum(), 0.0);
        assert!(binned.excluded.is_empty());
    }

    #[test]
    fn test_read_events() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.txt");
        fs::write(&path, "# logE ra dec zen\n2.5 10.0 -20.0 70.0\n3.1, 200.0, 45.0, 135.0\n").unwrap();
        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].zenith_deg, 135.0);

        fs::write(&path, "2.5 10.0 -20.0\n").unwrap();
        assert!(matches!(read_events(&path), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_binning_mismatch() {
        let acceptance = model();
        let grid = SkyGrid::new(1).unwrap();
        let other = EnergyBinning::new(vec![2.0, 3.0]).unwrap();
        assert!(matches!(
            bin_events(&[], &acceptance, &grid, &other),
            Err(Error::Configuration(_))
        ));
    }
}
