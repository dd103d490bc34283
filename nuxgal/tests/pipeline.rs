mod common;

use approx::assert_relative_eq;
use common::{Fixture, DEPTH};
use nuxgal::algo::{trial_seed, SeedStream};
use nuxgal::config::PowerLawRange;
use nuxgal::events::{bin_events, Event};
use nuxgal::{io, CrossCorrelator, GalaxyTemplate, Mask, SignalSource, SkyGrid, TrialHypothesis};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn test_calibration_directory_loads() {
    let fixture = Fixture::new(vec![2000.0, 300.0]);
    let inputs = fixture.inputs();
    let acceptance = inputs.generator.acceptance();

    assert_eq!(acceptance.n_bins(), 2);
    // Columns 1.9 and 2.85 m² averaged in the lowest cos-zenith cell
    assert_relative_eq!(acceptance.effective_area(0, -0.95).unwrap(), 2.375, epsilon = 1e-12);
    assert_eq!(acceptance.effective_area(0, 0.5).unwrap(), 0.0);
    assert_eq!(acceptance.expected_counts_per_year(), &[2000.0, 300.0]);
    assert!(inputs.generator.astro_counts_per_year().iter().all(|&n| n > 0.0));
    assert!(inputs.mask.sky_fraction() > 0.4 && inputs.mask.sky_fraction() < 0.7);
}

#[test]
fn test_synthetic_pixel_sums_are_exact() {
    let fixture = Fixture::new(vec![2000.0, 300.0]);
    let inputs = fixture.inputs();

    for (seed, source) in [(1, SignalSource::Galaxy), (2, SignalSource::Unrelated)] {
        let mut rng = StdRng::seed_from_u64(seed);
        let maps = inputs
            .generator
            .synthetic_data(1.0, source, &inputs.template, 0.3, &mut rng)
            .unwrap();
        for bin in 0..2 {
            assert_eq!(maps.counts.row(bin).sum(), maps.totals[bin] as f64);
        }
        assert!(maps.counts.iter().all(|&c| c >= 0.0 && c.fract() == 0.0));
    }
}

#[test]
fn test_single_null_trial_with_uniform_template() {
    let _ = env_logger::builder().is_test(true).try_init();
    let fixture = Fixture::new(vec![500.0]);
    let inputs = fixture.inputs();
    let grid = inputs.generator.grid();
    let correlator =
        CrossCorrelator::new(grid, inputs.mask.clone(), &GalaxyTemplate::uniform(grid)).unwrap();

    let stats = correlator
        .background_null_statistics(&inputs.generator, 1.0, 1, 7, None)
        .unwrap();
    assert_eq!(stats.n_trials, 1);
    assert!(stats.std.iter().all(|&s| s == 0.0));
    assert!(stats.mean.iter().all(|&m| m.abs() < 1e-10));
    assert!(stats.reference_counts[0] > 0.0);
}

#[test]
fn test_cross_correlation_properties_on_generated_maps() {
    let fixture = Fixture::new(vec![1500.0]);
    let inputs = fixture.inputs();
    let grid = inputs.generator.grid();
    let correlator = CrossCorrelator::new(grid, inputs.mask.clone(), &inputs.template).unwrap();

    let mut rng = StdRng::seed_from_u64(3);
    let a = inputs.generator.generate_background_map(1.0, &mut rng).unwrap().into_counts();
    let b = inputs.generator.generate_background_map(1.0, &mut rng).unwrap().into_counts();

    let ab = correlator.cross_correlation(a.row(0), b.row(0)).unwrap();
    let ba = correlator.cross_correlation(b.row(0), a.row(0)).unwrap();
    for (x, y) in ab.iter().zip(&ba) {
        assert_relative_eq!(x, y, epsilon = 1e-12);
    }
    let auto = correlator.cross_correlation(a.row(0), a.row(0)).unwrap();
    assert!(auto[0] >= 0.0);
}

#[test]
fn test_synthetic_map_round_trip() {
    let fixture = Fixture::new(vec![800.0, 80.0]);
    let inputs = fixture.inputs();
    let mut rng = StdRng::seed_from_u64(5);
    let maps = inputs
        .generator
        .synthetic_data(1.0, SignalSource::Galaxy, &inputs.template, 1.0, &mut rng)
        .unwrap()
        .into_counts();

    let out = fixture.dir.path().join("maps");
    io::write_maps(&out, "syntheticData{i}.txt", &maps).unwrap();
    let back = io::read_maps(&out, "syntheticData{i}.txt", 2, inputs.generator.grid()).unwrap();
    assert_eq!(back, maps);
}

#[test]
fn test_binned_events_land_in_their_pixels() {
    let fixture = Fixture::new(vec![100.0]);
    let inputs = fixture.inputs();
    let grid = SkyGrid::new(DEPTH).unwrap();
    let acceptance = inputs.generator.acceptance();

    let events: Vec<Event> = (0..grid.npix())
        .step_by(7)
        .map(|p| {
            let (lon, lat) = grid.center(p);
            Event {
                log_energy: 2.5,
                ra_deg: lon.to_degrees(),
                dec_deg: lat.to_degrees(),
                zenith_deg: 90.0 + lat.to_degrees(),
            }
        })
        .collect();
    let binned = bin_events(&events, acceptance, &grid, acceptance.binning()).unwrap();

    // Downgoing events without effective area are still counted
    let kept = binned.counts.sum() as usize;
    assert_eq!(kept + binned.excluded.len(), events.len());
    assert!(binned.excluded.is_empty());
    for p in (0..grid.npix()).step_by(7) {
        assert_eq!(binned.counts[[0, p]], 1.0);
    }

    let masked = Mask::below_declination(&grid, -5.0);
    let mut counts = binned.counts.clone();
    masked.apply_to_maps(&mut counts).unwrap();
    assert!(counts.sum() < binned.counts.sum());
}

#[test]
fn test_power_law_signal_respects_configured_range() {
    let mut fixture = Fixture::new(vec![2000.0, 300.0]);
    // Every energy lands in the first decade, i.e. bin 0
    fixture.config.power_law = PowerLawRange::new(1e2, 1e3).unwrap();
    let inputs = fixture.inputs();

    let mut rng = StdRng::seed_from_u64(5);
    let maps = inputs
        .generator
        .generate_power_law_signal_map(
            2000,
            &inputs.template,
            -2.0,
            &fixture.config.power_law,
            &mut rng,
        )
        .unwrap();
    assert_eq!(maps.totals[1], 0);
    assert!(maps.totals[0] > 1500, "{:?}", maps.totals);
    assert_eq!(maps.counts.row(0).sum(), maps.totals[0] as f64);
}

#[test]
fn test_background_trials_never_replay_null_maps() {
    let fixture = Fixture::new(vec![50.0]);
    let inputs = fixture.inputs();
    let seed = fixture.config.seed;

    let trial_maps: Vec<_> = (0..20)
        .map(|i| {
            let trial = TrialHypothesis::Background.trial_seed(seed, i);
            let mut rng = StdRng::seed_from_u64(trial);
            inputs
                .generator
                .synthetic_data(1.0, SignalSource::Unrelated, &inputs.template, 0.0, &mut rng)
                .unwrap()
                .counts
        })
        .collect();

    let null_base = SeedStream::BackgroundNull.base(seed);
    for k in 0..300 {
        let mut rng = StdRng::seed_from_u64(trial_seed(null_base, k));
        let null = inputs.generator.generate_background_map(1.0, &mut rng).unwrap().counts;
        assert!(trial_maps.iter().all(|m| *m != null), "null draw {k} replayed");
    }
}
