mod common;

use common::Fixture;
use nuxgal::io;
use nuxgal::likelihood::{FitOptions, Observation, SamplerOptions};
use nuxgal::sims::{run_trial, run_ts_batch, TrialContext, TrialHypothesis};
use nuxgal::{GalaxyTemplate, SignalSource};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn calibrated(expected_counts: Vec<f64>) -> (Fixture, TrialContext) {
    let _ = env_logger::builder().is_test(true).try_init();
    let fixture = Fixture::new(expected_counts);
    let context = fixture
        .inputs()
        .into_trial_context(&fixture.config, None)
        .unwrap();
    (fixture, context)
}

fn observe(context: &TrialContext, source: SignalSource, f_diff: f64, seed: u64) -> Observation {
    let mut rng = StdRng::seed_from_u64(seed);
    let maps = context
        .generator
        .synthetic_data(1.0, source, &context.template, f_diff, &mut rng)
        .unwrap();
    context.observe(maps.into_counts()).unwrap()
}

#[test]
fn test_true_fraction_beats_misspecified_on_average() {
    let (_fixture, context) = calibrated(vec![2000.0]);
    let n_atm = context.generator.acceptance().expected_counts_per_year()[0];
    let n_astro = context.generator.astro_counts_per_year()[0];
    // Inject half of the events as signal
    let f_diff = 0.5 * n_atm / n_astro;
    let truth = context.generator.astro_fraction(f_diff)[0];
    assert!((truth - 0.5).abs() < 1e-12);

    let (mut at_truth, mut at_zero, mut at_one) = (0.0, 0.0, 0.0);
    for seed in 0..5 {
        let obs = observe(&context, SignalSource::Galaxy, f_diff, 100 + seed);
        let range = context.fit_range(&obs).unwrap();
        let lnl = |f: f64| context.likelihood.log_likelihood(&[f], &obs, &range).unwrap();
        at_truth += lnl(truth);
        at_zero += lnl(0.0);
        at_one += lnl(1.0);
    }
    assert!(at_truth > at_zero);
    assert!(at_truth > at_one);
}

#[test]
fn test_fit_is_idempotent() {
    let (_fixture, context) = calibrated(vec![2000.0, 300.0]);
    let obs = observe(&context, SignalSource::Galaxy, 0.2, 9);
    let range = context.fit_range(&obs).unwrap();
    assert_eq!(range.ebin_max, 2);

    let options = FitOptions::default();
    let first = context.likelihood.fit(&obs, &range, &options).unwrap();
    let second = context.likelihood.fit(&obs, &range, &options).unwrap();
    assert_eq!(first, second);
    assert!(first.fractions.iter().all(|f| (0.0..=1.0).contains(f)));
    assert!(first.test_statistic >= 0.0);
}

#[test]
fn test_background_only_fits_near_zero() {
    let (_fixture, context) = calibrated(vec![2000.0]);
    for seed in [11, 12, 13] {
        let outcome = run_trial(&context, TrialHypothesis::Background, seed).unwrap();
        assert!(outcome.fit.fractions[0] < 0.25, "seed {seed}: {:?}", outcome.fit);
        assert!(outcome.fit.test_statistic < 12.0, "seed {seed}: {:?}", outcome.fit);
    }
}

#[test]
fn test_uniform_template_background_fit_is_null() {
    let _ = env_logger::builder().is_test(true).try_init();
    let fixture = Fixture::new(vec![1000.0; 3]);
    let mut inputs = fixture.inputs();
    inputs.template = GalaxyTemplate::uniform(inputs.generator.grid());
    let context = inputs.into_trial_context(&fixture.config, None).unwrap();

    for i in 0..5 {
        let seed = TrialHypothesis::Background.trial_seed(fixture.config.seed, i);
        let outcome = run_trial(&context, TrialHypothesis::Background, seed).unwrap();
        assert_eq!(outcome.range.ebin_max, 3);
        assert!(outcome.counts.iter().all(|&n| n > 0.0));
        assert!(
            outcome.fit.fractions.iter().all(|&f| f < 0.05),
            "trial {i}: {:?}",
            outcome.fit
        );
        assert!(outcome.fit.test_statistic < 0.1, "trial {i}: {:?}", outcome.fit);
    }
}

#[test]
fn test_signal_on_template_exceeds_background_distribution() {
    let (fixture, context) = calibrated(vec![2000.0]);
    let seed = fixture.config.seed;

    let background = run_ts_batch(&context, TrialHypothesis::Background, 120, seed, None).unwrap();
    assert_eq!(background.values.len(), 120);
    assert_eq!(background.failed, 0);
    assert!(background.warning.is_none());
    let threshold = background.percentile(95.0).unwrap();
    io::text::write_values(
        &test_helpers::output_path("TS_atm_fixture.txt"),
        &background.values,
    )
    .unwrap();

    let signal = run_ts_batch(&context, TrialHypothesis::SignalOnTemplate, 3, seed, None).unwrap();
    for ts in &signal.values {
        assert!(*ts > threshold, "signal TS {ts} vs background p95 {threshold}");
    }
    let first = TrialHypothesis::SignalOnTemplate.trial_seed(seed, 0);
    let outcome = run_trial(&context, TrialHypothesis::SignalOnTemplate, first).unwrap();
    assert!(outcome.fit.fractions[0] > 0.8, "{:?}", outcome.fit);
    assert_eq!(outcome.fit.test_statistic, signal.values[0]);

    let significance = background.significance_above(signal.values[0]).unwrap();
    assert!(significance.empirical_p_value < 0.05);
    assert!(significance.sigma > 3.0);
}

#[test]
fn test_posterior_brackets_the_fit() {
    let (_fixture, context) = calibrated(vec![2000.0]);
    let obs = observe(&context, SignalSource::Galaxy, 1.0, 21);
    let range = context.fit_range(&obs).unwrap();
    let fit = context.likelihood.fit(&obs, &range, &FitOptions::default()).unwrap();

    let options = SamplerOptions {
        seed: 4,
        ..SamplerOptions::default()
    };
    let chain = context
        .likelihood
        .sample_chain(&obs, &range, 8, 200, &options)
        .unwrap();
    assert_eq!(chain.samples.dim(), (8, 200, 1));
    assert!(chain.samples.iter().all(|f| (0.0..=1.0).contains(f)));

    let summary = chain.summary(50).unwrap();
    assert!(summary[0].p16 <= summary[0].median && summary[0].median <= summary[0].p84);
    assert!((summary[0].median - fit.fractions[0]).abs() < 0.2);
}
