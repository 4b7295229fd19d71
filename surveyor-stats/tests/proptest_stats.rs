//! Property-based tests for the sampling and projection engines.

use proptest::prelude::*;

use surveyor_stats::projections::{MonteCarloConfig, ProjectionInput, run_monte_carlo, win_probabilities};
use surveyor_stats::sampling::DEFAULT_TOLERANCE;
use surveyor_stats::{
    ProfileRecord, SamplingEngine, SamplingMethod, SamplingRequest, SelectedSample,
    calculate_sample_size, validate_representativeness,
};

fn stratified_population(strata: usize, per_stratum: usize) -> Vec<ProfileRecord> {
    (0..strata * per_stratum)
        .map(|i| {
            ProfileRecord::new()
                .with("id", format!("p{i}"))
                .with("region", format!("r{}", i % strata))
        })
        .collect()
}

fn confidence() -> impl Strategy<Value = f64> {
    prop_oneof![Just(0.90), Just(0.95), Just(0.99)]
}

// --- Sample size properties ---

proptest! {
    #[test]
    fn sample_size_within_population(
        population in 1usize..200_000,
        confidence in confidence(),
        margin in 0.005f64..0.25,
    ) {
        let n = calculate_sample_size(population, confidence, margin, 0.5);
        prop_assert!(n >= 1);
        prop_assert!(n <= population);
    }

    #[test]
    fn sample_size_shrinks_as_margin_grows(
        population in 1usize..200_000,
        confidence in confidence(),
        tight in 0.005f64..0.10,
        extra in 0.0f64..0.10,
    ) {
        let loose = tight + extra;
        prop_assert!(
            calculate_sample_size(population, confidence, tight, 0.5)
                >= calculate_sample_size(population, confidence, loose, 0.5)
        );
    }

    #[test]
    fn sample_size_grows_with_confidence(
        population in 1usize..200_000,
        margin in 0.01f64..0.10,
    ) {
        let n90 = calculate_sample_size(population, 0.90, margin, 0.5);
        let n95 = calculate_sample_size(population, 0.95, margin, 0.5);
        let n99 = calculate_sample_size(population, 0.99, margin, 0.5);
        prop_assert!(n90 <= n95);
        prop_assert!(n95 <= n99);
    }
}

// --- Selection properties ---

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn stratified_selection_is_exact_and_covers_strata(
        strata in 1usize..6,
        per_stratum in 5usize..40,
        fraction in 0.0f64..1.0,
        seed in any::<u64>(),
    ) {
        let population = stratified_population(strata, per_stratum);
        let span = population.len() - strata;
        let n = strata + (fraction * span as f64) as usize;
        let request = SamplingRequest::new(SamplingMethod::StratifiedProportional, n)
            .with_variables(["region"]);

        let mut engine = SamplingEngine::with_seed(seed);
        let (strategy, sample) = engine.select(&population, &request).unwrap();

        prop_assert_eq!(sample.len(), n);
        prop_assert_eq!(strategy.sample_size, n);
        let distribution = sample.distribution("region").unwrap();
        prop_assert_eq!(distribution.len(), strata);
    }

    #[test]
    fn selected_ids_are_unique(
        size in 1usize..300,
        n in 1usize..300,
        seed in any::<u64>(),
    ) {
        let population = stratified_population(1, size);
        let mut engine = SamplingEngine::with_seed(seed);
        let request = SamplingRequest::new(SamplingMethod::SimpleRandom, n);
        let (_, sample) = engine.select(&population, &request).unwrap();
        let mut ids = sample.ids();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(ids.len(), n.min(size));
    }

    #[test]
    fn representativeness_is_pure(
        strata in 1usize..5,
        per_stratum in 2usize..30,
        n in 1usize..60,
        seed in any::<u64>(),
    ) {
        let population = stratified_population(strata, per_stratum);
        let variables = vec!["region".to_string()];
        let mut engine = SamplingEngine::with_seed(seed);
        let indices = engine.simple_random(&population, n);
        let sample = SelectedSample::from_indices(&population, &indices, &variables);

        let first = validate_representativeness(&sample, &population, &variables, DEFAULT_TOLERANCE);
        let second = validate_representativeness(&sample, &population, &variables, DEFAULT_TOLERANCE);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn census_is_always_representative(
        strata in 1usize..6,
        per_stratum in 1usize..30,
    ) {
        let population = stratified_population(strata, per_stratum);
        let variables = vec!["region".to_string()];
        let indices: Vec<usize> = (0..population.len()).collect();
        let sample = SelectedSample::from_indices(&population, &indices, &variables);
        let report = validate_representativeness(&sample, &population, &variables, 0.0);
        prop_assert!(report.represents_population);
    }
}

// --- Projection properties ---

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn win_probabilities_form_a_distribution(
        shares in prop::collection::vec(0.0f64..60.0, 2..6),
        margin in 0.5f64..6.0,
    ) {
        let probs = win_probabilities(&shares, margin);
        prop_assert_eq!(probs.len(), shares.len());
        prop_assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        prop_assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn monte_carlo_outcomes_account_for_every_trial(
        a in 10.0f64..60.0,
        b in 10.0f64..40.0,
        undecided in 0.0f64..20.0,
        seed in any::<u64>(),
    ) {
        let input = ProjectionInput::new([("A", a), ("B", b), ("C", 100.0 - a - b - undecided)], 0.03, undecided);
        let config = MonteCarloConfig { trials: 200, seed: Some(seed) };
        let result = run_monte_carlo(&input, &config).unwrap();
        let total: f64 = result.candidates.iter().map(|c| c.win_probability).sum::<f64>()
            + result.runoff_probability;
        prop_assert!((total - 100.0).abs() < 1e-6);
    }
}
