use criterion::{Criterion, black_box, criterion_group, criterion_main};
use surveyor_stats::projections::{MonteCarloConfig, ProjectionInput, build_scenarios, run_monte_carlo};
use surveyor_stats::{
    ProfileRecord, SamplingEngine, SamplingMethod, SamplingRequest, StatisticalEngine,
    calculate_sample_size,
};

fn population(size: usize) -> Vec<ProfileRecord> {
    (0..size)
        .map(|i| {
            ProfileRecord::new()
                .with("id", format!("p{i}"))
                .with("region", ["north", "south", "east", "west"][i % 4])
                .with("age_group", ["18-29", "30-44", "45-64", "65+"][(i / 4) % 4])
                .with("income", (i % 97) as f64 * 1_000.0)
        })
        .collect()
}

fn bench_sample_size(c: &mut Criterion) {
    c.bench_function("calculate_sample_size", |b| {
        b.iter(|| calculate_sample_size(black_box(1_000_000), 0.95, 0.03, 0.5))
    });
}

fn bench_selection(c: &mut Criterion) {
    let records = population(10_000);

    c.bench_function("select_simple_random_10k", |b| {
        let mut engine = SamplingEngine::with_seed(1);
        let request = SamplingRequest::new(SamplingMethod::SimpleRandom, 400);
        b.iter(|| engine.select(black_box(&records), &request))
    });

    c.bench_function("select_stratified_composite_10k", |b| {
        let mut engine = SamplingEngine::with_seed(1);
        let request = SamplingRequest::new(SamplingMethod::StratifiedProportional, 400)
            .with_variables(["region", "age_group"]);
        b.iter(|| engine.select(black_box(&records), &request))
    });

    c.bench_function("select_stratified_optimal_10k", |b| {
        let mut engine = SamplingEngine::with_seed(1);
        let request = SamplingRequest::new(SamplingMethod::StratifiedOptimal, 400)
            .with_variables(["region"])
            .with_optimal_variable("income");
        b.iter(|| engine.select(black_box(&records), &request))
    });
}

fn bench_inference(c: &mut Criterion) {
    let engine = StatisticalEngine::new();
    let x: Vec<f64> = (0..1_000).map(|i| i as f64).collect();
    let y: Vec<f64> = x.iter().map(|v| v * 0.5 + (v % 7.0)).collect();

    c.bench_function("pearson_correlation_1k", |b| {
        b.iter(|| engine.pearson_correlation(black_box(&x), black_box(&y)))
    });
}

fn bench_projections(c: &mut Criterion) {
    let input = ProjectionInput::new(
        [("Alvarez", 38.0), ("Becker", 31.0), ("Chen", 19.0)],
        0.03,
        12.0,
    );

    c.bench_function("build_scenarios", |b| b.iter(|| build_scenarios(black_box(&input))));

    let config = MonteCarloConfig {
        trials: 10_000,
        seed: Some(7),
    };
    c.bench_function("monte_carlo_10k_trials", |b| {
        b.iter(|| run_monte_carlo(black_box(&input), &config))
    });
}

criterion_group!(
    benches,
    bench_sample_size,
    bench_selection,
    bench_inference,
    bench_projections,
);
criterion_main!(benches);
