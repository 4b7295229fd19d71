//! Electoral projections: deterministic scenarios and Monte Carlo simulation.
//!
//! Shares and the undecided share are percentages (0–100); the margin of
//! error is a fraction (0.03 = 3 points).

use crate::descriptive::percentile;
use crate::error::StatsError;
use crate::inference::ConfidenceInterval;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use tracing::debug;

/// Default number of Monte Carlo trials.
pub const DEFAULT_TRIALS: usize = 10_000;

/// Share above which a simulated trial is an outright win.
pub const OUTRIGHT_THRESHOLD: f64 = 50.0;

const MAX_WIN_PROBABILITY: f64 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    Optimistic,
    Realistic,
    Pessimistic,
    MaxVolatility,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 4] = [
        Self::Optimistic,
        Self::Realistic,
        Self::Pessimistic,
        Self::MaxVolatility,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Optimistic => "optimistic",
            Self::Realistic => "realistic",
            Self::Pessimistic => "pessimistic",
            Self::MaxVolatility => "max-volatility",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate's current declared share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateShare {
    pub candidate: String,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionInput {
    pub candidates: Vec<CandidateShare>,
    pub margin_of_error: f64,
    pub undecided_percent: f64,
}

impl ProjectionInput {
    pub fn new<S: Into<String>>(
        shares: impl IntoIterator<Item = (S, f64)>,
        margin_of_error: f64,
        undecided_percent: f64,
    ) -> Self {
        Self {
            candidates: shares
                .into_iter()
                .map(|(c, share)| CandidateShare {
                    candidate: c.into(),
                    share,
                })
                .collect(),
            margin_of_error,
            undecided_percent,
        }
    }

    fn margin_points(&self) -> f64 {
        self.margin_of_error.max(0.0) * 100.0
    }

    fn undecided(&self) -> f64 {
        self.undecided_percent.max(0.0)
    }

    /// Candidate indices ordered by current share, highest first.
    fn ranking(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.candidates.len()).collect();
        order.sort_by(|&a, &b| {
            self.candidates[b]
                .share
                .total_cmp(&self.candidates[a].share)
        });
        order
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateProjection {
    pub candidate: String,
    pub current_share: f64,
    pub projected_share: f64,
    /// `projected_share ± margin`, clamped to [0, 100]. Centred on the
    /// scenario's projection rather than the current share, so it moves
    /// with the redistributed undecided vote.
    pub confidence_interval: ConfidenceInterval,
    /// Probability in [0, 1].
    pub win_probability: f64,
}

/// One named scenario. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionScenario {
    pub kind: ScenarioKind,
    /// Candidates ordered by projected share, highest first.
    pub candidates: Vec<CandidateProjection>,
    pub assumptions: Vec<String>,
}

impl ProjectionScenario {
    pub fn leader(&self) -> Option<&CandidateProjection> {
        self.candidates.first()
    }

    pub fn candidate(&self, name: &str) -> Option<&CandidateProjection> {
        self.candidates.iter().find(|c| c.candidate == name)
    }
}

/// Build the four named scenarios.
pub fn build_scenarios(input: &ProjectionInput) -> Result<Vec<ProjectionScenario>, StatsError> {
    if input.candidates.is_empty() {
        return Err(StatsError::EmptyInput {
            what: "candidate shares".into(),
        });
    }
    Ok(ScenarioKind::ALL
        .into_iter()
        .map(|kind| build_scenario(input, kind))
        .collect())
}

fn build_scenario(input: &ProjectionInput, kind: ScenarioKind) -> ProjectionScenario {
    let ranking = input.ranking();
    let k = ranking.len();
    let u = input.undecided();
    let m = input.margin_points();
    let mut projected: Vec<f64> = input.candidates.iter().map(|c| c.share).collect();
    let leader = ranking[0];
    let runner_up = ranking.get(1).copied();

    let leader_name = &input.candidates[leader].candidate;
    let runner_name = runner_up.map(|i| input.candidates[i].candidate.as_str());

    let realistic = |projected: &mut Vec<f64>| {
        let total: f64 = input.candidates.iter().map(|c| c.share.max(0.0)).sum();
        for (i, c) in input.candidates.iter().enumerate() {
            projected[i] += if total > 0.0 {
                u * c.share.max(0.0) / total
            } else {
                u / k as f64
            };
        }
    };

    let assumptions = match (kind, runner_up) {
        (ScenarioKind::Optimistic, _) => {
            if k > 1 {
                projected[leader] += 0.6 * u;
                for &i in &ranking[1..] {
                    projected[i] += 0.4 * u / (k - 1) as f64;
                }
            } else {
                projected[leader] += u;
            }
            projected[leader] += m;
            vec![
                format!("60% of undecided voters ({:.1} pts) move to {leader_name}", 0.6 * u),
                "Remaining 40% of undecided voters split evenly among other candidates".into(),
                format!("{leader_name} gains the full margin of error (+{m:.1} pts)"),
            ]
        }
        (ScenarioKind::Realistic, _) | (_, None) => {
            realistic(&mut projected);
            vec![
                "Undecided voters break in proportion to current declared shares".into(),
                format!("Undecided share: {u:.1}%"),
            ]
        }
        (ScenarioKind::Pessimistic, Some(second)) => {
            projected[second] += 0.7 * u;
            for &i in ranking.iter().filter(|&&i| i != second) {
                projected[i] += 0.3 * u / (k - 1) as f64;
            }
            projected[leader] -= m;
            vec![
                format!(
                    "70% of undecided voters ({:.1} pts) move to {}",
                    0.7 * u,
                    runner_name.unwrap_or_default()
                ),
                "Remaining 30% of undecided voters split evenly among the rest".into(),
                format!("{leader_name} loses the full margin of error (-{m:.1} pts)"),
            ]
        }
        (ScenarioKind::MaxVolatility, Some(second)) => {
            projected[second] += u;
            vec![
                format!(
                    "All undecided voters ({u:.1} pts) move to {}",
                    runner_name.unwrap_or_default()
                ),
                "Stress test: maximum late swing against the leader".into(),
            ]
        }
    };

    for share in &mut projected {
        *share = share.max(0.0);
    }
    let probabilities = win_probabilities(&projected, m);

    let mut candidates: Vec<CandidateProjection> = input
        .candidates
        .iter()
        .enumerate()
        .map(|(i, c)| CandidateProjection {
            candidate: c.candidate.clone(),
            current_share: c.share,
            projected_share: projected[i],
            confidence_interval: ConfidenceInterval {
                lower: (projected[i] - m).clamp(0.0, 100.0),
                upper: (projected[i] + m).clamp(0.0, 100.0),
                level: 0.95,
            },
            win_probability: probabilities[i],
        })
        .collect();
    candidates.sort_by(|a, b| b.projected_share.total_cmp(&a.projected_share));

    ProjectionScenario {
        kind,
        candidates,
        assumptions,
    }
}

/// Approximate win probabilities from the leader's gap in margin multiples.
///
/// - gap > 2m: at least 0.90
/// - gap > m: in [0.70, 0.90)
/// - otherwise: `0.5 + 0.2 · gap/m`, so a dead heat is 0.5 and the band tops out at 0.70
///
/// Trailing candidates share the complement, weighted by `1 / (1 + d/m)`
/// where `d` is their distance from the leader.
pub fn win_probabilities(shares: &[f64], margin_points: f64) -> Vec<f64> {
    let k = shares.len();
    if k == 0 {
        return Vec::new();
    }
    if k == 1 {
        return vec![1.0];
    }
    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| shares[b].total_cmp(&shares[a]));
    let leader = order[0];
    let gap = shares[leader] - shares[order[1]];
    let m = margin_points.max(f64::EPSILON);

    let leader_p = if gap > 2.0 * m {
        (0.90 + 0.09 * ((gap - 2.0 * m) / (2.0 * m)).min(1.0)).min(MAX_WIN_PROBABILITY)
    } else if gap > m {
        0.70 + 0.19 * (gap - m) / m
    } else {
        0.50 + 0.20 * gap / m
    };

    let remaining = 1.0 - leader_p;
    let weights: Vec<f64> = order[1..]
        .iter()
        .map(|&i| 1.0 / (1.0 + (shares[leader] - shares[i]) / m))
        .collect();
    let weight_total: f64 = weights.iter().sum();

    let mut probabilities = vec![0.0; k];
    probabilities[leader] = leader_p;
    for (&i, w) in order[1..].iter().zip(&weights) {
        probabilities[i] = if weight_total > 0.0 {
            remaining * w / weight_total
        } else {
            remaining / (k - 1) as f64
        };
    }
    probabilities
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    pub trials: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            trials: DEFAULT_TRIALS,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileSummary {
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub mean: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSimulation {
    pub candidate: String,
    /// Outright wins as a percentage of all trials.
    pub win_probability: f64,
    /// Percentage of trials in which the candidate finished top two without an outright winner.
    pub runoff_appearance: f64,
    pub percentiles: PercentileSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloResult {
    pub trials: usize,
    pub candidates: Vec<CandidateSimulation>,
    /// Percentage of trials without an outright winner.
    pub runoff_probability: f64,
}

impl MonteCarloResult {
    pub fn candidate(&self, name: &str) -> Option<&CandidateSimulation> {
        self.candidates.iter().find(|c| c.candidate == name)
    }
}

/// Standard normal draw via Box–Muller.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Perturb, renormalize, and tally winners over `config.trials` trials.
pub fn run_monte_carlo(
    input: &ProjectionInput,
    config: &MonteCarloConfig,
) -> Result<MonteCarloResult, StatsError> {
    if input.candidates.is_empty() {
        return Err(StatsError::EmptyInput {
            what: "candidate shares".into(),
        });
    }
    if config.trials == 0 {
        return Err(StatsError::EmptyInput {
            what: "Monte Carlo trials".into(),
        });
    }

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let k = input.candidates.len();
    let sd = input.margin_points() / 2.0;
    let undecided = input.undecided();

    let mut wins = vec![0usize; k];
    let mut runoff_appearances = vec![0usize; k];
    let mut runoffs = 0usize;
    let mut samples: Vec<Vec<f64>> = vec![Vec::with_capacity(config.trials); k];
    let mut trial = vec![0.0; k];

    for _ in 0..config.trials {
        for (value, c) in trial.iter_mut().zip(&input.candidates) {
            let noise = if sd > 0.0 {
                standard_normal(&mut rng) * sd
            } else {
                0.0
            };
            let bonus = if undecided > 0.0 {
                rng.gen_range(0.0..undecided)
            } else {
                0.0
            };
            *value = (c.share + noise + bonus).max(0.0);
        }
        let total: f64 = trial.iter().sum();
        for value in &mut trial {
            *value = if total > 0.0 {
                *value / total * 100.0
            } else {
                100.0 / k as f64
            };
        }

        let mut order: Vec<usize> = (0..k).collect();
        order.sort_by(|&a, &b| trial[b].total_cmp(&trial[a]));
        let winner = order[0];
        if trial[winner] > OUTRIGHT_THRESHOLD {
            wins[winner] += 1;
        } else {
            runoffs += 1;
            for &i in order.iter().take(2) {
                runoff_appearances[i] += 1;
            }
        }
        for (i, value) in trial.iter().enumerate() {
            samples[i].push(*value);
        }
    }

    let n = config.trials as f64;
    let candidates = input
        .candidates
        .iter()
        .zip(samples)
        .enumerate()
        .map(|(i, (c, mut values))| {
            values.sort_by(f64::total_cmp);
            let mean = values.iter().sum::<f64>() / n;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let pct = |p: f64| percentile(&values, p).unwrap_or(0.0);
            CandidateSimulation {
                candidate: c.candidate.clone(),
                win_probability: wins[i] as f64 / n * 100.0,
                runoff_appearance: runoff_appearances[i] as f64 / n * 100.0,
                percentiles: PercentileSummary {
                    p5: pct(5.0),
                    p25: pct(25.0),
                    p50: pct(50.0),
                    p75: pct(75.0),
                    p95: pct(95.0),
                    mean,
                    std_dev: variance.sqrt(),
                },
            }
        })
        .collect();

    debug!(trials = config.trials, runoffs, "Monte Carlo simulation complete");
    Ok(MonteCarloResult {
        trials: config.trials,
        candidates,
        runoff_probability: runoffs as f64 / n * 100.0,
    })
}

/// Scenario builder and simulator handed to the coordinator.
#[derive(Debug, Clone, Default)]
pub struct ProjectionEngine {
    monte_carlo: MonteCarloConfig,
}

impl ProjectionEngine {
    pub fn new(monte_carlo: MonteCarloConfig) -> Self {
        Self { monte_carlo }
    }

    pub fn monte_carlo_config(&self) -> &MonteCarloConfig {
        &self.monte_carlo
    }

    pub fn scenarios(&self, input: &ProjectionInput) -> Result<Vec<ProjectionScenario>, StatsError> {
        build_scenarios(input)
    }

    pub fn simulate(&self, input: &ProjectionInput) -> Result<MonteCarloResult, StatsError> {
        run_monte_carlo(input, &self.monte_carlo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(undecided: f64) -> ProjectionInput {
        ProjectionInput::new([("A", 45.0), ("B", 35.0), ("C", 20.0)], 0.03, undecided)
    }

    fn scenario(kind: ScenarioKind, input: &ProjectionInput) -> ProjectionScenario {
        build_scenarios(input)
            .unwrap()
            .into_iter()
            .find(|s| s.kind == kind)
            .unwrap()
    }

    fn share(s: &ProjectionScenario, name: &str) -> f64 {
        s.candidate(name).unwrap().projected_share
    }

    #[test]
    fn test_exactly_four_scenarios() {
        let scenarios = build_scenarios(&input(10.0)).unwrap();
        let kinds: Vec<ScenarioKind> = scenarios.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, ScenarioKind::ALL.to_vec());
        assert!(scenarios.iter().all(|s| !s.assumptions.is_empty()));
    }

    #[test]
    fn test_optimistic_shares() {
        let s = scenario(ScenarioKind::Optimistic, &input(10.0));
        assert!((share(&s, "A") - (45.0 + 6.0 + 3.0)).abs() < 1e-9);
        assert!((share(&s, "B") - 37.0).abs() < 1e-9);
        assert!((share(&s, "C") - 22.0).abs() < 1e-9);
    }

    #[test]
    fn test_realistic_is_proportional() {
        let s = scenario(ScenarioKind::Realistic, &input(10.0));
        assert!((share(&s, "A") - 49.5).abs() < 1e-9);
        assert!((share(&s, "B") - 38.5).abs() < 1e-9);
        assert!((share(&s, "C") - 22.0).abs() < 1e-9);
    }

    #[test]
    fn test_pessimistic_favours_runner_up() {
        let s = scenario(ScenarioKind::Pessimistic, &input(10.0));
        assert!((share(&s, "B") - 42.0).abs() < 1e-9);
        assert!((share(&s, "A") - (45.0 + 1.5 - 3.0)).abs() < 1e-9);
        assert!((share(&s, "C") - 21.5).abs() < 1e-9);
    }

    #[test]
    fn test_max_volatility() {
        let s = scenario(ScenarioKind::MaxVolatility, &input(10.0));
        assert!((share(&s, "B") - 45.0).abs() < 1e-9);
        assert!((share(&s, "A") - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_interval_clamped() {
        let inp = ProjectionInput::new([("A", 99.0), ("B", 1.0)], 0.05, 0.0);
        let s = scenario(ScenarioKind::Realistic, &inp);
        let a = s.candidate("A").unwrap();
        assert_eq!(a.confidence_interval.upper, 100.0);
        let b = s.candidate("B").unwrap();
        assert_eq!(b.confidence_interval.lower, 0.0);
    }

    #[test]
    fn test_win_probability_bands() {
        // margin 3 pts
        let wide = win_probabilities(&[50.0, 40.0], 3.0);
        assert!(wide[0] >= 0.90 && wide[0] <= 0.99);
        let medium = win_probabilities(&[45.0, 40.0], 3.0);
        assert!(medium[0] >= 0.70 && medium[0] < 0.90);
        let close = win_probabilities(&[41.0, 40.0], 3.0);
        assert!(close[0] >= 0.50 && close[0] < 0.70);
        for probs in [wide, medium, close] {
            assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_close_band_is_linear_from_even_odds() {
        let tie = win_probabilities(&[40.0, 40.0], 3.0);
        assert!((tie[0] - 0.5).abs() < 1e-12);
        assert!((tie[1] - 0.5).abs() < 1e-12);
        let at_margin = win_probabilities(&[43.0, 40.0], 3.0);
        assert!((at_margin[0] - 0.70).abs() < 1e-12);
    }

    #[test]
    fn test_interval_follows_projected_share() {
        let inp = ProjectionInput::new([("A", 40.0), ("B", 30.0)], 0.03, 20.0);
        let scenarios = build_scenarios(&inp).unwrap();
        for scenario in &scenarios {
            for c in &scenario.candidates {
                assert!((c.confidence_interval.lower - (c.projected_share - 3.0).max(0.0)).abs() < 1e-9);
                assert!((c.confidence_interval.upper - (c.projected_share + 3.0).min(100.0)).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_trailing_probabilities_scale_with_distance() {
        let probs = win_probabilities(&[50.0, 30.0, 10.0], 3.0);
        assert!(probs[1] > probs[2]);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_candidate() {
        let inp = ProjectionInput::new([("A", 80.0)], 0.03, 20.0);
        let scenarios = build_scenarios(&inp).unwrap();
        assert_eq!(scenarios.len(), 4);
        for s in &scenarios {
            assert_eq!(s.candidates[0].win_probability, 1.0);
        }
    }

    #[test]
    fn test_empty_candidates_rejected() {
        let inp = ProjectionInput::new(Vec::<(String, f64)>::new(), 0.03, 0.0);
        assert!(build_scenarios(&inp).is_err());
        assert!(run_monte_carlo(&inp, &MonteCarloConfig::default()).is_err());
    }

    #[test]
    fn test_monte_carlo_probabilities_sum_to_100() {
        let config = MonteCarloConfig {
            trials: 1_000,
            seed: Some(42),
        };
        let result = run_monte_carlo(&input(0.0), &config).unwrap();
        let total: f64 = result.candidates.iter().map(|c| c.win_probability).sum::<f64>()
            + result.runoff_probability;
        assert!((total - 100.0).abs() <= 5.0, "total = {total}");
        assert_eq!(result.trials, 1_000);
    }

    #[test]
    fn test_monte_carlo_percentiles_ordered() {
        let config = MonteCarloConfig {
            trials: 2_000,
            seed: Some(7),
        };
        let result = run_monte_carlo(&input(10.0), &config).unwrap();
        for c in &result.candidates {
            let p = &c.percentiles;
            assert!(p.p5 <= p.p25 && p.p25 <= p.p50 && p.p50 <= p.p75 && p.p75 <= p.p95);
        }
        let a = result.candidate("A").unwrap();
        assert!((a.percentiles.p50 - 45.0).abs() < 5.0);
    }

    #[test]
    fn test_monte_carlo_deterministic_with_seed() {
        let config = MonteCarloConfig {
            trials: 500,
            seed: Some(99),
        };
        let a = run_monte_carlo(&input(5.0), &config).unwrap();
        let b = run_monte_carlo(&input(5.0), &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_monte_carlo_landslide() {
        let inp = ProjectionInput::new([("A", 70.0), ("B", 30.0)], 0.02, 0.0);
        let config = MonteCarloConfig {
            trials: 1_000,
            seed: Some(1),
        };
        let result = run_monte_carlo(&inp, &config).unwrap();
        assert!(result.candidate("A").unwrap().win_probability > 99.0);
        assert!(result.runoff_probability < 1.0);
    }
}
