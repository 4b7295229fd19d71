//! Quantitative analysis of collected interviews.

use super::state::{
    AnalysisResults, CollectionOutcome, CorrelationAnalysis, CrosstabAnalysis, InterviewResponse,
    ProblemDefinition, QuestionKind, Questionnaire, UNDECIDED,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use surveyor_stats::{ProjectionInput, StatisticalEngine};

const VOTE_VARIABLE: &str = "vote_intention";

/// Map a raw vote answer onto a tracked candidate, or [`UNDECIDED`].
///
/// With no tracked candidates any non-empty answer stands for itself.
pub fn normalize_vote(raw: Option<&str>, candidates: &[String]) -> String {
    let answer = raw.map(str::trim).unwrap_or_default();
    if answer.is_empty() {
        return UNDECIDED.to_string();
    }
    if candidates.is_empty() {
        return if answer.eq_ignore_ascii_case(UNDECIDED) {
            UNDECIDED.to_string()
        } else {
            answer.to_string()
        };
    }
    candidates
        .iter()
        .find(|c| c.eq_ignore_ascii_case(answer))
        .cloned()
        .unwrap_or_else(|| UNDECIDED.to_string())
}

fn numeric_answer(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite())
}

fn scale_questions(questionnaire: &Questionnaire) -> Vec<&str> {
    questionnaire
        .questions
        .iter()
        .filter(|q| q.kind == QuestionKind::Scale && !q.id.is_empty())
        .map(|q| q.id.as_str())
        .collect()
}

/// Run descriptive and inferential statistics over successful interviews.
///
/// Insights are left empty for the scientist to fill in.
pub fn analyze_responses(
    engine: &StatisticalEngine,
    problem: &ProblemDefinition,
    questionnaire: &Questionnaire,
    collection: &CollectionOutcome,
    confidence: f64,
) -> AnalysisResults {
    let responses: Vec<&InterviewResponse> = collection.responses.values().collect();
    let n = responses.len();

    let votes: Vec<String> = responses
        .iter()
        .map(|r| normalize_vote(r.vote_intention.as_deref(), &problem.candidates))
        .collect();
    let vote_intention = engine.describe_categorical(VOTE_VARIABLE, &votes);

    let tracked: Vec<String> = if problem.candidates.is_empty() {
        vote_intention
            .frequencies
            .iter()
            .map(|row| row.category.clone())
            .filter(|c| c != UNDECIDED)
            .collect()
    } else {
        problem.candidates.clone()
    };
    let candidate_shares: BTreeMap<String, f64> = tracked
        .iter()
        .map(|c| (c.clone(), vote_intention.percent_of(c)))
        .collect();

    let mut ranked: Vec<(&String, f64)> = candidate_shares.iter().map(|(c, s)| (c, *s)).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let leader = ranked.first().filter(|_| n > 0).map(|(c, _)| (*c).clone());
    let leader_margin = ranked
        .first()
        .filter(|_| n > 0)
        .map(|(_, share)| engine.margin_of_error(share / 100.0, n, confidence));
    let leader_vs_runner_up = match (ranked.first(), ranked.get(1)) {
        (Some((_, a)), Some((_, b))) if n > 0 => {
            Some(engine.two_proportion_z_test(a / 100.0, n, b / 100.0, n))
        }
        _ => None,
    };

    let observed: BTreeMap<String, f64> = tracked
        .iter()
        .map(|c| (c.clone(), vote_intention.count_of(c) as f64))
        .collect();
    let goodness_of_fit = engine.chi_square_goodness_of_fit(&observed, None);

    let strata_variables: BTreeSet<&String> =
        responses.iter().flat_map(|r| r.strata.keys()).collect();
    let crosstabs = strata_variables
        .into_iter()
        .map(|variable| {
            let pairs: Vec<(String, &str)> = responses
                .iter()
                .zip(&votes)
                .map(|(r, vote)| {
                    let stratum = r
                        .strata
                        .get(variable)
                        .cloned()
                        .unwrap_or_else(|| surveyor_stats::profile::UNKNOWN_STRATUM.to_string());
                    (stratum, vote.as_str())
                })
                .collect();
            let table = engine.crosstab(variable, VOTE_VARIABLE, &pairs);
            let test = engine.chi_square_independence(&table);
            CrosstabAnalysis {
                variable: variable.clone(),
                table,
                test,
            }
        })
        .collect();

    let scales = scale_questions(questionnaire);
    let numeric: BTreeMap<String, _> = scales
        .iter()
        .filter_map(|id| {
            let values: Vec<f64> = responses
                .iter()
                .filter_map(|r| r.answers.get(*id).and_then(numeric_answer))
                .collect();
            engine
                .describe_numeric(&values)
                .map(|summary| (id.to_string(), summary))
        })
        .collect();

    let mut correlations = Vec::new();
    for (i, x) in scales.iter().enumerate() {
        for y in &scales[i + 1..] {
            let (xs, ys): (Vec<f64>, Vec<f64>) = responses
                .iter()
                .filter_map(|r| {
                    let a = r.answers.get(*x).and_then(numeric_answer)?;
                    let b = r.answers.get(*y).and_then(numeric_answer)?;
                    Some((a, b))
                })
                .unzip();
            correlations.push(CorrelationAnalysis {
                x: x.to_string(),
                y: y.to_string(),
                test: engine.pearson_correlation(&xs, &ys),
            });
        }
    }

    AnalysisResults {
        respondents: n,
        undecided_percent: vote_intention.percent_of(UNDECIDED),
        vote_intention,
        candidate_shares,
        leader,
        leader_margin,
        leader_vs_runner_up,
        goodness_of_fit,
        crosstabs,
        numeric,
        correlations,
        insights: Vec::new(),
    }
}

/// Projection input from analysis, using the leader's observed margin when
/// there is one and `fallback_margin` otherwise.
pub fn projection_input(analysis: &AnalysisResults, fallback_margin: f64) -> ProjectionInput {
    let margin = analysis
        .leader_margin
        .as_ref()
        .map(|m| m.margin)
        .filter(|m| *m > 0.0)
        .unwrap_or(fallback_margin);
    ProjectionInput::new(
        analysis
            .candidate_shares
            .iter()
            .map(|(c, share)| (c.clone(), *share)),
        margin,
        analysis.undecided_percent,
    )
}
