//! Research state and per-phase payloads.

use super::phase::ResearchPhase;
use crate::checkpoint::CheckpointStage;
use crate::config::ModelConfig;
use crate::error::CoordinatorError;
use crate::model::ModelResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use surveyor_stats::descriptive::ContingencyTable;
use surveyor_stats::projections::MonteCarloResult;
use surveyor_stats::{
    CategoricalSummary, MarginOfErrorResult, NumericSummary, ProjectionInput, ProjectionScenario,
    QuotaTarget, RepresentativenessReport, SampleConfig, SamplingMethod, SamplingStrategy,
    SelectedSample, TestResult,
};
use uuid::Uuid;

/// Label used for respondents without a candidate choice.
pub const UNDECIDED: &str = "undecided";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProblemDefinition {
    pub title: String,
    pub objectives: Vec<String>,
    pub hypotheses: Vec<String>,
    pub target_population: String,
    /// Candidates tracked by vote-intention questions.
    pub candidates: Vec<String>,
    /// Profile variables the research cares about.
    pub key_variables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Methodology {
    pub sampling_method: SamplingMethod,
    pub stratification_variables: Vec<String>,
    pub confidence_level: f64,
    pub margin_of_error: f64,
    /// Explicit sample size; computed from the sample config when absent.
    pub target_sample_size: Option<usize>,
    pub quotas: Vec<QuotaTarget>,
    pub cluster_variable: Option<String>,
    pub optimal_variable: Option<String>,
    pub rationale: String,
}

impl Default for Methodology {
    fn default() -> Self {
        Self {
            sampling_method: SamplingMethod::StratifiedProportional,
            stratification_variables: Vec::new(),
            confidence_level: 0.95,
            margin_of_error: 0.05,
            target_sample_size: None,
            quotas: Vec::new(),
            cluster_variable: None,
            optimal_variable: None,
            rationale: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingOutcome {
    pub config: SampleConfig,
    pub computed_size: usize,
    pub strategy: SamplingStrategy,
    pub sample: SelectedSample,
    pub representativeness: RepresentativenessReport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionKind {
    #[default]
    SingleChoice,
    MultipleChoice,
    Scale,
    Open,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub kind: QuestionKind,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Questionnaire {
    pub title: String,
    pub introduction: String,
    pub questions: Vec<Question>,
}

/// What a respondent returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RespondentAnswers {
    pub answers: BTreeMap<String, Value>,
    pub vote_intention: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewResponse {
    pub respondent_id: String,
    pub respondent_name: String,
    pub strata: BTreeMap<String, String>,
    pub answers: BTreeMap<String, Value>,
    pub vote_intention: Option<String>,
    /// False when the reply could not be parsed and neutral defaults were used.
    pub structured: bool,
    pub collected_at: DateTime<Utc>,
}

/// Interview results keyed by respondent id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionOutcome {
    pub responses: BTreeMap<String, InterviewResponse>,
    /// Failure message per respondent; these units are excluded from analysis.
    pub failures: BTreeMap<String, String>,
}

impl CollectionOutcome {
    /// Respondents with a settled outcome, successful or not.
    pub fn settled(&self) -> usize {
        self.responses.len() + self.failures.len()
    }

    pub fn is_settled(&self, respondent_id: &str) -> bool {
        self.responses.contains_key(respondent_id) || self.failures.contains_key(respondent_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrosstabAnalysis {
    pub variable: String,
    pub table: ContingencyTable,
    pub test: TestResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationAnalysis {
    pub x: String,
    pub y: String,
    pub test: TestResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResults {
    pub respondents: usize,
    pub vote_intention: CategoricalSummary,
    /// Percent of all respondents per candidate.
    pub candidate_shares: BTreeMap<String, f64>,
    pub undecided_percent: f64,
    pub leader: Option<String>,
    pub leader_margin: Option<MarginOfErrorResult>,
    pub leader_vs_runner_up: Option<TestResult>,
    pub goodness_of_fit: TestResult,
    pub crosstabs: Vec<CrosstabAnalysis>,
    pub numeric: BTreeMap<String, NumericSummary>,
    pub correlations: Vec<CorrelationAnalysis>,
    pub insights: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionsPayload {
    pub input: ProjectionInput,
    pub scenarios: Vec<ProjectionScenario>,
    pub monte_carlo: MonteCarloResult,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Recommendation {
    pub title: String,
    pub rationale: String,
    pub priority: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSection {
    pub heading: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchReport {
    pub title: String,
    pub executive_summary: String,
    pub key_findings: Vec<String>,
    pub sections: Vec<ReportSection>,
}

/// Accumulated model usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub calls: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub cost_usd: f64,
}

impl TokenUsage {
    pub fn record(&mut self, response: &ModelResponse, model: &ModelConfig) {
        self.calls += 1;
        self.input_tokens += response.input_tokens;
        self.output_tokens += response.output_tokens;
        self.cost_usd += model.cost(response.input_tokens, response.output_tokens);
    }

    pub fn total_tokens(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMarker {
    pub phase: ResearchPhase,
    pub stage: CheckpointStage,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub phase: ResearchPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respondent_id: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// The full state of one research run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchState {
    pub id: Uuid,
    pub topic: String,
    pub phase: ResearchPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub problem_definition: Option<ProblemDefinition>,
    pub methodology: Option<Methodology>,
    pub sampling: Option<SamplingOutcome>,
    pub questionnaire: Option<Questionnaire>,
    pub collection: Option<CollectionOutcome>,
    pub analysis: Option<AnalysisResults>,
    pub projections: Option<ProjectionsPayload>,
    pub recommendations: Option<Vec<Recommendation>>,
    pub report: Option<ResearchReport>,
    pub checkpoints: Vec<CheckpointMarker>,
    pub usage: TokenUsage,
    pub errors: Vec<ErrorEntry>,
}

impl ResearchState {
    pub fn new(topic: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            phase: ResearchPhase::ProblemDefinition,
            created_at: now,
            updated_at: now,
            problem_definition: None,
            methodology: None,
            sampling: None,
            questionnaire: None,
            collection: None,
            analysis: None,
            projections: None,
            recommendations: None,
            report: None,
            checkpoints: Vec::new(),
            usage: TokenUsage::default(),
            errors: Vec::new(),
        }
    }

    pub fn research_id(&self) -> String {
        self.id.to_string()
    }

    pub fn is_complete(&self) -> bool {
        self.phase.is_done()
    }

    pub fn progress_percent(&self) -> f64 {
        self.phase.progress_percent()
    }

    /// Move to `to`, which must be the immediate successor.
    pub fn transition(&mut self, to: ResearchPhase) -> Result<(), CoordinatorError> {
        if !self.phase.can_transition_to(to) {
            return Err(CoordinatorError::InvalidTransition {
                from: self.phase.to_string(),
                to: to.to_string(),
            });
        }
        self.phase = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn record_error(&mut self, respondent_id: Option<String>, message: impl Into<String>) {
        self.errors.push(ErrorEntry {
            phase: self.phase,
            respondent_id,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    /// Append a marker for a checkpoint written under `phase`.
    pub fn mark_checkpoint(
        &mut self,
        phase: ResearchPhase,
        stage: CheckpointStage,
        hash: impl Into<String>,
    ) {
        self.checkpoints.push(CheckpointMarker {
            phase,
            stage,
            hash: hash.into(),
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state() {
        let state = ResearchState::new("Mayoral race 2026");
        assert_eq!(state.phase, ResearchPhase::ProblemDefinition);
        assert_eq!(state.progress_percent(), 0.0);
        assert!(state.problem_definition.is_none());
        assert!(!state.is_complete());
    }

    #[test]
    fn test_transition_forward_only() {
        let mut state = ResearchState::new("t");
        state.transition(ResearchPhase::Methodology).unwrap();
        assert_eq!(state.phase, ResearchPhase::Methodology);

        let err = state.transition(ResearchPhase::Collection).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));
        assert!(state.transition(ResearchPhase::ProblemDefinition).is_err());
        assert_eq!(state.phase, ResearchPhase::Methodology);
    }

    #[test]
    fn test_usage_accumulates_cost() {
        let mut usage = TokenUsage::default();
        let model = ModelConfig::default();
        let response = ModelResponse {
            text: String::new(),
            input_tokens: 400_000,
            output_tokens: 100_000,
        };
        usage.record(&response, &model);
        usage.record(&response, &model);
        assert_eq!(usage.calls, 2);
        assert_eq!(usage.total_tokens(), 1_000_000);
        assert!((usage.cost_usd - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_state_serde_roundtrip() {
        let mut state = ResearchState::new("t");
        state.problem_definition = Some(ProblemDefinition {
            title: "Vote intention".into(),
            candidates: vec!["A".into(), "B".into()],
            ..Default::default()
        });
        state.record_error(None, "something odd");
        state.mark_checkpoint(ResearchPhase::ProblemDefinition, CheckpointStage::Started, "abc");
        let json = serde_json::to_string(&state).unwrap();
        let back: ResearchState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_methodology_partial_json_uses_defaults() {
        let m: Methodology =
            serde_json::from_str(r#"{"sampling_method": "quota", "margin_of_error": 0.03}"#).unwrap();
        assert_eq!(m.sampling_method, SamplingMethod::Quota);
        assert_eq!(m.margin_of_error, 0.03);
        assert_eq!(m.confidence_level, 0.95);
    }

    #[test]
    fn test_collection_settled() {
        let mut outcome = CollectionOutcome::default();
        outcome.failures.insert("p1".into(), "timeout".into());
        assert!(outcome.is_settled("p1"));
        assert!(!outcome.is_settled("p2"));
        assert_eq!(outcome.settled(), 1);
    }
}
