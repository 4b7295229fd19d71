//! Research coordinator: drives the phase state machine.
//!
//! Every phase is bracketed by two checkpoints written under the phase's
//! name: a `started` snapshot before any work and a `completed` snapshot
//! once the payload is stored and the state has advanced. A failure between
//! the two leaves the `started` snapshot as the resume point.

use super::analysis::{analyze_responses, normalize_vote, projection_input};
use super::phase::ResearchPhase;
use super::progress::{NoOpProgress, ProgressEvent, ProgressSink};
use super::state::{
    CollectionOutcome, InterviewResponse, Methodology, ProblemDefinition, ProjectionsPayload,
    Question, QuestionKind, Questionnaire, Recommendation, ResearchReport, ResearchState,
    RespondentAnswers, SamplingOutcome, UNDECIDED,
};
use crate::checkpoint::{CheckpointManager, CheckpointMetadata};
use crate::config::SurveyorConfig;
use crate::context::{ContextKind, ContextManager, PINNED_PRIORITY};
use crate::error::{CoordinatorError, ModelError, Result, SurveyorError};
use crate::extract::{Extracted, extract_json, extract_json_or};
use crate::model::{ModelInvoker, ModelRequest, ModelResponse, ModelRole, TokenCounter};
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use surveyor_stats::{
    ConfidenceLevel, MonteCarloConfig, ProfileRecord, ProjectionEngine, SampleConfig,
    SamplingEngine, SamplingMethod, SamplingRequest, SelectedUnit, StatisticalEngine,
    validate_representativeness,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const FALLBACK_POPULATION: &str = "general adult population";

/// Collaborators handed to the coordinator.
pub struct CoordinatorDeps {
    pub config: SurveyorConfig,
    pub model: Arc<dyn ModelInvoker>,
    pub population: Vec<ProfileRecord>,
    pub sampling: SamplingEngine,
    pub stats: StatisticalEngine,
    pub projections: ProjectionEngine,
    pub context: ContextManager,
    pub checkpoints: CheckpointManager,
    pub progress: Arc<dyn ProgressSink>,
}

impl CoordinatorDeps {
    /// Build every collaborator from configuration.
    pub fn from_config(
        config: SurveyorConfig,
        model: Arc<dyn ModelInvoker>,
        population: Vec<ProfileRecord>,
    ) -> Result<Self> {
        config.validate()?;
        let counter = TokenCounter::for_model(&config.model.name).map(Arc::new);
        let context = ContextManager::from_config(&config.context, counter);
        let sampling = match config.sampling.seed {
            Some(seed) => SamplingEngine::with_seed(seed),
            None => SamplingEngine::new(),
        };
        let projections = ProjectionEngine::new(MonteCarloConfig {
            trials: config.projections.trials,
            seed: config.projections.seed,
        });
        let checkpoints = CheckpointManager::new(config.checkpoint.dir.clone());
        Ok(Self {
            config,
            model,
            population,
            sampling,
            stats: StatisticalEngine::new(),
            projections,
            context,
            checkpoints,
            progress: Arc::new(NoOpProgress),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InsightsReply {
    insights: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RecommendationsReply {
    recommendations: Vec<Recommendation>,
}

pub struct ResearchCoordinator {
    config: SurveyorConfig,
    model: Arc<dyn ModelInvoker>,
    population: Vec<ProfileRecord>,
    sampling: SamplingEngine,
    stats: StatisticalEngine,
    projections: ProjectionEngine,
    context: ContextManager,
    checkpoints: CheckpointManager,
    progress: Arc<dyn ProgressSink>,
}

impl ResearchCoordinator {
    pub fn new(deps: CoordinatorDeps) -> Self {
        Self {
            config: deps.config,
            model: deps.model,
            population: deps.population,
            sampling: deps.sampling,
            stats: deps.stats,
            projections: deps.projections,
            context: deps.context,
            checkpoints: deps.checkpoints,
            progress: deps.progress,
        }
    }

    pub fn from_config(
        config: SurveyorConfig,
        model: Arc<dyn ModelInvoker>,
        population: Vec<ProfileRecord>,
    ) -> Result<Self> {
        Ok(Self::new(CoordinatorDeps::from_config(config, model, population)?))
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &SurveyorConfig {
        &self.config
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Create a fresh research run positioned at problem definition.
    pub fn start(&mut self, topic: impl Into<String>) -> ResearchState {
        let state = ResearchState::new(topic);
        self.rebuild_context(&state);
        info!(research_id = %state.id, topic = %state.topic, "Research started");
        self.progress.emit(ProgressEvent::new(
            state.phase,
            format!("Research started: {}", state.topic),
        ));
        state
    }

    /// Run phases until the research is done.
    pub async fn run(&mut self, mut state: ResearchState) -> Result<ResearchState> {
        while !state.is_complete() {
            self.step(&mut state).await?;
        }
        Ok(state)
    }

    /// Load a checkpointed state without running anything.
    ///
    /// Without a phase the most recent checkpoint is used. The context is
    /// rebuilt from the loaded payloads.
    pub fn load_state(&mut self, research_id: Uuid, phase: Option<&str>) -> Result<ResearchState> {
        let key = match phase {
            Some(name) => Some(name.parse::<ResearchPhase>()?.as_str()),
            None => None,
        };
        let id = research_id.to_string();
        let record = self.checkpoints.load(&id, key)?;
        let state: ResearchState = record.data_as()?;
        self.rebuild_context(&state);
        info!(
            research_id = %id,
            checkpoint = %record.phase,
            phase = %state.phase,
            "Research state loaded"
        );
        Ok(state)
    }

    /// Load a checkpoint and continue the run from the phase it records.
    pub async fn resume(
        &mut self,
        research_id: Uuid,
        phase: Option<&str>,
    ) -> Result<ResearchState> {
        let state = self.load_state(research_id, phase)?;
        if state.is_complete() {
            info!(research_id = %research_id, "Research already complete; nothing to resume");
            return Ok(state);
        }
        self.progress.emit(ProgressEvent::new(
            state.phase,
            format!("Resuming at {}", state.phase),
        ));
        self.run(state).await
    }

    /// Execute the current phase and advance to the next one.
    pub async fn step(&mut self, state: &mut ResearchState) -> Result<()> {
        let phase = state.phase;
        if phase.is_done() {
            return Err(CoordinatorError::AlreadyComplete {
                research_id: state.research_id(),
            }
            .into());
        }

        self.checkpoint(state, phase, CheckpointMetadata::started())?;
        self.progress
            .emit(ProgressEvent::new(phase, format!("Starting {phase}")));
        info!(research_id = %state.id, %phase, "Phase started");

        let outcome = match phase {
            ResearchPhase::ProblemDefinition => self.define_problem(state).await,
            ResearchPhase::Methodology => self.design_methodology(state).await,
            ResearchPhase::Sampling => self.select_sample(state),
            ResearchPhase::Questionnaire => self.design_questionnaire(state).await,
            ResearchPhase::Collection => self.collect(state).await,
            ResearchPhase::Analysis => self.analyze(state).await,
            ResearchPhase::Projections => self.project(state),
            ResearchPhase::Recommendations => self.recommend(state).await,
            ResearchPhase::Report => self.write_report(state).await,
            ResearchPhase::Done => Ok(()),
        };
        if let Err(e) = outcome {
            error!(research_id = %state.id, %phase, error = %e, "Phase failed");
            state.record_error(None, e.to_string());
            return Err(CoordinatorError::PhaseFailed {
                phase: phase.to_string(),
                message: e.to_string(),
            }
            .into());
        }

        let next = phase.next().ok_or_else(|| CoordinatorError::InvalidTransition {
            from: phase.to_string(),
            to: "<none>".into(),
        })?;
        state.transition(next)?;
        self.checkpoint(state, phase, CheckpointMetadata::completed())?;

        let message = if next.is_done() {
            "Research complete".to_string()
        } else {
            format!("Completed {phase}")
        };
        self.progress.emit(ProgressEvent::new(next, message));
        info!(
            research_id = %state.id,
            %phase,
            next = %next,
            tokens = state.usage.total_tokens(),
            cost_usd = state.usage.cost_usd,
            "Phase completed"
        );
        Ok(())
    }

    fn checkpoint(
        &self,
        state: &mut ResearchState,
        phase: ResearchPhase,
        metadata: CheckpointMetadata,
    ) -> Result<()> {
        let stage = metadata.stage;
        let record = self
            .checkpoints
            .save(&state.research_id(), phase.as_str(), state, metadata)?;
        state.mark_checkpoint(phase, stage, record.hash);
        Ok(())
    }

    fn rebuild_context(&mut self, state: &ResearchState) {
        self.context.clear();
        self.context.add_item(
            format!("Research topic: {}", state.topic),
            ContextKind::Note,
            PINNED_PRIORITY,
        );
        if let Some(problem) = &state.problem_definition {
            self.remember(ContextKind::ProblemDefinition, problem, PINNED_PRIORITY);
        }
        if let Some(methodology) = &state.methodology {
            self.remember(ContextKind::Methodology, methodology, 3);
        }
        if let Some(sampling) = &state.sampling {
            self.context
                .add_item(sampling_summary(sampling), ContextKind::Sampling, 4);
        }
        if let Some(questionnaire) = &state.questionnaire {
            self.remember(ContextKind::Questionnaire, questionnaire, 4);
        }
        if let Some(collection) = &state.collection {
            self.context
                .add_item(collection_summary(collection), ContextKind::Collection, 6);
        }
        if let Some(analysis) = &state.analysis {
            self.remember(ContextKind::Analysis, analysis, 2);
        }
        if let Some(projections) = &state.projections {
            self.remember(ContextKind::Projections, &projections.scenarios, 3);
        }
        if let Some(recommendations) = &state.recommendations {
            self.remember(ContextKind::Recommendations, recommendations, 3);
        }
    }

    fn remember<T: serde::Serialize + ?Sized>(&mut self, kind: ContextKind, value: &T, priority: u8) {
        match serde_json::to_string(value) {
            Ok(text) => {
                self.context.add_item(text, kind, priority);
            }
            Err(e) => warn!(kind = %kind, error = %e, "Could not serialize context item"),
        }
    }

    async fn invoke(
        &self,
        state: &mut ResearchState,
        request: ModelRequest,
    ) -> std::result::Result<ModelResponse, ModelError> {
        let role = request.role;
        let response = self.model.invoke(request).await?;
        state.usage.record(&response, &self.config.model);
        if response.text.trim().is_empty() {
            return Err(ModelError::EmptyResponse {
                role: role.to_string(),
            });
        }
        Ok(response)
    }

    /// Ask the scientist for a JSON payload built from phase-scoped context.
    async fn ask_scientist<T, F>(
        &self,
        state: &mut ResearchState,
        instructions: &str,
        fallback: F,
    ) -> Result<Extracted<T>>
    where
        T: DeserializeOwned,
        F: FnOnce() -> T,
    {
        let phase = state.phase;
        let context = self.context.get_context_for_phase(phase);
        let prompt = format!(
            "{instructions}\n\nResearch topic: {topic}\n\n{context}\n\nRespond with a single JSON object.",
            topic = state.topic,
        );
        let request = ModelRequest::scientist(prompt, self.config.model.scientist_max_tokens);
        let response = self.invoke(state, request).await?;
        debug!(
            research_id = %state.id,
            %phase,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Scientist responded"
        );

        let extracted = extract_json_or(&response.text, fallback);
        if extracted.is_fallback() {
            warn!(
                research_id = %state.id,
                %phase,
                "Scientist reply was not valid JSON; using neutral defaults"
            );
        }
        Ok(extracted)
    }

    async fn define_problem(&mut self, state: &mut ResearchState) -> Result<()> {
        let mut problem: ProblemDefinition = self
            .ask_scientist(
                state,
                "Define the research problem: title, objectives, hypotheses, target_population, \
                 candidates being measured and key_variables of the population profile.",
                ProblemDefinition::default,
            )
            .await?
            .into_value();

        if problem.title.trim().is_empty() {
            problem.title = state.topic.clone();
        }
        if problem.target_population.trim().is_empty() {
            problem.target_population = FALLBACK_POPULATION.to_string();
        }
        if problem.objectives.is_empty() {
            problem.objectives.push(format!("Measure opinion on {}", state.topic));
        }
        problem.candidates.retain(|c| !c.trim().is_empty());
        problem.candidates.dedup();

        self.remember(ContextKind::ProblemDefinition, &problem, PINNED_PRIORITY);
        state.problem_definition = Some(problem);
        Ok(())
    }

    async fn design_methodology(&mut self, state: &mut ResearchState) -> Result<()> {
        let defaults = self.default_methodology();
        let fallback = defaults.clone();
        let mut methodology: Methodology = self
            .ask_scientist(
                state,
                "Design the survey methodology: sampling_method, stratification_variables, \
                 confidence_level, margin_of_error, optional target_sample_size, quotas and rationale.",
                move || fallback,
            )
            .await?
            .into_value();

        if ConfidenceLevel::from_value(methodology.confidence_level).is_err() {
            warn!(
                confidence = methodology.confidence_level,
                "Unsupported confidence level proposed; using configured default"
            );
            methodology.confidence_level = defaults.confidence_level;
        }
        if !(methodology.margin_of_error > 0.0 && methodology.margin_of_error < 1.0) {
            methodology.margin_of_error = defaults.margin_of_error;
        }
        self.fit_methodology_to_population(state, &mut methodology);

        self.remember(ContextKind::Methodology, &methodology, 3);
        state.methodology = Some(methodology);
        Ok(())
    }

    fn default_methodology(&self) -> Methodology {
        Methodology {
            confidence_level: self.config.sampling.confidence,
            margin_of_error: self.config.sampling.margin_of_error,
            ..Methodology::default()
        }
    }

    fn population_has(&self, variable: &str) -> bool {
        self.population
            .iter()
            .any(|r| r.stratum_value(variable).is_some())
    }

    /// Drop variables the population cannot stratify on and downgrade the
    /// method when nothing usable is left.
    fn fit_methodology_to_population(&self, state: &ResearchState, methodology: &mut Methodology) {
        let before = methodology.stratification_variables.len();
        methodology
            .stratification_variables
            .retain(|v| self.population_has(v));
        if methodology.stratification_variables.len() < before {
            warn!(
                research_id = %state.id,
                "Dropped stratification variables missing from the population"
            );
        }
        if methodology.stratification_variables.is_empty()
            && let Some(problem) = &state.problem_definition
        {
            methodology.stratification_variables = problem
                .key_variables
                .iter()
                .filter(|v| self.population_has(v))
                .cloned()
                .collect();
        }
        methodology
            .quotas
            .retain(|q| q.target > 0 && self.population_has(&q.variable));
        if methodology
            .cluster_variable
            .as_deref()
            .is_some_and(|v| !self.population_has(v))
        {
            methodology.cluster_variable = None;
        }

        let usable = match methodology.sampling_method {
            SamplingMethod::StratifiedProportional | SamplingMethod::StratifiedOptimal => {
                !methodology.stratification_variables.is_empty()
            }
            SamplingMethod::Quota => !methodology.quotas.is_empty(),
            SamplingMethod::Cluster => {
                methodology.cluster_variable.is_some()
                    || !methodology.stratification_variables.is_empty()
            }
            SamplingMethod::SimpleRandom | SamplingMethod::Systematic => true,
        };
        if !usable {
            warn!(
                research_id = %state.id,
                method = %methodology.sampling_method,
                "Sampling method not applicable to this population; using simple random"
            );
            methodology.sampling_method = SamplingMethod::SimpleRandom;
        }
    }

    fn select_sample(&mut self, state: &mut ResearchState) -> Result<()> {
        let methodology = state
            .methodology
            .clone()
            .ok_or_else(|| missing(ResearchPhase::Sampling, "methodology"))?;

        let mut config = SampleConfig::new(
            self.population.len(),
            methodology.confidence_level,
            methodology.margin_of_error,
        )
        .with_proportion(self.config.sampling.proportion);
        config.validate()?;
        let computed_size = config.sample_size()?;
        let target = methodology
            .target_sample_size
            .filter(|n| *n > 0)
            .unwrap_or(computed_size)
            .min(self.population.len());

        let mut request = SamplingRequest::new(methodology.sampling_method, target)
            .with_variables(methodology.stratification_variables.iter().cloned())
            .with_quotas(methodology.quotas.clone());
        if let Some(variable) = &methodology.cluster_variable {
            request = request.with_cluster_variable(variable.clone());
        }
        if let Some(variable) = &methodology.optimal_variable {
            request = request.with_optimal_variable(variable.clone());
        }

        let (strategy, sample) = self.sampling.select(&self.population, &request)?;
        let variables: Vec<String> = if sample.tracked_variables().is_empty() {
            state
                .problem_definition
                .as_ref()
                .map(|p| {
                    p.key_variables
                        .iter()
                        .filter(|v| self.population_has(v))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        } else {
            sample.tracked_variables().to_vec()
        };
        let representativeness = validate_representativeness(
            &sample,
            &self.population,
            &variables,
            self.config.sampling.tolerance,
        );
        if !representativeness.represents_population {
            warn!(
                research_id = %state.id,
                invalid = ?representativeness.invalid_variables(),
                "Sample deviates from the population beyond tolerance"
            );
        }
        info!(
            research_id = %state.id,
            method = %strategy.method,
            computed_size,
            selected = sample.len(),
            "Sample selected"
        );

        let outcome = SamplingOutcome {
            config,
            computed_size,
            strategy,
            sample,
            representativeness,
        };
        self.context
            .add_item(sampling_summary(&outcome), ContextKind::Sampling, 4);
        state.sampling = Some(outcome);
        Ok(())
    }

    async fn design_questionnaire(&mut self, state: &mut ResearchState) -> Result<()> {
        let mut questionnaire: Questionnaire = self
            .ask_scientist(
                state,
                "Write the questionnaire: title, introduction and questions, each with id, text, \
                 kind (single-choice, multiple-choice, scale or open) and options.",
                Questionnaire::default,
            )
            .await?
            .into_value();

        let candidates = state
            .problem_definition
            .as_ref()
            .map(|p| p.candidates.clone())
            .unwrap_or_default();
        if questionnaire.title.trim().is_empty() {
            questionnaire.title = format!("{} questionnaire", state.topic);
        }
        if questionnaire.questions.is_empty() {
            questionnaire.questions.push(vote_question(&candidates));
        }
        for (i, question) in questionnaire.questions.iter_mut().enumerate() {
            if question.id.trim().is_empty() {
                question.id = format!("q{}", i + 1);
            }
        }

        self.remember(ContextKind::Questionnaire, &questionnaire, 4);
        state.questionnaire = Some(questionnaire);
        Ok(())
    }

    async fn collect(&mut self, state: &mut ResearchState) -> Result<()> {
        let units: Vec<SelectedUnit> = state
            .sampling
            .as_ref()
            .ok_or_else(|| missing(ResearchPhase::Collection, "sampling"))?
            .sample
            .units()
            .to_vec();
        let questionnaire = state
            .questionnaire
            .clone()
            .ok_or_else(|| missing(ResearchPhase::Collection, "questionnaire"))?;
        let candidates = state
            .problem_definition
            .as_ref()
            .map(|p| p.candidates.clone())
            .unwrap_or_default();

        let mut outcome = state.collection.take().unwrap_or_default();
        let total = units.len();
        let pending: Vec<(SelectedUnit, String)> = units
            .into_iter()
            .filter(|u| !outcome.is_settled(&u.id))
            .map(|u| {
                let prompt = self.interview_prompt(&u, &questionnaire, &candidates);
                (u, prompt)
            })
            .collect();
        if pending.len() < total {
            info!(
                research_id = %state.id,
                settled = total - pending.len(),
                pending = pending.len(),
                "Resuming partially collected interviews"
            );
        }

        let collection = &self.config.collection;
        let max_tokens = self.config.model.respondent_max_tokens;
        let timeout_secs = collection.interview_timeout_secs;
        let interval = collection.checkpoint_interval.max(1);
        let model = Arc::clone(&self.model);

        let mut interviews = futures::stream::iter(pending.into_iter().map(|(unit, prompt)| {
            let model = Arc::clone(&model);
            async move {
                let request = ModelRequest::respondent(prompt, max_tokens);
                let result =
                    match tokio::time::timeout(Duration::from_secs(timeout_secs), model.invoke(request))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ModelError::Timeout {
                            role: ModelRole::Respondent.to_string(),
                            timeout_secs,
                        }),
                    };
                (unit, result)
            }
        }))
        .buffer_unordered(collection.max_concurrent.max(1));

        let mut processed = 0usize;
        while let Some((unit, result)) = interviews.next().await {
            let result = result.and_then(|response| {
                state.usage.record(&response, &self.config.model);
                if response.text.trim().is_empty() {
                    Err(ModelError::EmptyResponse {
                        role: ModelRole::Respondent.to_string(),
                    })
                } else {
                    Ok(response)
                }
            });
            match result {
                Ok(response) => {
                    let parsed = extract_json::<RespondentAnswers>(&response.text);
                    let structured = !parsed.is_fallback();
                    if !structured {
                        debug!(respondent_id = %unit.id, "Respondent reply unparsed; recorded as undecided");
                    }
                    let answers = parsed.into_value();
                    let vote = normalize_vote(answers.vote_intention.as_deref(), &candidates);
                    outcome.responses.insert(
                        unit.id.clone(),
                        InterviewResponse {
                            respondent_id: unit.id.clone(),
                            respondent_name: unit.display_name.clone(),
                            strata: unit.strata.clone(),
                            answers: answers.answers,
                            vote_intention: (vote != UNDECIDED).then_some(vote),
                            structured,
                            collected_at: Utc::now(),
                        },
                    );
                }
                Err(e) => {
                    warn!(
                        research_id = %state.id,
                        respondent_id = %unit.id,
                        error = %e,
                        "Interview failed; respondent excluded"
                    );
                    state.record_error(Some(unit.id.clone()), e.to_string());
                    outcome.failures.insert(unit.id.clone(), e.to_string());
                }
            }

            processed += 1;
            if processed % interval == 0 {
                let settled = outcome.settled();
                state.collection = Some(outcome.clone());
                self.checkpoint(
                    state,
                    ResearchPhase::Collection,
                    CheckpointMetadata::partial(outcome.responses.len()),
                )?;
                let span = 100.0 / ResearchPhase::WORKING_PHASES as f64;
                let percent = ResearchPhase::Collection.progress_percent()
                    + span * settled as f64 / total.max(1) as f64;
                self.progress.emit(
                    ProgressEvent::new(
                        ResearchPhase::Collection,
                        format!("{settled}/{total} interviews settled"),
                    )
                    .with_percent(percent),
                );
            }
        }

        info!(
            research_id = %state.id,
            completed = outcome.responses.len(),
            failed = outcome.failures.len(),
            "Collection finished"
        );
        self.context
            .add_item(collection_summary(&outcome), ContextKind::Collection, 6);
        state.collection = Some(outcome);
        Ok(())
    }

    fn interview_prompt(
        &self,
        unit: &SelectedUnit,
        questionnaire: &Questionnaire,
        candidates: &[String],
    ) -> String {
        let profile = self
            .population
            .get(unit.population_index)
            .and_then(|r| serde_json::to_string(r.fields()).ok())
            .unwrap_or_else(|| "{}".to_string());
        let questions = serde_json::to_string(&questionnaire.questions).unwrap_or_default();
        let choices = if candidates.is_empty() {
            "any candidate you prefer".to_string()
        } else {
            candidates.join(", ")
        };
        format!(
            "You are answering a survey interview as the person described below.\n\
             Respondent ID: {id}\n\
             Name: {name}\n\
             Profile: {profile}\n\n\
             {intro}\n\
             Questions: {questions}\n\n\
             Reply with JSON: {{\"answers\": {{<question id>: <answer>}}, \"vote_intention\": <one of {choices}, or null if undecided>}}",
            id = unit.id,
            name = unit.display_name,
            intro = questionnaire.introduction,
        )
    }

    async fn analyze(&mut self, state: &mut ResearchState) -> Result<()> {
        let problem = state
            .problem_definition
            .clone()
            .ok_or_else(|| missing(ResearchPhase::Analysis, "problem definition"))?;
        let questionnaire = state
            .questionnaire
            .clone()
            .ok_or_else(|| missing(ResearchPhase::Analysis, "questionnaire"))?;
        let collection = state
            .collection
            .clone()
            .ok_or_else(|| missing(ResearchPhase::Analysis, "collection"))?;
        let confidence = state
            .methodology
            .as_ref()
            .map_or(self.config.sampling.confidence, |m| m.confidence_level);

        let mut results =
            analyze_responses(&self.stats, &problem, &questionnaire, &collection, confidence);
        let summary = serde_json::to_string(&results)?;
        let reply: InsightsReply = self
            .ask_scientist(
                state,
                &format!(
                    "Interpret these survey results and list the key insights as \"insights\".\n\nResults: {summary}"
                ),
                InsightsReply::default,
            )
            .await?
            .into_value();

        results.insights = reply
            .insights
            .into_iter()
            .filter(|i| !i.trim().is_empty())
            .collect();
        if results.insights.is_empty() {
            results.insights = derived_insights(&results.leader, &results.candidate_shares, results.undecided_percent);
        }

        self.remember(ContextKind::Analysis, &results, 2);
        state.analysis = Some(results);
        Ok(())
    }

    fn project(&mut self, state: &mut ResearchState) -> Result<()> {
        let analysis = state
            .analysis
            .as_ref()
            .ok_or_else(|| missing(ResearchPhase::Projections, "analysis"))?;
        let fallback_margin = state
            .methodology
            .as_ref()
            .map_or(self.config.sampling.margin_of_error, |m| m.margin_of_error);

        let input = projection_input(analysis, fallback_margin);
        let scenarios = self.projections.scenarios(&input)?;
        let monte_carlo = self.projections.simulate(&input)?;
        info!(
            research_id = %state.id,
            trials = monte_carlo.trials,
            runoff_probability = monte_carlo.runoff_probability,
            "Projections computed"
        );

        self.remember(ContextKind::Projections, &scenarios, 3);
        state.projections = Some(ProjectionsPayload {
            input,
            scenarios,
            monte_carlo,
        });
        Ok(())
    }

    async fn recommend(&mut self, state: &mut ResearchState) -> Result<()> {
        let reply: RecommendationsReply = self
            .ask_scientist(
                state,
                "Recommend next steps as \"recommendations\", each with title, rationale, \
                 priority (high, medium or low) and actions.",
                RecommendationsReply::default,
            )
            .await?
            .into_value();

        let mut recommendations: Vec<Recommendation> = reply
            .recommendations
            .into_iter()
            .filter(|r| !r.title.trim().is_empty())
            .collect();
        if recommendations.is_empty() {
            recommendations.push(Recommendation {
                title: "Repeat the survey to confirm the trend".into(),
                rationale: "No specific recommendation was produced from the analysis.".into(),
                priority: "medium".into(),
                actions: vec!["Schedule a follow-up wave with the same methodology".into()],
            });
        }

        self.remember(ContextKind::Recommendations, &recommendations, 3);
        state.recommendations = Some(recommendations);
        Ok(())
    }

    async fn write_report(&mut self, state: &mut ResearchState) -> Result<()> {
        let mut report: ResearchReport = self
            .ask_scientist(
                state,
                "Write the final research report: title, executive_summary, key_findings and \
                 sections (heading, body).",
                ResearchReport::default,
            )
            .await?
            .into_value();

        if report.title.trim().is_empty() {
            report.title = state
                .problem_definition
                .as_ref()
                .map_or_else(|| state.topic.clone(), |p| p.title.clone());
        }
        if report.key_findings.is_empty()
            && let Some(analysis) = &state.analysis
        {
            report.key_findings = analysis.insights.clone();
        }
        if report.executive_summary.trim().is_empty() {
            let respondents = state.analysis.as_ref().map_or(0, |a| a.respondents);
            report.executive_summary = format!(
                "Survey on {} with {respondents} completed interviews.",
                state.topic
            );
        }

        state.report = Some(report);
        Ok(())
    }
}

fn missing(phase: ResearchPhase, payload: &str) -> SurveyorError {
    CoordinatorError::MissingPayload {
        phase: phase.to_string(),
        payload: payload.to_string(),
    }
    .into()
}

fn vote_question(candidates: &[String]) -> Question {
    let mut options = candidates.to_vec();
    options.push("Undecided".into());
    Question {
        id: "vote_intention".into(),
        text: "If the election were held today, who would you vote for?".into(),
        kind: QuestionKind::SingleChoice,
        options,
    }
}

fn sampling_summary(outcome: &SamplingOutcome) -> String {
    format!(
        "Method {} selected {} of {} units (required {}); stratified by [{}]; representative: {}",
        outcome.strategy.method,
        outcome.sample.len(),
        outcome.config.population_size(),
        outcome.computed_size,
        outcome.strategy.stratification_variables.join(", "),
        outcome.representativeness.represents_population,
    )
}

fn collection_summary(outcome: &CollectionOutcome) -> String {
    format!(
        "{} interviews completed, {} failed",
        outcome.responses.len(),
        outcome.failures.len()
    )
}

fn derived_insights(
    leader: &Option<String>,
    shares: &std::collections::BTreeMap<String, f64>,
    undecided_percent: f64,
) -> Vec<String> {
    let mut insights = Vec::new();
    if let Some(leader) = leader {
        let share = shares.get(leader).copied().unwrap_or_default();
        insights.push(format!("{leader} leads with {share:.1}% of respondents"));
    }
    if undecided_percent > 0.0 {
        insights.push(format!("{undecided_percent:.1}% of respondents are undecided"));
    }
    insights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MockModelInvoker;
    use serde_json::json;
    use tempfile::TempDir;

    fn population(n: usize) -> Vec<ProfileRecord> {
        (0..n)
            .map(|i| {
                ProfileRecord::new()
                    .with("id", format!("p{i}"))
                    .with("name", format!("Person {i}"))
                    .with("region", if i % 2 == 0 { "north" } else { "south" })
                    .with("age", 20 + (i % 50) as u64)
            })
            .collect()
    }

    fn coordinator(dir: &TempDir, mock: Arc<MockModelInvoker>, n: usize) -> ResearchCoordinator {
        let mut config = SurveyorConfig::default();
        config.checkpoint.dir = dir.path().to_path_buf();
        config.sampling.seed = Some(7);
        config.projections.seed = Some(7);
        config.projections.trials = 500;
        ResearchCoordinator::from_config(config, mock, population(n)).unwrap()
    }

    #[test]
    fn test_start_pins_topic() {
        let dir = TempDir::new().unwrap();
        let mut coordinator = coordinator(&dir, Arc::new(MockModelInvoker::new()), 10);
        let state = coordinator.start("Vote intention");
        assert_eq!(state.phase, ResearchPhase::ProblemDefinition);
        assert_eq!(coordinator.context().items().len(), 1);
        assert_eq!(coordinator.context().items()[0].priority, PINNED_PRIORITY);
    }

    #[tokio::test]
    async fn test_problem_definition_fallback_uses_topic() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockModelInvoker::new());
        mock.queue_scientist("I could not decide on a structure, sorry.");
        let mut coordinator = coordinator(&dir, Arc::clone(&mock), 10);
        let mut state = coordinator.start("City budget");

        coordinator.step(&mut state).await.unwrap();

        assert_eq!(state.phase, ResearchPhase::Methodology);
        let problem = state.problem_definition.as_ref().unwrap();
        assert_eq!(problem.title, "City budget");
        assert_eq!(problem.target_population, FALLBACK_POPULATION);
        assert_eq!(state.usage.calls, 1);
    }

    #[tokio::test]
    async fn test_step_writes_started_then_completed_checkpoint() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockModelInvoker::new());
        mock.queue_scientist(r#"{"title": "T", "candidates": ["A", "B"]}"#);
        let mut coordinator = coordinator(&dir, mock, 10);
        let mut state = coordinator.start("t");

        coordinator.step(&mut state).await.unwrap();

        let stages: Vec<_> = state.checkpoints.iter().map(|c| (c.phase, c.stage)).collect();
        assert_eq!(
            stages,
            vec![
                (ResearchPhase::ProblemDefinition, crate::checkpoint::CheckpointStage::Started),
                (ResearchPhase::ProblemDefinition, crate::checkpoint::CheckpointStage::Completed),
            ]
        );
        let loaded = coordinator.load_state(state.id, None).unwrap();
        assert_eq!(loaded.phase, ResearchPhase::Methodology);
        assert_eq!(loaded.problem_definition, state.problem_definition);
    }

    #[tokio::test]
    async fn test_methodology_downgrades_unusable_method() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockModelInvoker::new());
        mock.queue_scientist(r#"{"title": "T"}"#);
        mock.queue_scientist(
            r#"{"sampling_method": "stratified-proportional", "stratification_variables": ["income"], "confidence_level": 0.93}"#,
        );
        let mut coordinator = coordinator(&dir, mock, 10);
        let mut state = coordinator.start("t");
        coordinator.step(&mut state).await.unwrap();
        coordinator.step(&mut state).await.unwrap();

        let methodology = state.methodology.unwrap();
        assert!(methodology.stratification_variables.is_empty());
        assert_eq!(methodology.sampling_method, SamplingMethod::SimpleRandom);
        assert_eq!(methodology.confidence_level, 0.95);
    }

    #[tokio::test]
    async fn test_scientist_failure_is_phase_failure() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockModelInvoker::new());
        mock.fail_when_prompt_contains("Define the research problem");
        let mut coordinator = coordinator(&dir, mock, 10);
        let mut state = coordinator.start("t");

        let err = coordinator.step(&mut state).await.unwrap_err();
        assert!(matches!(
            err,
            SurveyorError::Coordinator(CoordinatorError::PhaseFailed { .. })
        ));
        assert_eq!(state.phase, ResearchPhase::ProblemDefinition);
        assert_eq!(state.errors.len(), 1);
        // The started snapshot remains as the resume point.
        let loaded = coordinator.load_state(state.id, None).unwrap();
        assert_eq!(loaded.phase, ResearchPhase::ProblemDefinition);
    }

    #[tokio::test]
    async fn test_step_on_done_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut coordinator = coordinator(&dir, Arc::new(MockModelInvoker::new()), 10);
        let mut state = coordinator.start("t");
        state.phase = ResearchPhase::Done;
        let err = coordinator.step(&mut state).await.unwrap_err();
        assert!(matches!(
            err,
            SurveyorError::Coordinator(CoordinatorError::AlreadyComplete { .. })
        ));
    }

    #[tokio::test]
    async fn test_collection_skips_settled_respondents() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(
            MockModelInvoker::new()
                .with_respondent(|_| json!({"answers": {"q1": "yes"}, "vote_intention": "A"}).to_string()),
        );
        mock.queue_scientist(r#"{"title": "T", "candidates": ["A", "B"]}"#);
        mock.queue_scientist(r#"{"sampling_method": "simple-random", "target_sample_size": 6}"#);
        mock.queue_scientist(r#"{"questions": [{"id": "q1", "text": "Agree?"}]}"#);
        let mut coordinator = coordinator(&dir, Arc::clone(&mock), 40);
        let mut state = coordinator.start("t");
        for _ in 0..4 {
            coordinator.step(&mut state).await.unwrap();
        }
        assert_eq!(state.phase, ResearchPhase::Collection);

        let first = state.sampling.as_ref().unwrap().sample.units()[0].id.clone();
        let mut partial = CollectionOutcome::default();
        partial.failures.insert(first.clone(), "earlier failure".into());
        state.collection = Some(partial);

        coordinator.step(&mut state).await.unwrap();

        let collection = state.collection.as_ref().unwrap();
        assert_eq!(collection.responses.len(), 5);
        assert!(!collection.responses.contains_key(&first));
        assert_eq!(mock.call_count(ModelRole::Respondent), 5);
        assert!(
            collection
                .responses
                .values()
                .all(|r| r.vote_intention.as_deref() == Some("A"))
        );
    }

    #[test]
    fn test_derived_insights() {
        let shares = std::collections::BTreeMap::from([("A".to_string(), 40.0)]);
        let insights = derived_insights(&Some("A".into()), &shares, 12.5);
        assert_eq!(insights.len(), 2);
        assert!(insights[0].contains("40.0%"));
        assert!(derived_insights(&None, &shares, 0.0).is_empty());
    }
}
