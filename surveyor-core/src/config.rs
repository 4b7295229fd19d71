//! Settings for a research run.
//!
//! A run reads its model prices, context budget, interview concurrency,
//! checkpoint location, sampling defaults and projection trials from
//! `SurveyorConfig`. [`load_config`] stacks the built-in values, a per-user
//! `config.toml`, the research workspace's `.surveyor/config.toml`,
//! `SURVEYOR_*` variables and finally individual [`ConfigOverrides`] keys.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use surveyor_stats::ConfidenceLevel;
use surveyor_stats::sampling::DEFAULT_TOLERANCE;

use crate::error::ConfigError;

/// Top-level configuration for a research run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyorConfig {
    pub model: ModelConfig,
    pub context: ContextConfig,
    pub collection: CollectionConfig,
    pub checkpoint: CheckpointConfig,
    pub sampling: SamplingConfig,
    pub projections: ProjectionsConfig,
    pub logging: LoggingConfig,
}

/// Model used for the scientist and respondent roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier, also used to pick a tokenizer.
    pub name: String,
    /// Context window size for the model.
    pub context_window: usize,
    /// Maximum tokens to generate for scientist calls.
    pub scientist_max_tokens: usize,
    /// Maximum tokens to generate for respondent interviews.
    pub respondent_max_tokens: usize,
    /// USD charged per million prompt tokens, used for the run's cost tally.
    pub input_cost_per_million: f64,
    /// USD charged per million completion tokens.
    pub output_cost_per_million: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gpt-4o".to_string(),
            context_window: 128_000,
            scientist_max_tokens: 4096,
            respondent_max_tokens: 1024,
            input_cost_per_million: 2.50,
            output_cost_per_million: 10.00,
        }
    }
}

impl ModelConfig {
    /// Cost in USD for a call with the given token counts.
    pub fn cost(&self, input_tokens: usize, output_tokens: usize) -> f64 {
        (input_tokens as f64 * self.input_cost_per_million
            + output_tokens as f64 * self.output_cost_per_million)
            / 1_000_000.0
    }
}

/// Context budget settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Maximum tokens of accumulated research context.
    pub budget_tokens: usize,
    /// Fraction of the budget above which eviction starts.
    pub eviction_threshold: f64,
    /// Evicted items with a priority below this bound are summarized.
    pub summary_priority_bound: u8,
    /// Characters kept from an evicted item's content.
    pub summary_length: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_tokens: 32_000,
            eviction_threshold: 0.8,
            summary_priority_bound: 8,
            summary_length: 200,
        }
    }
}

/// Interview dispatch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Maximum simultaneous in-flight interviews.
    pub max_concurrent: usize,
    /// Per-interview timeout in seconds.
    pub interview_timeout_secs: u64,
    /// Completed interviews between intermediate checkpoints.
    pub checkpoint_interval: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            interview_timeout_secs: 120,
            checkpoint_interval: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Root directory for checkpoint records.
    pub dir: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".surveyor").join("checkpoints"),
        }
    }
}

/// Sampling defaults applied when the methodology leaves them open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub confidence: f64,
    pub margin_of_error: f64,
    pub proportion: f64,
    /// Representativeness tolerance as a fraction.
    pub tolerance: f64,
    /// Seed for reproducible selection.
    pub seed: Option<u64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            confidence: 0.95,
            margin_of_error: 0.05,
            proportion: 0.5,
            tolerance: DEFAULT_TOLERANCE,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionsConfig {
    pub trials: usize,
    pub seed: Option<u64>,
}

impl Default for ProjectionsConfig {
    fn default() -> Self {
        Self {
            trials: surveyor_stats::projections::DEFAULT_TRIALS,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    /// Directory for rolling log files; stderr only when unset.
    pub dir: Option<PathBuf>,
    /// Write the file log as JSON lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: true,
        }
    }
}

impl SurveyorConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: String| ConfigError::Invalid {
            field: field.to_string(),
            reason,
        };

        if self.collection.max_concurrent == 0 {
            return Err(invalid(
                "collection.max_concurrent",
                "must be at least 1".into(),
            ));
        }
        if self.collection.checkpoint_interval == 0 {
            return Err(invalid(
                "collection.checkpoint_interval",
                "must be at least 1".into(),
            ));
        }
        if self.context.budget_tokens == 0 {
            return Err(invalid("context.budget_tokens", "must be positive".into()));
        }
        let threshold = self.context.eviction_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(invalid(
                "context.eviction_threshold",
                format!("must be in (0, 1], got {threshold}"),
            ));
        }
        if ConfidenceLevel::from_value(self.sampling.confidence).is_err() {
            return Err(invalid(
                "sampling.confidence",
                format!(
                    "unsupported level {}; expected 0.90, 0.95 or 0.99",
                    self.sampling.confidence
                ),
            ));
        }
        let margin = self.sampling.margin_of_error;
        if !(margin > 0.0 && margin < 1.0) {
            return Err(invalid(
                "sampling.margin_of_error",
                format!("must be in (0, 1), got {margin}"),
            ));
        }
        if self.projections.trials == 0 {
            return Err(invalid("projections.trials", "must be positive".into()));
        }
        Ok(())
    }
}

/// Individual settings that win over every file and environment layer.
///
/// Keys are dotted paths into [`SurveyorConfig`], e.g. `collection.max_concurrent`.
/// Only the keys set here are replaced; everything else keeps its layered value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    entries: Vec<(String, serde_json::Value)>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Config files consulted for a workspace, lowest precedence first.
fn config_files(workspace: Option<&Path>) -> Vec<PathBuf> {
    let user = directories::ProjectDirs::from("org", "surveyor", "surveyor")
        .map(|dirs| dirs.config_dir().join("config.toml"));
    let local = workspace.map(|ws| ws.join(".surveyor").join("config.toml"));
    user.into_iter()
        .chain(local)
        .filter(|path| path.is_file())
        .collect()
}

/// Resolve the run configuration.
///
/// Later layers win key by key: built-in values, then the user and
/// workspace files, then `SURVEYOR_*` variables (`__` separates sections,
/// as in `SURVEYOR_COLLECTION__MAX_CONCURRENT`), then `overrides`.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<SurveyorConfig, Box<figment::Error>> {
    let layered = config_files(workspace).into_iter().fold(
        Figment::from(Serialized::defaults(SurveyorConfig::default())),
        |figment, path| figment.merge(Toml::file(path)),
    );
    let layered = layered.merge(Env::prefixed("SURVEYOR_").split("__"));

    overrides
        .entries
        .iter()
        .fold(layered, |figment, (key, value)| {
            figment.merge(Serialized::default(key, value.clone()))
        })
        .extract()
        .map_err(Box::new)
}
