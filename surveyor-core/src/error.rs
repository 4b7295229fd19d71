//! Error types for the Surveyor core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering model invocation, checkpoint storage, configuration, and the
//! research pipeline itself.

use std::path::PathBuf;
use surveyor_stats::StatsError;

/// Top-level error type for the Surveyor core library.
#[derive(Debug, thiserror::Error)]
pub enum SurveyorError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("Statistics error: {0}")]
    Stats(#[from] StatsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures of the external model collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    #[error("{role} request failed: {message}")]
    Request { role: String, message: String },

    #[error("{role} request timed out after {timeout_secs}s")]
    Timeout { role: String, timeout_secs: u64 },

    #[error("{role} returned an empty response")]
    EmptyResponse { role: String },
}

/// Errors from checkpoint storage.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("No checkpoint for research {research_id}{}", phase_suffix(.phase))]
    NotFound {
        research_id: String,
        phase: Option<String>,
    },

    #[error(
        "Checkpoint integrity failure for {research_id}/{phase}: expected hash {expected}, computed {actual}"
    )]
    Integrity {
        research_id: String,
        phase: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid checkpoint key '{key}'")]
    InvalidKey { key: String },

    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checkpoint archive error at {path}: {message}")]
    Archive { path: PathBuf, message: String },
}

fn phase_suffix(phase: &Option<String>) -> String {
    phase
        .as_deref()
        .map(|p| format!(" at phase '{p}'"))
        .unwrap_or_default()
}

/// Invalid configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

/// Errors raised by the research pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Invalid phase transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Phase '{phase}' failed: {message}")]
    PhaseFailed { phase: String, message: String },

    #[error("Phase '{phase}' requires the {payload} payload")]
    MissingPayload { phase: String, payload: String },

    #[error("Research {research_id} is already complete")]
    AlreadyComplete { research_id: String },

    #[error("Unknown research phase '{name}'")]
    UnknownPhase { name: String },
}

/// Result alias used throughout the core library.
pub type Result<T> = std::result::Result<T, SurveyorError>;
