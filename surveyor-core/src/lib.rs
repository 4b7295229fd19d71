//! # Surveyor Core
//!
//! Orchestration layer for automated survey research. Provides the
//! resumable research coordinator, the context budget manager, checkpoint
//! storage, the model invocation seam, configuration, and logging.
//! Quantitative engines live in `surveyor-stats`.

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod logging;
pub mod model;
pub mod persistence;
pub mod research;

// Re-export commonly used types at the crate root.
pub use checkpoint::{
    CheckpointInfo, CheckpointManager, CheckpointMetadata, CheckpointRecord, CheckpointStage,
};
pub use config::{ConfigOverrides, SurveyorConfig, load_config};
pub use context::{ContextItem, ContextKind, ContextManager};
pub use error::{CheckpointError, ConfigError, CoordinatorError, ModelError, Result, SurveyorError};
pub use extract::{Extracted, extract_json, extract_json_or};
pub use logging::init_tracing;
pub use model::{
    MockModelInvoker, ModelInvoker, ModelRequest, ModelResponse, ModelRole, TokenCounter,
};
pub use research::{
    CoordinatorDeps, ProgressEvent, ProgressSink, ResearchCoordinator, ResearchPhase,
    ResearchState,
};
pub use surveyor_stats;
