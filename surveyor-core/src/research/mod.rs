//! Survey research pipeline.
//!
//! Nine working phases run strictly in order:
//! 1. **Problem definition**: scope, candidates and key variables
//! 2. **Methodology**: sampling design and precision targets
//! 3. **Sampling**: sample size and unit selection
//! 4. **Questionnaire**: interview instrument
//! 5. **Collection**: concurrent respondent interviews
//! 6. **Analysis**: descriptive and inferential statistics
//! 7. **Projections**: scenarios and Monte Carlo simulation
//! 8. **Recommendations**: next steps
//! 9. **Report**: final write-up
//!
//! Each phase is checkpointed on entry and on completion, so a run can be
//! resumed after any failure.

pub mod analysis;
pub mod coordinator;
pub mod phase;
pub mod progress;
pub mod state;

pub use coordinator::{CoordinatorDeps, ResearchCoordinator};
pub use phase::ResearchPhase;
pub use progress::{ChannelProgress, NoOpProgress, ProgressEvent, ProgressSink, RecordingProgress};
pub use state::{
    AnalysisResults, CollectionOutcome, InterviewResponse, Methodology, ProblemDefinition,
    ProjectionsPayload, Question, QuestionKind, Questionnaire, Recommendation, ResearchReport,
    ResearchState, TokenUsage,
};
