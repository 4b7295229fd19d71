//! # surveyor-stats: quantitative engines for survey research
//!
//! Pure, synchronous building blocks used by the research coordinator:
//!
//! - **Profiles**: attribute-bag population records with typed accessors
//! - **Sampling**: sample-size calculation, selection algorithms, representativeness checks
//! - **Descriptive**: frequency tables and numeric summaries
//! - **Inference**: chi-square, two-proportion z, margin of error, Pearson correlation
//! - **Projections**: electoral scenarios and Monte Carlo simulation

pub mod descriptive;
pub mod distributions;
pub mod error;
pub mod inference;
pub mod profile;
pub mod projections;
pub mod sampling;

pub use descriptive::{CategoricalSummary, FrequencyRow, NumericSummary, StatisticalEngine};
pub use error::StatsError;
pub use inference::{ConfidenceInterval, MarginOfErrorResult, TestResult};
pub use profile::ProfileRecord;
pub use projections::{
    CandidateProjection, CandidateShare, MonteCarloConfig, MonteCarloResult, ProjectionEngine,
    ProjectionInput, ProjectionScenario, ScenarioKind,
};
pub use sampling::{
    ConfidenceLevel, QuotaTarget, RepresentativenessReport, SampleConfig, SamplingEngine,
    SamplingMethod, SamplingRequest, SamplingStrategy, SelectedSample, SelectedUnit,
    calculate_sample_size, validate_representativeness,
};
