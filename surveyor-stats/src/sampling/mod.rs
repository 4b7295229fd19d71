//! Sampling engine: sample-size theory, selection, and representativeness.

pub mod selection;
pub mod size;
pub mod validation;

pub use selection::{
    QuotaFill, QuotaTarget, SamplingEngine, SamplingMethod, SamplingRequest, SamplingStrategy,
    SelectedSample, SelectedUnit, stratum_key,
};
pub use size::{ConfidenceLevel, SampleConfig, calculate_sample_size, z_score};
pub use validation::{
    CategoryComparison, DEFAULT_TOLERANCE, RepresentativenessReport, VariableCheck,
    validate_representativeness,
};
