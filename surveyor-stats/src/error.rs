//! Error types for the surveyor-stats crate.

use thiserror::Error;

/// Errors raised before any sampling or projection work begins.
///
/// Statistical degeneracy (zero variance, empty categories) is never an
/// error: tests return a non-significant [`crate::TestResult`] instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StatsError {
    #[error("Population size must be positive, got {size}")]
    InvalidPopulation { size: usize },

    #[error("Unsupported confidence level {level}; expected one of 0.90, 0.95, 0.99")]
    UnsupportedConfidence { level: f64 },

    #[error("Margin of error must be in (0, 1), got {margin}")]
    InvalidMargin { margin: f64 },

    #[error("Assumed proportion must be in (0, 1), got {proportion}")]
    InvalidProportion { proportion: f64 },

    #[error("Unknown stratification variable: {variable}")]
    UnknownVariable { variable: String },

    #[error("Invalid quota for {variable}={category}: {reason}")]
    InvalidQuota {
        variable: String,
        category: String,
        reason: String,
    },

    #[error("Empty input: {what}")]
    EmptyInput { what: String },
}
