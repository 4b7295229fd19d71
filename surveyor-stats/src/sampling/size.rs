//! Sample-size calculation for a finite population.

use crate::error::StatsError;
use serde::{Deserialize, Serialize};

/// Default z-score used when a confidence level is not in the lookup table.
pub const DEFAULT_Z: f64 = 1.96;

/// Maximal-variance assumption for an unknown proportion.
pub const DEFAULT_PROPORTION: f64 = 0.5;

const CONFIDENCE_EPSILON: f64 = 1e-9;

/// Supported two-tailed confidence levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    #[serde(rename = "0.90")]
    Ninety,
    #[serde(rename = "0.95")]
    NinetyFive,
    #[serde(rename = "0.99")]
    NinetyNine,
}

impl ConfidenceLevel {
    pub const ALL: [ConfidenceLevel; 3] = [Self::Ninety, Self::NinetyFive, Self::NinetyNine];

    /// Parse a numeric confidence level, rejecting anything outside the table.
    pub fn from_value(level: f64) -> Result<Self, StatsError> {
        Self::ALL
            .into_iter()
            .find(|c| (c.value() - level).abs() < CONFIDENCE_EPSILON)
            .ok_or(StatsError::UnsupportedConfidence { level })
    }

    pub fn value(self) -> f64 {
        match self {
            Self::Ninety => 0.90,
            Self::NinetyFive => 0.95,
            Self::NinetyNine => 0.99,
        }
    }

    /// Two-tailed critical value.
    pub fn z_score(self) -> f64 {
        match self {
            Self::Ninety => 1.645,
            Self::NinetyFive => 1.96,
            Self::NinetyNine => 2.576,
        }
    }
}

/// Two-tailed critical value for `confidence`, defaulting to 1.96 outside the table.
pub fn z_score(confidence: f64) -> f64 {
    ConfidenceLevel::from_value(confidence)
        .map(ConfidenceLevel::z_score)
        .unwrap_or(DEFAULT_Z)
}

/// Required sample size with finite population correction:
///
/// `n = ceil( z² p(1-p) N / ( e²(N-1) + z² p(1-p) ) )`
///
/// The result is clamped to `[1, N]`. A zero population yields zero.
pub fn calculate_sample_size(
    population: usize,
    confidence: f64,
    margin_of_error: f64,
    proportion: f64,
) -> usize {
    if population == 0 {
        return 0;
    }
    let z = z_score(confidence);
    let pq = proportion * (1.0 - proportion);
    let n_pop = population as f64;

    let numerator = z * z * pq * n_pop;
    let denominator = margin_of_error * margin_of_error * (n_pop - 1.0) + z * z * pq;
    if denominator <= 0.0 || !denominator.is_finite() {
        return population;
    }

    let raw = (numerator / denominator).ceil();
    if !raw.is_finite() {
        return population;
    }
    (raw as usize).clamp(1, population)
}

/// Parameters for a sample-size calculation.
///
/// The computed size is cached; changing any parameter through a setter
/// invalidates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleConfig {
    population_size: usize,
    confidence: f64,
    margin_of_error: f64,
    #[serde(default = "default_proportion")]
    proportion: f64,
    #[serde(default)]
    computed_size: Option<usize>,
}

fn default_proportion() -> f64 {
    DEFAULT_PROPORTION
}

impl SampleConfig {
    pub fn new(population_size: usize, confidence: f64, margin_of_error: f64) -> Self {
        Self {
            population_size,
            confidence,
            margin_of_error,
            proportion: DEFAULT_PROPORTION,
            computed_size: None,
        }
    }

    pub fn with_proportion(mut self, proportion: f64) -> Self {
        self.proportion = proportion;
        self.computed_size = None;
        self
    }

    pub fn population_size(&self) -> usize {
        self.population_size
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn margin_of_error(&self) -> f64 {
        self.margin_of_error
    }

    pub fn proportion(&self) -> f64 {
        self.proportion
    }

    /// Previously computed size, if still valid.
    pub fn computed_size(&self) -> Option<usize> {
        self.computed_size
    }

    /// Reject configurations that cannot produce a meaningful sample.
    pub fn validate(&self) -> Result<ConfidenceLevel, StatsError> {
        if self.population_size == 0 {
            return Err(StatsError::InvalidPopulation {
                size: self.population_size,
            });
        }
        let level = ConfidenceLevel::from_value(self.confidence)?;
        if !(self.margin_of_error > 0.0 && self.margin_of_error < 1.0) {
            return Err(StatsError::InvalidMargin {
                margin: self.margin_of_error,
            });
        }
        if !(self.proportion > 0.0 && self.proportion < 1.0) {
            return Err(StatsError::InvalidProportion {
                proportion: self.proportion,
            });
        }
        Ok(level)
    }

    /// Validate and compute the required sample size, caching the result.
    pub fn sample_size(&mut self) -> Result<usize, StatsError> {
        if let Some(size) = self.computed_size {
            return Ok(size);
        }
        self.validate()?;
        let size = calculate_sample_size(
            self.population_size,
            self.confidence,
            self.margin_of_error,
            self.proportion,
        );
        self.computed_size = Some(size);
        Ok(size)
    }

    pub fn set_population_size(&mut self, population_size: usize) {
        self.population_size = population_size;
        self.computed_size = None;
    }

    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = confidence;
        self.computed_size = None;
    }

    pub fn set_margin_of_error(&mut self, margin_of_error: f64) {
        self.margin_of_error = margin_of_error;
        self.computed_size = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_sample_size() {
        let n = calculate_sample_size(1000, 0.95, 0.03, 0.5);
        assert!((511..=521).contains(&n), "got {n}");
    }

    #[test]
    fn test_unknown_confidence_defaults_to_196() {
        assert_eq!(z_score(0.80), DEFAULT_Z);
        assert_eq!(
            calculate_sample_size(5000, 0.80, 0.05, 0.5),
            calculate_sample_size(5000, 0.95, 0.05, 0.5)
        );
    }

    #[test]
    fn test_z_table() {
        assert_eq!(z_score(0.90), 1.645);
        assert_eq!(z_score(0.95), 1.96);
        assert_eq!(z_score(0.99), 2.576);
    }

    #[test]
    fn test_bounded_by_population() {
        assert_eq!(calculate_sample_size(10, 0.99, 0.01, 0.5), 10);
        assert_eq!(calculate_sample_size(1, 0.95, 0.05, 0.5), 1);
        assert_eq!(calculate_sample_size(0, 0.95, 0.05, 0.5), 0);
    }

    #[test]
    fn test_config_validation() {
        assert_eq!(
            SampleConfig::new(0, 0.95, 0.05).validate(),
            Err(StatsError::InvalidPopulation { size: 0 })
        );
        assert_eq!(
            SampleConfig::new(100, 0.85, 0.05).validate(),
            Err(StatsError::UnsupportedConfidence { level: 0.85 })
        );
        assert!(matches!(
            SampleConfig::new(100, 0.95, 0.0).validate(),
            Err(StatsError::InvalidMargin { .. })
        ));
        assert_eq!(
            SampleConfig::new(100, 0.99, 0.05).validate(),
            Ok(ConfidenceLevel::NinetyNine)
        );
    }

    #[test]
    fn test_reconfiguration_invalidates_cached_size() {
        let mut config = SampleConfig::new(1000, 0.95, 0.05);
        let first = config.sample_size().unwrap();
        assert_eq!(config.computed_size(), Some(first));

        config.set_margin_of_error(0.03);
        assert_eq!(config.computed_size(), None);
        let second = config.sample_size().unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_confidence_serde_names() {
        let json = serde_json::to_string(&ConfidenceLevel::NinetyNine).unwrap();
        assert_eq!(json, "\"0.99\"");
    }
}
