//! Representativeness checks comparing a sample against its population.

use super::selection::SelectedSample;
use crate::profile::ProfileRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Maximum tolerated absolute proportion difference (5 percentage points).
pub const DEFAULT_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryComparison {
    pub category: String,
    pub sample_proportion: f64,
    pub population_proportion: f64,
    pub difference: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableCheck {
    pub variable: String,
    pub categories: Vec<CategoryComparison>,
    pub max_difference: f64,
    pub valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentativenessReport {
    pub tolerance: f64,
    pub variables: Vec<VariableCheck>,
    pub represents_population: bool,
}

impl RepresentativenessReport {
    /// Variables that exceeded the tolerance.
    pub fn invalid_variables(&self) -> Vec<&str> {
        self.variables
            .iter()
            .filter(|v| !v.valid)
            .map(|v| v.variable.as_str())
            .collect()
    }
}

/// Compare per-category proportions of `sample` and `population`.
///
/// A variable is invalid when any category differs by more than `tolerance`
/// (a fraction, 0.05 = 5 points). Variables the sample did not track are
/// resolved by looking units up in the population by id. The result is a
/// pure function of its inputs.
pub fn validate_representativeness(
    sample: &SelectedSample,
    population: &[ProfileRecord],
    variables: &[String],
    tolerance: f64,
) -> RepresentativenessReport {
    let by_id: HashMap<String, &ProfileRecord> = population
        .iter()
        .filter_map(|r| r.id().map(|id| (id, r)))
        .collect();

    let checks: Vec<VariableCheck> = variables
        .iter()
        .map(|variable| {
            let population_counts = count_categories(population.iter(), variable);
            let sample_counts = match sample.distribution(variable) {
                Some(counts) => counts.clone(),
                None => {
                    let records = sample.units().iter().filter_map(|u| {
                        population
                            .get(u.population_index)
                            .filter(|r| r.id().as_deref() == Some(u.id.as_str()))
                            .or_else(|| by_id.get(&u.id).copied())
                    });
                    count_categories(records, variable)
                }
            };
            compare(variable, &sample_counts, &population_counts, tolerance)
        })
        .collect();

    let represents_population = !sample.is_empty() && checks.iter().all(|c| c.valid);
    RepresentativenessReport {
        tolerance,
        variables: checks,
        represents_population,
    }
}

fn count_categories<'a>(
    records: impl Iterator<Item = &'a ProfileRecord>,
    variable: &str,
) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.stratum_or_unknown(variable)).or_insert(0) += 1;
    }
    counts
}

fn compare(
    variable: &str,
    sample_counts: &BTreeMap<String, usize>,
    population_counts: &BTreeMap<String, usize>,
    tolerance: f64,
) -> VariableCheck {
    let sample_total: usize = sample_counts.values().sum();
    let population_total: usize = population_counts.values().sum();
    let proportion = |count: usize, total: usize| {
        if total == 0 {
            0.0
        } else {
            count as f64 / total as f64
        }
    };

    let categories: BTreeSet<&String> = sample_counts.keys().chain(population_counts.keys()).collect();
    let comparisons: Vec<CategoryComparison> = categories
        .into_iter()
        .map(|category| {
            let s = proportion(sample_counts.get(category).copied().unwrap_or(0), sample_total);
            let p = proportion(
                population_counts.get(category).copied().unwrap_or(0),
                population_total,
            );
            CategoryComparison {
                category: category.clone(),
                sample_proportion: s,
                population_proportion: p,
                difference: (s - p).abs(),
            }
        })
        .collect();

    let max_difference = comparisons
        .iter()
        .map(|c| c.difference)
        .fold(0.0_f64, f64::max);
    VariableCheck {
        variable: variable.to_string(),
        valid: sample_total > 0 && max_difference <= tolerance,
        categories: comparisons,
        max_difference,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn population() -> Vec<ProfileRecord> {
        (0..100)
            .map(|i| {
                ProfileRecord::new()
                    .with("id", format!("p{i}"))
                    .with("region", if i < 50 { "north" } else { "south" })
                    .with("party", if i % 4 == 0 { "A" } else { "B" })
            })
            .collect()
    }

    #[test]
    fn test_balanced_sample_is_representative() {
        let pop = population();
        let indices: Vec<usize> = (0..100).step_by(4).chain((2..100).step_by(4)).collect();
        let sample = SelectedSample::from_indices(&pop, &indices, &["region".to_string()]);
        let report =
            validate_representativeness(&sample, &pop, &["region".to_string()], DEFAULT_TOLERANCE);
        assert!(report.represents_population);
        assert!(report.variables[0].max_difference < 1e-9);
    }

    #[test]
    fn test_skewed_sample_is_flagged() {
        let pop = population();
        let indices: Vec<usize> = (0..40).collect();
        let sample = SelectedSample::from_indices(&pop, &indices, &["region".to_string()]);
        let report =
            validate_representativeness(&sample, &pop, &["region".to_string()], DEFAULT_TOLERANCE);
        assert!(!report.represents_population);
        assert_eq!(report.invalid_variables(), vec!["region"]);
        assert!((report.variables[0].max_difference - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_untracked_variable_resolved_from_population() {
        let pop = population();
        let indices: Vec<usize> = (0..100).step_by(2).collect();
        let sample = SelectedSample::from_indices(&pop, &indices, &[]);
        let report =
            validate_representativeness(&sample, &pop, &["party".to_string()], DEFAULT_TOLERANCE);
        // Even indices hold every "A" (i % 4 == 0), so A is 50% of the sample vs 25% overall.
        assert!(!report.represents_population);
        let a = report.variables[0]
            .categories
            .iter()
            .find(|c| c.category == "A")
            .unwrap();
        assert!((a.sample_proportion - 0.5).abs() < 1e-9);
        assert!((a.population_proportion - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_idempotent_verdict() {
        let pop = population();
        let indices: Vec<usize> = (0..60).collect();
        let vars = vec!["region".to_string(), "party".to_string()];
        let sample = SelectedSample::from_indices(&pop, &indices, &vars);
        let first = validate_representativeness(&sample, &pop, &vars, DEFAULT_TOLERANCE);
        let second = validate_representativeness(&sample, &pop, &vars, DEFAULT_TOLERANCE);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_sample_never_represents() {
        let pop = population();
        let sample = SelectedSample::from_indices(&pop, &[], &["region".to_string()]);
        let report =
            validate_representativeness(&sample, &pop, &["region".to_string()], DEFAULT_TOLERANCE);
        assert!(!report.represents_population);
    }
}
