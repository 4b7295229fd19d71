//! Descriptive statistics over collected responses.

use crate::inference::{
    self, MarginOfErrorResult, TestResult, chi_square_goodness_of_fit, chi_square_independence,
    pearson_correlation, two_proportion_z_test,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One row of a frequency table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyRow {
    pub category: String,
    pub count: usize,
    /// Relative frequency in percent.
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalSummary {
    pub variable: String,
    pub total: usize,
    pub frequencies: Vec<FrequencyRow>,
    pub mode: Option<String>,
}

impl CategoricalSummary {
    pub fn count_of(&self, category: &str) -> usize {
        self.frequencies
            .iter()
            .find(|r| r.category == category)
            .map_or(0, |r| r.count)
    }

    pub fn percent_of(&self, category: &str) -> f64 {
        self.frequencies
            .iter()
            .find(|r| r.category == category)
            .map_or(0.0, |r| r.percent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Present only when a single value occurs most often (and more than once).
    pub mode: Option<f64>,
    pub variance: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub range: f64,
    /// `std_dev / mean`; absent when the mean is zero.
    pub coefficient_of_variation: Option<f64>,
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
}

/// Frequency table sorted by descending count, then category.
pub fn frequency_table<S: AsRef<str>>(values: &[S]) -> Vec<FrequencyRow> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value.as_ref()).or_insert(0) += 1;
    }
    let total = values.len();
    let mut rows: Vec<FrequencyRow> = counts
        .into_iter()
        .map(|(category, count)| FrequencyRow {
            category: category.to_string(),
            count,
            percent: if total == 0 {
                0.0
            } else {
                count as f64 / total as f64 * 100.0
            },
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));
    rows
}

pub fn describe_categorical<S: AsRef<str>>(variable: &str, values: &[S]) -> CategoricalSummary {
    let frequencies = frequency_table(values);
    CategoricalSummary {
        variable: variable.to_string(),
        total: values.len(),
        mode: frequencies.first().map(|r| r.category.clone()),
        frequencies,
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample variance with an `N - 1` denominator; `None` below two values.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some(ss / (values.len() - 1) as f64)
}

/// Percentile (0–100) of already sorted values, linearly interpolating
/// between order statistics.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    Some(sorted[lower] + fraction * (sorted[upper] - sorted[lower]))
}

fn unique_mode(sorted: &[f64]) -> Option<f64> {
    let mut best: Option<(f64, usize)> = None;
    let mut tied = false;
    let mut i = 0;
    while i < sorted.len() {
        let value = sorted[i];
        let mut run = 1;
        while i + run < sorted.len() && sorted[i + run] == value {
            run += 1;
        }
        match best {
            Some((_, count)) if run > count => {
                best = Some((value, run));
                tied = false;
            }
            Some((_, count)) if run == count => tied = true,
            None => best = Some((value, run)),
            _ => {}
        }
        i += run;
    }
    match best {
        Some((value, count)) if count > 1 && !tied => Some(value),
        _ => None,
    }
}

/// Summary statistics for a numeric variable. Non-finite values are ignored.
pub fn describe_numeric(values: &[f64]) -> Option<NumericSummary> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let m = mean(&sorted)?;
    let variance = sample_variance(&sorted).unwrap_or(0.0);
    let std_dev = variance.sqrt();
    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let q1 = percentile(&sorted, 25.0)?;
    let q3 = percentile(&sorted, 75.0)?;

    Some(NumericSummary {
        count: sorted.len(),
        mean: m,
        median: percentile(&sorted, 50.0)?,
        mode: unique_mode(&sorted),
        variance,
        std_dev,
        min,
        max,
        range: max - min,
        coefficient_of_variation: (m != 0.0).then(|| std_dev / m.abs()),
        q1,
        q3,
        iqr: q3 - q1,
    })
}

/// Two-way table of counts for a pair of categorical variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContingencyTable {
    pub row_variable: String,
    pub column_variable: String,
    pub row_labels: Vec<String>,
    pub column_labels: Vec<String>,
    pub counts: Vec<Vec<usize>>,
}

impl ContingencyTable {
    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn row_totals(&self) -> Vec<usize> {
        self.counts.iter().map(|r| r.iter().sum()).collect()
    }

    pub fn column_totals(&self) -> Vec<usize> {
        (0..self.column_labels.len())
            .map(|c| self.counts.iter().map(|r| r[c]).sum())
            .collect()
    }

    pub fn count(&self, row: &str, column: &str) -> usize {
        let r = self.row_labels.iter().position(|l| l == row);
        let c = self.column_labels.iter().position(|l| l == column);
        match (r, c) {
            (Some(r), Some(c)) => self.counts[r][c],
            _ => 0,
        }
    }
}

/// Cross-tabulate `(row, column)` observation pairs.
pub fn crosstab<R: AsRef<str>, C: AsRef<str>>(
    row_variable: &str,
    column_variable: &str,
    pairs: &[(R, C)],
) -> ContingencyTable {
    let row_labels: Vec<String> = pairs
        .iter()
        .map(|(r, _)| r.as_ref().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let column_labels: Vec<String> = pairs
        .iter()
        .map(|(_, c)| c.as_ref().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut counts = vec![vec![0usize; column_labels.len()]; row_labels.len()];
    for (r, c) in pairs {
        let ri = row_labels.iter().position(|l| l == r.as_ref());
        let ci = column_labels.iter().position(|l| l == c.as_ref());
        if let (Some(ri), Some(ci)) = (ri, ci) {
            counts[ri][ci] += 1;
        }
    }

    ContingencyTable {
        row_variable: row_variable.to_string(),
        column_variable: column_variable.to_string(),
        row_labels,
        column_labels,
        counts,
    }
}

/// Stateless facade over the descriptive and inferential functions, handed
/// to the coordinator as an explicit collaborator.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticalEngine;

impl StatisticalEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn describe_categorical<S: AsRef<str>>(&self, variable: &str, values: &[S]) -> CategoricalSummary {
        describe_categorical(variable, values)
    }

    pub fn describe_numeric(&self, values: &[f64]) -> Option<NumericSummary> {
        describe_numeric(values)
    }

    pub fn crosstab<R: AsRef<str>, C: AsRef<str>>(
        &self,
        row_variable: &str,
        column_variable: &str,
        pairs: &[(R, C)],
    ) -> ContingencyTable {
        crosstab(row_variable, column_variable, pairs)
    }

    pub fn chi_square_goodness_of_fit(
        &self,
        observed: &BTreeMap<String, f64>,
        expected: Option<&BTreeMap<String, f64>>,
    ) -> TestResult {
        chi_square_goodness_of_fit(observed, expected)
    }

    pub fn chi_square_independence(&self, table: &ContingencyTable) -> TestResult {
        chi_square_independence(table)
    }

    pub fn two_proportion_z_test(&self, p1: f64, n1: usize, p2: f64, n2: usize) -> TestResult {
        two_proportion_z_test(p1, n1, p2, n2)
    }

    pub fn margin_of_error(&self, proportion: f64, n: usize, confidence: f64) -> MarginOfErrorResult {
        inference::margin_of_error(proportion, n, confidence)
    }

    pub fn pearson_correlation(&self, x: &[f64], y: &[f64]) -> TestResult {
        pearson_correlation(x, y)
    }
}
