//! Inferential tests over collected responses.
//!
//! Every test degrades gracefully: degenerate input (too few observations,
//! zero variance, an empty category) produces a non-significant, zero-effect
//! [`TestResult`] whose interpretation explains why.

use crate::descriptive::ContingencyTable;
use crate::distributions::{chi_square_p_value, normal_two_tailed_p, t_two_tailed_p};
use crate::sampling::z_score;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Conventional alpha for the `significant` flag.
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

const Z_95: f64 = 1.96;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub level: f64,
}

/// Outcome of a statistical test. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_name: String,
    pub statistic: f64,
    pub p_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degrees_of_freedom: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect_size_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_interval: Option<ConfidenceInterval>,
    pub significant: bool,
    pub interpretation: String,
}

impl TestResult {
    fn degenerate(test_name: &str, reason: impl Into<String>) -> Self {
        Self {
            test_name: test_name.to_string(),
            statistic: 0.0,
            p_value: 1.0,
            degrees_of_freedom: None,
            effect_size: Some(0.0),
            effect_size_label: Some("none".into()),
            confidence_interval: None,
            significant: false,
            interpretation: format!("Test not applicable: {}", reason.into()),
        }
    }

    /// Whether the result came from the degenerate-input path.
    pub fn is_degenerate(&self) -> bool {
        self.interpretation.starts_with("Test not applicable")
    }
}

fn cramers_v_label(v: f64) -> &'static str {
    if v < 0.1 {
        "negligible"
    } else if v < 0.3 {
        "small"
    } else if v < 0.5 {
        "medium"
    } else {
        "large"
    }
}

fn cohens_h_label(h: f64) -> &'static str {
    if h < 0.2 {
        "negligible"
    } else if h < 0.5 {
        "small"
    } else if h < 0.8 {
        "medium"
    } else {
        "large"
    }
}

fn correlation_label(r: f64) -> &'static str {
    let r = r.abs();
    if r < 0.1 {
        "negligible"
    } else if r < 0.3 {
        "weak"
    } else if r < 0.5 {
        "moderate"
    } else {
        "strong"
    }
}

fn significance_phrase(p: f64) -> &'static str {
    if p < SIGNIFICANCE_LEVEL {
        "statistically significant"
    } else {
        "not statistically significant"
    }
}

/// Chi-square goodness-of-fit. Expected counts default to uniform; supplied
/// expectations are treated as weights and rescaled to the observed total.
pub fn chi_square_goodness_of_fit(
    observed: &BTreeMap<String, f64>,
    expected: Option<&BTreeMap<String, f64>>,
) -> TestResult {
    const NAME: &str = "chi-square goodness-of-fit";

    let k = observed.len();
    if k < 2 {
        return TestResult::degenerate(NAME, "fewer than two categories");
    }
    let total: f64 = observed.values().sum();
    if total <= 0.0 {
        return TestResult::degenerate(NAME, "no observations");
    }

    let expected_counts: Vec<f64> = match expected {
        None => vec![total / k as f64; k],
        Some(weights) => {
            let raw: Vec<f64> = observed
                .keys()
                .map(|c| weights.get(c).copied().unwrap_or(0.0))
                .collect();
            let weight_total: f64 = raw.iter().sum();
            if weight_total <= 0.0 {
                return TestResult::degenerate(NAME, "expected distribution is empty");
            }
            raw.iter().map(|w| w / weight_total * total).collect()
        }
    };
    if let Some((category, _)) = observed
        .keys()
        .zip(&expected_counts)
        .find(|(_, e)| **e <= 0.0)
    {
        return TestResult::degenerate(NAME, format!("zero expected count in category '{category}'"));
    }

    let statistic: f64 = observed
        .values()
        .zip(&expected_counts)
        .map(|(o, e)| (o - e).powi(2) / e)
        .sum();
    let df = k - 1;
    let p_value = chi_square_p_value(statistic, df);
    let v = (statistic / (total * df as f64)).sqrt().min(1.0);
    let label = cramers_v_label(v);

    TestResult {
        test_name: NAME.into(),
        statistic,
        p_value,
        degrees_of_freedom: Some(df),
        effect_size: Some(v),
        effect_size_label: Some(label.into()),
        confidence_interval: None,
        significant: p_value < SIGNIFICANCE_LEVEL,
        interpretation: format!(
            "Observed distribution is {} from expected (χ² = {statistic:.2}, df = {df}, p = {p_value:.4}); {label} effect (Cramér's V = {v:.3})",
            if p_value < SIGNIFICANCE_LEVEL {
                "significantly different"
            } else {
                "not significantly different"
            },
        ),
    }
}

/// Chi-square test of independence over a contingency table.
pub fn chi_square_independence(table: &ContingencyTable) -> TestResult {
    const NAME: &str = "chi-square independence";

    let rows = table.row_labels.len();
    let cols = table.column_labels.len();
    if rows < 2 || cols < 2 {
        return TestResult::degenerate(NAME, "table needs at least two rows and two columns");
    }
    let total = table.total() as f64;
    if total <= 0.0 {
        return TestResult::degenerate(NAME, "no observations");
    }
    let row_totals = table.row_totals();
    let col_totals = table.column_totals();
    if let Some(i) = row_totals.iter().position(|&t| t == 0) {
        return TestResult::degenerate(NAME, format!("empty row '{}'", table.row_labels[i]));
    }
    if let Some(i) = col_totals.iter().position(|&t| t == 0) {
        return TestResult::degenerate(NAME, format!("empty column '{}'", table.column_labels[i]));
    }

    let mut statistic = 0.0;
    for (r, row) in table.counts.iter().enumerate() {
        for (c, &observed) in row.iter().enumerate() {
            let expected = row_totals[r] as f64 * col_totals[c] as f64 / total;
            statistic += (observed as f64 - expected).powi(2) / expected;
        }
    }
    let df = (rows - 1) * (cols - 1);
    let p_value = chi_square_p_value(statistic, df);
    let min_dim = (rows - 1).min(cols - 1) as f64;
    let v = (statistic / (total * min_dim)).sqrt().min(1.0);
    let label = cramers_v_label(v);

    TestResult {
        test_name: NAME.into(),
        statistic,
        p_value,
        degrees_of_freedom: Some(df),
        effect_size: Some(v),
        effect_size_label: Some(label.into()),
        confidence_interval: None,
        significant: p_value < SIGNIFICANCE_LEVEL,
        interpretation: format!(
            "Association between {} and {} is {} (χ² = {statistic:.2}, df = {df}, p = {p_value:.4}); {label} effect (Cramér's V = {v:.3})",
            table.row_variable,
            table.column_variable,
            significance_phrase(p_value),
        ),
    }
}

/// Two-proportion z-test with proportions given as fractions.
///
/// The statistic uses the pooled standard error; the 95% interval for
/// `p1 - p2` uses the unpooled one.
pub fn two_proportion_z_test(p1: f64, n1: usize, p2: f64, n2: usize) -> TestResult {
    const NAME: &str = "two-proportion z-test";

    if n1 == 0 || n2 == 0 {
        return TestResult::degenerate(NAME, "one of the groups has no observations");
    }
    if !(0.0..=1.0).contains(&p1) || !(0.0..=1.0).contains(&p2) {
        return TestResult::degenerate(NAME, "proportions must lie in [0, 1]");
    }
    let (n1f, n2f) = (n1 as f64, n2 as f64);
    let pooled = (n1f * p1 + n2f * p2) / (n1f + n2f);
    let se = (pooled * (1.0 - pooled) * (1.0 / n1f + 1.0 / n2f)).sqrt();
    if se <= 0.0 {
        return TestResult::degenerate(NAME, "zero variance in the pooled proportion");
    }

    let diff = p1 - p2;
    let z = diff / se;
    let p_value = normal_two_tailed_p(z);
    let se_unpooled = (p1 * (1.0 - p1) / n1f + p2 * (1.0 - p2) / n2f).sqrt();
    let h = (2.0 * p1.sqrt().asin() - 2.0 * p2.sqrt().asin()).abs();
    let label = cohens_h_label(h);

    TestResult {
        test_name: NAME.into(),
        statistic: z,
        p_value,
        degrees_of_freedom: None,
        effect_size: Some(h),
        effect_size_label: Some(label.into()),
        confidence_interval: Some(ConfidenceInterval {
            lower: diff - Z_95 * se_unpooled,
            upper: diff + Z_95 * se_unpooled,
            level: 0.95,
        }),
        significant: p_value < SIGNIFICANCE_LEVEL,
        interpretation: format!(
            "Difference of {:.1} points is {} (z = {z:.2}, p = {p_value:.4}); {label} effect (Cohen's h = {h:.3})",
            diff * 100.0,
            significance_phrase(p_value),
        ),
    }
}

/// Margin of error for a single proportion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginOfErrorResult {
    pub proportion: f64,
    pub sample_size: usize,
    pub confidence: f64,
    pub z: f64,
    /// Margin as a fraction.
    pub margin: f64,
    /// Interval bounds in percentage points, clamped to [0, 100].
    pub lower_percent: f64,
    pub upper_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl MarginOfErrorResult {
    pub fn margin_points(&self) -> f64 {
        self.margin * 100.0
    }
}

/// `z · sqrt(p(1 − p)/n)` with `z` looked up for `confidence`.
pub fn margin_of_error(proportion: f64, n: usize, confidence: f64) -> MarginOfErrorResult {
    let p = proportion.clamp(0.0, 1.0);
    let z = z_score(confidence);
    let (margin, note) = if n == 0 {
        (0.0, Some("no observations; margin undefined".to_string()))
    } else {
        (z * (p * (1.0 - p) / n as f64).sqrt(), None)
    };
    MarginOfErrorResult {
        proportion: p,
        sample_size: n,
        confidence,
        z,
        margin,
        lower_percent: ((p - margin) * 100.0).clamp(0.0, 100.0),
        upper_percent: ((p + margin) * 100.0).clamp(0.0, 100.0),
        note,
    }
}

/// Pearson product-moment correlation over paired samples.
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> TestResult {
    const NAME: &str = "pearson correlation";

    if x.len() != y.len() {
        return TestResult::degenerate(NAME, "samples are not paired (length mismatch)");
    }
    let n = x.len();
    if n < 3 {
        return TestResult::degenerate(NAME, "fewer than 3 paired observations");
    }
    let nf = n as f64;
    let mean_x = x.iter().sum::<f64>() / nf;
    let mean_y = y.iter().sum::<f64>() / nf;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mean_x, b - mean_y);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return TestResult::degenerate(NAME, "zero variance in one of the samples");
    }

    let r = (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0);
    let df = n - 2;
    let t = if (1.0 - r * r) <= f64::EPSILON {
        f64::INFINITY.copysign(r)
    } else {
        r * (df as f64 / (1.0 - r * r)).sqrt()
    };
    let p_value = t_two_tailed_p(t, df, n);
    let label = correlation_label(r);

    // Fisher z interval, defined once there are more than 3 observations.
    let confidence_interval = (n > 3 && r.abs() < 1.0).then(|| {
        let fz = r.atanh();
        let se = 1.0 / (nf - 3.0).sqrt();
        ConfidenceInterval {
            lower: (fz - Z_95 * se).tanh(),
            upper: (fz + Z_95 * se).tanh(),
            level: 0.95,
        }
    });

    TestResult {
        test_name: NAME.into(),
        statistic: r,
        p_value,
        degrees_of_freedom: Some(df),
        effect_size: Some(r * r),
        effect_size_label: Some(label.into()),
        confidence_interval,
        significant: p_value < SIGNIFICANCE_LEVEL,
        interpretation: format!(
            "{} {} correlation (r = {r:.3}, r² = {:.3}, p = {p_value:.4}) is {}",
            label[..1].to_uppercase() + &label[1..],
            if r >= 0.0 { "positive" } else { "negative" },
            r * r,
            significance_phrase(p_value),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptive::crosstab;

    fn observed(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_chi_square_uniform_reference() {
        let result = chi_square_goodness_of_fit(&observed(&[("A", 40.0), ("B", 35.0), ("C", 25.0)]), None);
        assert!((result.statistic - 3.5).abs() < 1e-9);
        assert!(result.statistic >= 0.0);
        assert!((0.0..=1.0).contains(&result.p_value));
        assert_eq!(result.degrees_of_freedom, Some(2));
        assert!(!result.significant);
    }

    #[test]
    fn test_chi_square_strong_skew_is_significant() {
        let result = chi_square_goodness_of_fit(&observed(&[("A", 90.0), ("B", 5.0), ("C", 5.0)]), None);
        assert!(result.significant);
        assert_eq!(result.effect_size_label.as_deref(), Some("large"));
    }

    #[test]
    fn test_chi_square_with_expected_weights() {
        let obs = observed(&[("A", 50.0), ("B", 50.0)]);
        let exp = observed(&[("A", 0.5), ("B", 0.5)]);
        let result = chi_square_goodness_of_fit(&obs, Some(&exp));
        assert!(result.statistic.abs() < 1e-9);
        assert!(result.p_value > 0.99);
    }

    #[test]
    fn test_chi_square_degenerate_inputs() {
        let single = chi_square_goodness_of_fit(&observed(&[("A", 10.0)]), None);
        assert!(single.is_degenerate());
        assert!(!single.significant);

        let obs = observed(&[("A", 5.0), ("B", 5.0)]);
        let exp = observed(&[("A", 1.0)]);
        let zero = chi_square_goodness_of_fit(&obs, Some(&exp));
        assert!(zero.is_degenerate());
        assert!(zero.interpretation.contains("'B'"));
    }

    #[test]
    fn test_chi_square_independence() {
        let mut pairs = Vec::new();
        pairs.extend(std::iter::repeat_n(("north", "A"), 40));
        pairs.extend(std::iter::repeat_n(("north", "B"), 10));
        pairs.extend(std::iter::repeat_n(("south", "A"), 10));
        pairs.extend(std::iter::repeat_n(("south", "B"), 40));
        let table = crosstab("region", "vote", &pairs);
        let result = chi_square_independence(&table);
        assert!((result.statistic - 36.0).abs() < 1e-9);
        assert_eq!(result.degrees_of_freedom, Some(1));
        assert!(result.significant);
        assert!((result.effect_size.unwrap() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_chi_square_independence_single_column() {
        let table = crosstab("region", "vote", &[("north", "A"), ("south", "A")]);
        assert!(chi_square_independence(&table).is_degenerate());
    }

    #[test]
    fn test_two_proportion_z() {
        let result = two_proportion_z_test(0.55, 500, 0.45, 500);
        // pooled 0.5, se = sqrt(0.25 * 0.004) = 0.0316
        assert!((result.statistic - 3.162).abs() < 0.01);
        assert!(result.significant);
        let ci = result.confidence_interval.unwrap();
        assert!(ci.lower > 0.0 && ci.upper < 0.2);
        assert!((ci.lower + ci.upper - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_two_proportion_degenerate() {
        assert!(two_proportion_z_test(0.5, 0, 0.5, 10).is_degenerate());
        assert!(two_proportion_z_test(0.0, 10, 0.0, 10).is_degenerate());
    }

    #[test]
    fn test_margin_of_error() {
        let moe = margin_of_error(0.5, 1000, 0.95);
        assert!((moe.margin - 0.03099).abs() < 1e-4);
        assert!((moe.lower_percent - 46.9).abs() < 0.01);
        let clamped = margin_of_error(0.01, 10, 0.99);
        assert_eq!(clamped.lower_percent, 0.0);
        let empty = margin_of_error(0.4, 0, 0.95);
        assert_eq!(empty.margin, 0.0);
        assert!(empty.note.is_some());
    }

    #[test]
    fn test_pearson_perfect_and_strong() {
        let x: Vec<f64> = (0..10).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
        let perfect = pearson_correlation(&x, &y);
        assert!((perfect.statistic - 1.0).abs() < 1e-12);
        assert!(perfect.significant);
        assert_eq!(perfect.p_value, 0.0);

        let noisy: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, v)| v + if i % 2 == 0 { 1.5 } else { -1.5 })
            .collect();
        let strong = pearson_correlation(&x, &noisy);
        assert!(strong.statistic > 0.8);
        assert_eq!(strong.effect_size_label.as_deref(), Some("strong"));
        assert!(strong.confidence_interval.is_some());
    }

    #[test]
    fn test_pearson_degenerate() {
        assert!(pearson_correlation(&[1.0, 2.0], &[1.0, 2.0]).is_degenerate());
        assert!(pearson_correlation(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_degenerate());
        assert!(pearson_correlation(&[1.0, 2.0, 3.0], &[1.0, 2.0]).is_degenerate());
    }
}
