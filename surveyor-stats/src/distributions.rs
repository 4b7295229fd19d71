//! Closed-form distribution approximations.
//!
//! These are deliberate approximations, not exact distribution functions:
//! the error function uses Abramowitz–Stegun 7.1.26 (|ε| < 1.5e-7), the
//! chi-square tail uses the Wilson–Hilferty cube-root transform, and the
//! Student t tail maps t onto a standard normal deviate.

use std::f64::consts::SQRT_2;

/// Observations at or above which the t distribution is treated as normal.
pub const LARGE_SAMPLE_THRESHOLD: usize = 30;

/// Error function, Abramowitz–Stegun 7.1.26.
pub fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254_829_592;
    const A2: f64 = -0.284_496_736;
    const A3: f64 = 1.421_413_741;
    const A4: f64 = -1.453_152_027;
    const A5: f64 = 1.061_405_429;
    const P: f64 = 0.327_591_1;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

/// Standard normal cumulative distribution function.
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / SQRT_2))
}

/// Two-tailed p-value for a standard normal statistic.
pub fn normal_two_tailed_p(z: f64) -> f64 {
    (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0)
}

/// Upper-tail probability `P(X² ≥ statistic)` via Wilson–Hilferty.
pub fn chi_square_p_value(statistic: f64, df: usize) -> f64 {
    if df == 0 || statistic <= 0.0 || !statistic.is_finite() {
        return 1.0;
    }
    let k = df as f64;
    let variance = 2.0 / (9.0 * k);
    let z = ((statistic / k).cbrt() - (1.0 - variance)) / variance.sqrt();
    (1.0 - normal_cdf(z)).clamp(0.0, 1.0)
}

/// Two-tailed p-value for a t statistic with `df` degrees of freedom.
///
/// Below [`LARGE_SAMPLE_THRESHOLD`] observations (`df + 2` for a
/// correlation) the statistic is mapped to a normal deviate with
/// `z = t(1 − 1/(4df)) / sqrt(1 + t²/(2df))`; otherwise t is used directly.
pub fn t_two_tailed_p(t: f64, df: usize, observations: usize) -> f64 {
    if !t.is_finite() {
        return 0.0;
    }
    if df == 0 {
        return 1.0;
    }
    if observations >= LARGE_SAMPLE_THRESHOLD {
        return normal_two_tailed_p(t);
    }
    let v = df as f64;
    let z = t * (1.0 - 1.0 / (4.0 * v)) / (1.0 + t * t / (2.0 * v)).sqrt();
    normal_two_tailed_p(z)
}
