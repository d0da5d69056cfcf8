//! Statistical primitives for regression analysis. All functions are pure
//! and return neutral results when there is not enough data.

use serde::{Deserialize, Serialize};

use super::{ChangeKind, ChangePoint, MetricDirection, Seasonality, Trend, TrendAnalysis};
use crate::config::{
    CHANGE_POINT_WINDOW, CUSUM_DRIFT, SEASONALITY_MAX_LAG, SEASONALITY_PEAK_RATIO,
    TREND_MIN_POINTS, TREND_Z_CRITICAL,
};

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance (n - 1).
pub fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

// ============================================================================
// Normal distribution
// ============================================================================

/// Abramowitz & Stegun 7.1.26, absolute error below 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn two_sided_p(z: f64) -> f64 {
    (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0)
}

// ============================================================================
// Two-sample t-test
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TTestResult {
    pub t: f64,
    pub df: f64,
    pub p_value: f64,
    pub significant: bool,
}

impl TTestResult {
    fn inconclusive() -> Self {
        Self {
            t: 0.0,
            df: 0.0,
            p_value: 1.0,
            significant: false,
        }
    }
}

/// Pooled-variance two-sample t-test of `after` against `before`.
///
/// The p-value uses the normal approximation. Below 30 degrees of freedom the
/// statistic is first shrunk toward zero to account for the heavier tails of
/// Student's t.
pub fn two_sample_t_test(before: &[f64], after: &[f64], alpha: f64) -> TTestResult {
    let (n1, n2) = (before.len(), after.len());
    if n1 < 2 || n2 < 2 {
        return TTestResult::inconclusive();
    }

    let df = (n1 + n2 - 2) as f64;
    let pooled = ((n1 - 1) as f64 * sample_variance(before)
        + (n2 - 1) as f64 * sample_variance(after))
        / df;
    let se = (pooled * (1.0 / n1 as f64 + 1.0 / n2 as f64)).sqrt();
    let diff = mean(after) - mean(before);

    if se <= f64::EPSILON {
        // Zero spread in both samples: any difference is certain.
        let significant = diff.abs() > f64::EPSILON;
        return TTestResult {
            t: if significant { diff.signum() * f64::INFINITY } else { 0.0 },
            df,
            p_value: if significant { 0.0 } else { 1.0 },
            significant,
        };
    }

    let t = diff / se;
    let z = if df >= 30.0 {
        t
    } else {
        t * (1.0 - 1.0 / (4.0 * df)) / (1.0 + t * t / (2.0 * df)).sqrt()
    };
    let p_value = two_sided_p(z);

    TTestResult {
        t,
        df,
        p_value,
        significant: p_value < alpha,
    }
}

// ============================================================================
// CUSUM change-point detection
// ============================================================================

/// Upward CUSUM over a series oriented so that larger values are worse.
///
/// Each point is standardized against the mean and sample standard deviation
/// of the whole series. A flagged point reports the first index after the sum
/// last left zero. After a flag the sum resets; further crossings before it
/// returns to zero belong to the same change and are not reported again.
pub fn cusum_change_points(series: &[f64], threshold: f64) -> Vec<ChangePoint> {
    let n = series.len();
    if n < 3 {
        return Vec::new();
    }

    let center = mean(series);
    let std = sample_variance(series).sqrt();
    if !std.is_finite() || std <= f64::EPSILON {
        return Vec::new();
    }

    let mut sum = 0.0;
    let mut last_zero: Option<usize> = None;
    let mut continuing = false;
    let mut points = Vec::new();

    for (i, &x) in series.iter().enumerate() {
        let z = (x - center) / std;
        sum = (sum + z - CUSUM_DRIFT).max(0.0);
        if sum == 0.0 {
            last_zero = Some(i);
            continuing = false;
            continue;
        }
        if sum > threshold {
            if !continuing {
                let start = last_zero.map(|z| z + 1).unwrap_or(0);
                points.push(ChangePoint {
                    index: start,
                    detected_at: i,
                    kind: classify_change(series, start, std),
                    mean_before: window_before(series, start).map(mean).unwrap_or(center),
                    mean_after: mean(window_after(series, start)),
                    cusum: sum,
                });
            }
            sum = 0.0;
            continuing = true;
        }
    }
    points
}

fn window_before(series: &[f64], idx: usize) -> Option<&[f64]> {
    if idx == 0 {
        return None;
    }
    Some(&series[idx.saturating_sub(CHANGE_POINT_WINDOW)..idx])
}

fn window_after(series: &[f64], idx: usize) -> &[f64] {
    &series[idx..(idx + CHANGE_POINT_WINDOW).min(series.len())]
}

/// Level shift when the mean moved by at least one series sigma, variance
/// change when only the spread moved.
fn classify_change(series: &[f64], idx: usize, std: f64) -> ChangeKind {
    let Some(before) = window_before(series, idx) else {
        return ChangeKind::Level;
    };
    let after = window_after(series, idx);
    if (mean(after) - mean(before)).abs() >= std {
        return ChangeKind::Level;
    }
    let (vb, va) = (sample_variance(before), sample_variance(after));
    let ratio = (va.max(vb) + f64::EPSILON) / (va.min(vb) + f64::EPSILON);
    if ratio > 4.0 {
        ChangeKind::Variance
    } else {
        ChangeKind::Level
    }
}

// ============================================================================
// Mann–Kendall trend test
// ============================================================================

pub fn mann_kendall(metric: &str, series: &[f64], direction: MetricDirection) -> TrendAnalysis {
    let n = series.len();
    if n < TREND_MIN_POINTS {
        return TrendAnalysis {
            metric: metric.to_string(),
            trend: Trend::Stable,
            s: 0,
            z: 0.0,
            significant: false,
            slope: 0.0,
            samples: n,
        };
    }

    let mut s: i64 = 0;
    let mut slopes = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n - 1 {
        for j in i + 1..n {
            let diff = series[j] - series[i];
            s += if diff > 0.0 {
                1
            } else if diff < 0.0 {
                -1
            } else {
                0
            };
            slopes.push(diff / (j - i) as f64);
        }
    }

    let nf = n as f64;
    let var = nf * (nf - 1.0) * (2.0 * nf + 5.0) / 18.0;
    let z = match s {
        s if s > 0 => (s - 1) as f64 / var.sqrt(),
        s if s < 0 => (s + 1) as f64 / var.sqrt(),
        _ => 0.0,
    };
    let significant = z.abs() > TREND_Z_CRITICAL;
    let trend = if !significant {
        Trend::Stable
    } else {
        let rising = z > 0.0;
        match (direction, rising) {
            (MetricDirection::HigherIsWorse, true) | (MetricDirection::LowerIsWorse, false) => {
                Trend::Degrading
            }
            _ => Trend::Improving,
        }
    };

    TrendAnalysis {
        metric: metric.to_string(),
        trend,
        s,
        z,
        significant,
        slope: median(&mut slopes),
        samples: n,
    }
}

// ============================================================================
// Seasonality
// ============================================================================

/// Sample autocorrelation at `lag`, normalized so lag 0 is 1.
pub fn autocorrelation(series: &[f64], lag: usize) -> f64 {
    let n = series.len();
    if lag >= n {
        return 0.0;
    }
    let m = mean(series);
    let denom: f64 = series.iter().map(|v| (v - m).powi(2)).sum();
    if denom <= f64::EPSILON {
        return 0.0;
    }
    let num: f64 = (0..n - lag)
        .map(|t| (series[t] - m) * (series[t + lag] - m))
        .sum();
    num / denom
}

pub fn detect_seasonality(series: &[f64]) -> Seasonality {
    let none = Seasonality {
        seasonal: false,
        period: None,
        strength: 0.0,
    };
    let max_lag = (series.len() / 3).min(SEASONALITY_MAX_LAG);
    if max_lag < 2 {
        return none;
    }

    let acf: Vec<f64> = (0..=max_lag).map(|k| autocorrelation(series, k)).collect();
    if acf[0] <= 0.0 {
        return none;
    }

    let mut best: Option<(usize, f64)> = None;
    for k in 1..=max_lag {
        let rises = acf[k] > acf[k - 1];
        let holds = k == max_lag || acf[k] >= acf[k + 1];
        if rises && holds && best.is_none_or(|(_, r)| acf[k] > r) {
            best = Some((k, acf[k]));
        }
    }

    match best {
        Some((period, r)) if r > SEASONALITY_PEAK_RATIO * acf[0] => Seasonality {
            seasonal: true,
            period: Some(period),
            strength: r,
        },
        Some((_, r)) => Seasonality {
            strength: r,
            ..none
        },
        None => none,
    }
}
