use chrono::Utc;
use std::collections::BTreeMap;
use tracing::debug;

use super::baseline::{compare, MetricDelta};
use super::scorer::{FeatureVector, MahalanobisScorer, Scorer};
use super::stats::{
    cusum_change_points, detect_seasonality, mann_kendall, two_sample_t_test, TTestResult,
};
use super::{
    direction, AlertKind, DetectionMethod, MetricChangePoints, MetricDirection,
    MetricSeasonality, PerformanceMetrics, RegressionAlert, RegressionBaseline,
    RegressionReport, RegressionThreshold, ReportPeriod, ReportSummary, Severity, Trend,
    TrendAnalysis, METRIC_ERROR_RATE, METRIC_MEAN, METRIC_P95, METRIC_THROUGHPUT,
    TRACKED_METRICS,
};
use crate::config::{ANOMALY_ALERT_SCORE, CHANGE_POINT_WINDOW, CUSUM_DEFAULT_THRESHOLD};
use crate::error::{LoadError, LoadResult};

/// Thresholds used until overridden with `set_threshold`.
pub fn default_thresholds() -> BTreeMap<String, RegressionThreshold> {
    [
        RegressionThreshold::new(METRIC_P95, 20.0, 50.0),
        RegressionThreshold::new(METRIC_MEAN, 15.0, 40.0),
        RegressionThreshold::new(METRIC_THROUGHPUT, 15.0, 35.0),
        RegressionThreshold::new(METRIC_ERROR_RATE, 50.0, 100.0),
    ]
    .into_iter()
    .map(|t| (t.metric.clone(), t))
    .collect()
}

/// Statistical regression detector. Pure computation apart from the
/// anomaly scorer's training buffer.
pub struct RegressionDetector {
    thresholds: BTreeMap<String, RegressionThreshold>,
    scorer: Box<dyn Scorer>,
    cusum_threshold: f64,
}

impl Default for RegressionDetector {
    fn default() -> Self {
        Self::new(Box::new(MahalanobisScorer::default()))
    }
}

impl RegressionDetector {
    pub fn new(scorer: Box<dyn Scorer>) -> Self {
        Self {
            thresholds: default_thresholds(),
            scorer,
            cusum_threshold: CUSUM_DEFAULT_THRESHOLD,
        }
    }

    // ========================================================================
    // Thresholds
    // ========================================================================

    pub fn set_threshold(&mut self, threshold: RegressionThreshold) -> LoadResult<()> {
        if !TRACKED_METRICS.contains(&threshold.metric.as_str()) {
            return Err(LoadError::validation(format!(
                "unknown metric '{}', expected one of {}",
                threshold.metric,
                TRACKED_METRICS.join(", ")
            )));
        }
        if !threshold.warning_pct.is_finite() || threshold.warning_pct <= 0.0 {
            return Err(LoadError::validation("warningPct must be a positive number"));
        }
        if !threshold.critical_pct.is_finite() || threshold.critical_pct < threshold.warning_pct {
            return Err(LoadError::validation("criticalPct must be >= warningPct"));
        }
        if !threshold.confidence.is_finite()
            || threshold.confidence <= 0.0
            || threshold.confidence >= 1.0
        {
            return Err(LoadError::validation("confidence must be between 0 and 1"));
        }
        if threshold.min_sample_size < 2 {
            return Err(LoadError::validation("minSampleSize must be at least 2"));
        }
        self.thresholds.insert(threshold.metric.clone(), threshold);
        Ok(())
    }

    pub fn threshold(&self, metric: &str) -> Option<&RegressionThreshold> {
        self.thresholds.get(metric)
    }

    pub fn thresholds(&self) -> Vec<RegressionThreshold> {
        self.thresholds.values().cloned().collect()
    }

    pub fn replace_thresholds(&mut self, thresholds: Vec<RegressionThreshold>) {
        for t in thresholds {
            if let Err(e) = self.set_threshold(t) {
                tracing::warn!("Ignoring stored threshold: {}", e);
            }
        }
    }

    // ========================================================================
    // Anomaly scorer
    // ========================================================================

    pub fn record_sample(&mut self, metrics: &PerformanceMetrics) {
        self.scorer.add_sample(FeatureVector::from(metrics));
    }

    pub fn retrain(&mut self) -> bool {
        self.scorer.train()
    }

    pub fn anomaly_score(&self, metrics: &PerformanceMetrics) -> Option<f64> {
        self.scorer.score(&FeatureVector::from(metrics))
    }

    // ========================================================================
    // Analysis
    // ========================================================================

    /// Compare `current` against the baseline and the metric history
    /// (oldest first, excluding `current`). No baseline means no alerts.
    pub fn analyze(
        &self,
        scenario_id: &str,
        baseline: Option<&RegressionBaseline>,
        current: &PerformanceMetrics,
        history: &[PerformanceMetrics],
    ) -> Vec<RegressionAlert> {
        let Some(baseline) = baseline else {
            return Vec::new();
        };

        let mut alerts = Vec::new();
        for delta in compare(&baseline.metrics, current) {
            let Some(threshold) = self.thresholds.get(&delta.metric) else {
                continue;
            };
            let series = metric_series(&delta.metric, history, Some(current));
            let trend = mann_kendall(&delta.metric, &series, direction(&delta.metric));

            if delta.delta_pct.abs() > threshold.warning_pct {
                let confidence = match threshold.method {
                    DetectionMethod::Absolute => threshold.confidence,
                    DetectionMethod::Statistical => match significance(&series, threshold) {
                        Some(test) => 1.0 - test.p_value,
                        None => {
                            debug!(
                                "{}: {} breach not significant over {} samples",
                                scenario_id,
                                delta.metric,
                                series.len()
                            );
                            continue;
                        }
                    },
                };
                alerts.push(breach_alert(scenario_id, &delta, threshold, confidence, trend.trend));
            } else if trend.trend == Trend::Degrading {
                alerts.push(trend_alert(scenario_id, &delta, &trend));
            }
        }

        if let Some(score) = self.anomaly_score(current) {
            if score > ANOMALY_ALERT_SCORE {
                alerts.push(anomaly_alert(scenario_id, score));
            }
        }
        alerts
    }

    pub fn analyze_trends(&self, history: &[PerformanceMetrics]) -> Vec<TrendAnalysis> {
        TRACKED_METRICS
            .iter()
            .map(|metric| {
                let series = metric_series(metric, history, None);
                mann_kendall(metric, &series, direction(metric))
            })
            .collect()
    }

    pub fn report(
        &self,
        scenario_id: &str,
        period: ReportPeriod,
        history: &[PerformanceMetrics],
        alerts: Vec<RegressionAlert>,
    ) -> RegressionReport {
        let trends = self.analyze_trends(history);

        let change_points: Vec<MetricChangePoints> = TRACKED_METRICS
            .iter()
            .filter_map(|metric| {
                let series = oriented(metric, metric_series(metric, history, None));
                let mut points = cusum_change_points(&series, self.cusum_threshold);
                if points.is_empty() {
                    return None;
                }
                if direction(metric) == MetricDirection::LowerIsWorse {
                    for p in &mut points {
                        p.mean_before = -p.mean_before;
                        p.mean_after = -p.mean_after;
                    }
                }
                Some(MetricChangePoints {
                    metric: metric.to_string(),
                    points,
                })
            })
            .collect();

        let seasonality: Vec<MetricSeasonality> = TRACKED_METRICS
            .iter()
            .map(|metric| MetricSeasonality {
                metric: metric.to_string(),
                seasonality: detect_seasonality(&metric_series(metric, history, None)),
            })
            .collect();

        let mut summary = ReportSummary {
            runs_analyzed: history.len(),
            total_alerts: alerts.len(),
            ..Default::default()
        };
        for alert in &alerts {
            match alert.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
            }
            match alert.kind {
                AlertKind::Regression => summary.regressions += 1,
                AlertKind::Improvement => summary.improvements += 1,
                _ => {}
            }
        }
        summary.degrading_metrics = trends
            .iter()
            .filter(|t| t.trend == Trend::Degrading)
            .map(|t| t.metric.clone())
            .collect();

        let recommendations = report_recommendations(&alerts, &trends, &change_points, &seasonality);

        RegressionReport {
            scenario_id: scenario_id.to_string(),
            period,
            generated_at: Utc::now(),
            summary,
            alerts,
            trends,
            change_points,
            seasonality,
            recommendations,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn metric_series(
    metric: &str,
    history: &[PerformanceMetrics],
    current: Option<&PerformanceMetrics>,
) -> Vec<f64> {
    history
        .iter()
        .chain(current)
        .filter_map(|m| m.value(metric))
        .collect()
}

/// Flip lower-is-worse series so that degradation is always upward.
fn oriented(metric: &str, series: Vec<f64>) -> Vec<f64> {
    match direction(metric) {
        MetricDirection::HigherIsWorse => series,
        MetricDirection::LowerIsWorse => series.into_iter().map(|v| -v).collect(),
    }
}

/// t-test of the most recent window against the rest of the series.
/// `None` when under-sampled or not significant.
fn significance(series: &[f64], threshold: &RegressionThreshold) -> Option<TTestResult> {
    if series.len() < threshold.min_sample_size.max(4) {
        return None;
    }
    let recent = (series.len() / 2).clamp(2, CHANGE_POINT_WINDOW);
    let (before, after) = series.split_at(series.len() - recent);
    let result = two_sample_t_test(before, after, 1.0 - threshold.confidence);
    result.significant.then_some(result)
}

fn severity_for(delta_pct: f64, threshold: &RegressionThreshold) -> Severity {
    let magnitude = delta_pct.abs();
    if magnitude > threshold.critical_pct {
        Severity::Critical
    } else if magnitude > threshold.warning_pct * 1.5 {
        Severity::High
    } else {
        Severity::Medium
    }
}

fn new_alert(scenario_id: &str, metric: &str, kind: AlertKind, severity: Severity) -> RegressionAlert {
    RegressionAlert {
        id: uuid::Uuid::new_v4().to_string(),
        scenario_id: scenario_id.to_string(),
        metric: metric.to_string(),
        kind,
        severity,
        degradation_pct: 0.0,
        baseline_value: 0.0,
        current_value: 0.0,
        confidence: 0.0,
        trend: None,
        recommended_actions: Vec::new(),
        message: String::new(),
        timestamp: Utc::now(),
    }
}

fn breach_alert(
    scenario_id: &str,
    delta: &MetricDelta,
    threshold: &RegressionThreshold,
    confidence: f64,
    trend: Trend,
) -> RegressionAlert {
    let kind = if delta.degradation_pct > 0.0 {
        AlertKind::Regression
    } else {
        AlertKind::Improvement
    };
    let severity = severity_for(delta.delta_pct, threshold);
    let verb = if kind == AlertKind::Regression {
        "regressed"
    } else {
        "improved"
    };

    RegressionAlert {
        degradation_pct: delta.degradation_pct,
        baseline_value: delta.baseline,
        current_value: delta.current,
        confidence,
        trend: Some(trend),
        recommended_actions: actions_for(&delta.metric, kind),
        message: format!(
            "{} {} by {:.1}% ({:.2} -> {:.2})",
            delta.metric,
            verb,
            delta.degradation_pct.abs(),
            delta.baseline,
            delta.current
        ),
        ..new_alert(scenario_id, &delta.metric, kind, severity)
    }
}

fn trend_alert(scenario_id: &str, delta: &MetricDelta, trend: &TrendAnalysis) -> RegressionAlert {
    RegressionAlert {
        degradation_pct: delta.degradation_pct,
        baseline_value: delta.baseline,
        current_value: delta.current,
        confidence: 1.0 - 2.0 * (1.0 - super::stats::normal_cdf(trend.z.abs())),
        trend: Some(trend.trend),
        recommended_actions: actions_for(&delta.metric, AlertKind::Trend),
        message: format!(
            "{} is trending worse over the last {} runs (slope {:.3} per run)",
            delta.metric, trend.samples, trend.slope
        ),
        ..new_alert(scenario_id, &delta.metric, AlertKind::Trend, Severity::Medium)
    }
}

fn anomaly_alert(scenario_id: &str, score: f64) -> RegressionAlert {
    RegressionAlert {
        degradation_pct: score * 100.0,
        current_value: score,
        confidence: score,
        recommended_actions: actions_for("multivariate", AlertKind::Anomaly),
        message: format!(
            "Metric profile deviates from the learned baseline (anomaly score {:.2})",
            score
        ),
        ..new_alert(scenario_id, "multivariate", AlertKind::Anomaly, Severity::High)
    }
}

fn actions_for(metric: &str, kind: AlertKind) -> Vec<String> {
    let mut actions: Vec<String> = match kind {
        AlertKind::Improvement => {
            return vec!["Consider updating the baseline to lock in the improvement".to_string()]
        }
        AlertKind::Anomaly => {
            return vec![
                "Review all metrics together; the combination is unusual even if no single threshold fired".to_string(),
                "Check for environment changes (hardware, configuration, data volume)".to_string(),
            ]
        }
        AlertKind::Trend => vec![
            "Schedule an investigation before the trend breaches thresholds".to_string(),
        ],
        AlertKind::Regression => vec![
            "Compare recent deployments against the baseline version".to_string(),
        ],
    };

    let specific = match metric {
        METRIC_P95 | METRIC_MEAN => "Profile the slowest endpoints and review recent query or cache changes",
        METRIC_THROUGHPUT => "Check connection pool sizes, worker counts and upstream capacity",
        METRIC_ERROR_RATE => "Inspect the dominant error groups in the latest run",
        _ => return actions,
    };
    actions.push(specific.to_string());
    actions
}

fn report_recommendations(
    alerts: &[RegressionAlert],
    trends: &[TrendAnalysis],
    change_points: &[MetricChangePoints],
    seasonality: &[MetricSeasonality],
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    for alert in alerts
        .iter()
        .filter(|a| matches!(a.severity, Severity::Critical | Severity::High))
    {
        for action in &alert.recommended_actions {
            if !out.contains(action) {
                out.push(action.clone());
            }
        }
    }
    for trend in trends.iter().filter(|t| t.trend == Trend::Degrading) {
        out.push(format!(
            "{} is degrading (Mann-Kendall z={:.2}); track it before it becomes a regression",
            trend.metric, trend.z
        ));
    }
    for cp in change_points {
        if let Some(last) = cp.points.last() {
            out.push(format!(
                "{} shifted around run #{} ({:.2} -> {:.2})",
                cp.metric,
                last.index + 1,
                last.mean_before,
                last.mean_after
            ));
        }
    }
    for s in seasonality.iter().filter(|s| s.seasonality.seasonal) {
        if let Some(period) = s.seasonality.period {
            out.push(format!(
                "{} repeats every {} runs; compare against runs from the same phase",
                s.metric, period
            ));
        }
    }

    if out.is_empty() {
        out.push("No regressions detected in this period".to_string());
    }
    out
}
