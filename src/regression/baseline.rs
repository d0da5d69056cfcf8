use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{
    direction, BaselineMeta, LatencySnapshot, MetricDirection, PerformanceMetrics,
    RegressionBaseline, ResourceUsage, ThroughputSnapshot, METRIC_ERROR_RATE, TRACKED_METRICS,
};
use crate::load::metrics::std_dev;
use crate::load::LoadRunResult;

impl PerformanceMetrics {
    pub fn from_result(result: &LoadRunResult) -> Self {
        let rt = &result.metrics.response_time;
        let rps: Vec<f64> = result
            .timeline
            .iter()
            .map(|p| p.requests_per_second)
            .collect();
        Self {
            response_time: LatencySnapshot {
                mean: rt.avg,
                p50: rt.p50,
                p95: rt.p95,
                p99: rt.p99,
                std: rt.std,
            },
            throughput: ThroughputSnapshot {
                mean: result.metrics.throughput.requests_per_second,
                std: std_dev(&rps),
            },
            error_rate: result.metrics.error_rate,
            availability: 100.0 - result.metrics.error_rate,
            resource_usage: ResourceUsage::default(),
        }
    }
}

impl RegressionBaseline {
    pub fn from_result(result: &LoadRunResult, meta: &BaselineMeta) -> Self {
        Self {
            scenario_id: result.scenario_id.clone(),
            environment: meta.environment.clone(),
            version: meta.version.clone(),
            metrics: PerformanceMetrics::from_result(result),
            sample_size: result.summary.measured_requests,
            confidence: meta.confidence,
            timestamp: Utc::now(),
            run_id: result.run_id.clone(),
        }
    }
}

/// Relative change of one tracked metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDelta {
    pub metric: String,
    pub baseline: f64,
    pub current: f64,
    /// `(current - baseline) / baseline * 100`.
    pub delta_pct: f64,
    /// Same magnitude as `delta_pct`, positive when the change is worse.
    pub degradation_pct: f64,
}

/// Per-metric deltas for every tracked metric.
///
/// A zero baseline has no relative delta. Error rate falls back to the
/// difference in percentage points; other metrics are skipped.
pub fn compare(baseline: &PerformanceMetrics, current: &PerformanceMetrics) -> Vec<MetricDelta> {
    TRACKED_METRICS
        .iter()
        .filter_map(|metric| {
            let b = baseline.value(metric)?;
            let c = current.value(metric)?;
            let delta_pct = if b.abs() > f64::EPSILON {
                (c - b) / b * 100.0
            } else if *metric == METRIC_ERROR_RATE {
                c - b
            } else {
                return None;
            };
            let degradation_pct = match direction(metric) {
                MetricDirection::HigherIsWorse => delta_pct,
                MetricDirection::LowerIsWorse => -delta_pct,
            };
            Some(MetricDelta {
                metric: metric.to_string(),
                baseline: b,
                current: c,
                delta_pct,
                degradation_pct,
            })
        })
        .collect()
}
