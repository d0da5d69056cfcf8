use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{
    ConcurrencyStats, EndpointBreakdown, ErrorSummary, Metrics, RequestResult, ResponseTimeStats,
    RunSummary, ThresholdResult, ThresholdSeverity, ThroughputStats, TimelinePoint,
};
use crate::config::{
    RECOMMEND_ERROR_RATE_PCT, RECOMMEND_MIN_RPS, RECOMMEND_P95_MS, RECOMMEND_TAIL_RATIO,
    THRESHOLD_CRITICAL_FACTOR,
};
use crate::scenario::Thresholds;

// ============================================================================
// Helpers
// ============================================================================

/// Nearest-rank percentile over an ascending slice: index `ceil(p/100 * n) - 1`.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    Some(sorted[idx])
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

fn sorted_latencies<'a>(results: impl Iterator<Item = &'a RequestResult>) -> Vec<f64> {
    let mut latencies: Vec<f64> = results.map(|r| r.latency_ms).collect();
    latencies.sort_by(|a, b| a.total_cmp(b));
    latencies
}

fn error_key(result: &RequestResult) -> String {
    match &result.error {
        Some(msg) => msg.clone(),
        None => format!("HTTP {}", result.status_code),
    }
}

// ============================================================================
// Aggregation
// ============================================================================

pub fn response_time_stats(results: &[&RequestResult]) -> ResponseTimeStats {
    let latencies = sorted_latencies(results.iter().copied());
    if latencies.is_empty() {
        return ResponseTimeStats::default();
    }
    ResponseTimeStats {
        min: latencies[0],
        max: latencies[latencies.len() - 1],
        avg: mean(&latencies),
        std: std_dev(&latencies),
        p50: percentile(&latencies, 50.0).unwrap_or(0.0),
        p90: percentile(&latencies, 90.0).unwrap_or(0.0),
        p95: percentile(&latencies, 95.0).unwrap_or(0.0),
        p99: percentile(&latencies, 99.0).unwrap_or(0.0),
    }
}

/// Aggregate metrics over the measured results. `window` is the wall time
/// the measured results span and drives the throughput figures.
pub fn compute_metrics(
    measured: &[&RequestResult],
    window: Duration,
    timeline: &[TimelinePoint],
) -> Metrics {
    let secs = window.as_secs_f64();
    let total_bytes: u64 = measured.iter().map(|r| r.payload_bytes).sum();
    let failed = measured.iter().filter(|r| !r.success).count();

    let throughput = if secs > 0.0 {
        ThroughputStats {
            requests_per_second: measured.len() as f64 / secs,
            bytes_per_second: total_bytes as f64 / secs,
            total_bytes,
        }
    } else {
        ThroughputStats {
            total_bytes,
            ..Default::default()
        }
    };

    let error_rate = if measured.is_empty() {
        0.0
    } else {
        failed as f64 / measured.len() as f64 * 100.0
    };

    let users: Vec<f64> = timeline.iter().map(|p| p.active_users as f64).collect();
    let concurrency = ConcurrencyStats {
        max_users: timeline.iter().map(|p| p.active_users).max().unwrap_or(0),
        avg_users: mean(&users),
    };

    Metrics {
        response_time: response_time_stats(measured),
        throughput,
        error_rate,
        concurrency,
    }
}

pub fn summarize(all: &[RequestResult], measured: usize, duration: Duration) -> RunSummary {
    let successful = all.iter().filter(|r| r.success).count() as u64;
    RunSummary {
        total_requests: all.len() as u64,
        successful_requests: successful,
        failed_requests: all.len() as u64 - successful,
        measured_requests: measured as u64,
        duration_ms: duration.as_millis() as u64,
    }
}

/// Snapshot of the results that completed within the last `window`.
pub fn timeline_point(
    results: &[RequestResult],
    now_offset_ms: u64,
    window: Duration,
    active_users: usize,
) -> TimelinePoint {
    let window_ms = window.as_millis() as u64;
    // Append order is not offset order, so every result is checked.
    let recent: Vec<&RequestResult> = results
        .iter()
        .filter(|r| r.offset_ms <= now_offset_ms && now_offset_ms - r.offset_ms < window_ms)
        .collect();

    let latencies = sorted_latencies(recent.iter().copied());
    let failed = recent.iter().filter(|r| !r.success).count();
    let secs = window.as_secs_f64().max(f64::EPSILON);

    TimelinePoint {
        offset_ms: now_offset_ms,
        timestamp: Utc::now(),
        active_users,
        requests_per_second: recent.len() as f64 / secs,
        avg_latency_ms: mean(&latencies),
        p95_latency_ms: percentile(&latencies, 95.0).unwrap_or(0.0),
        error_rate: if recent.is_empty() {
            0.0
        } else {
            failed as f64 / recent.len() as f64 * 100.0
        },
    }
}

/// Failed requests grouped by error message, most frequent first.
pub fn error_summaries(results: &[RequestResult]) -> Vec<ErrorSummary> {
    let failed: Vec<&RequestResult> = results.iter().filter(|r| !r.success).collect();
    if failed.is_empty() {
        return Vec::new();
    }

    let mut groups: BTreeMap<String, ErrorSummary> = BTreeMap::new();
    for r in &failed {
        let key = error_key(r);
        let entry = groups.entry(key.clone()).or_insert_with(|| ErrorSummary {
            message: key,
            count: 0,
            percentage: 0.0,
            endpoints: Vec::new(),
            first_seen: r.timestamp,
            last_seen: r.timestamp,
        });
        entry.count += 1;
        if !entry.endpoints.contains(&r.endpoint) {
            entry.endpoints.push(r.endpoint.clone());
        }
        entry.first_seen = entry.first_seen.min(r.timestamp);
        entry.last_seen = entry.last_seen.max(r.timestamp);
    }

    let total = results.len() as f64;
    let mut summaries: Vec<ErrorSummary> = groups
        .into_values()
        .map(|mut s| {
            s.percentage = s.count as f64 / total * 100.0;
            s
        })
        .collect();
    summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.message.cmp(&b.message)));
    summaries
}

pub fn endpoint_breakdown(results: &[&RequestResult]) -> Vec<EndpointBreakdown> {
    let mut groups: BTreeMap<&str, Vec<&RequestResult>> = BTreeMap::new();
    for r in results {
        groups.entry(r.endpoint.as_str()).or_default().push(r);
    }

    let mut rows: Vec<EndpointBreakdown> = groups
        .into_iter()
        .map(|(endpoint, rs)| {
            let latencies = sorted_latencies(rs.iter().copied());
            let failures = rs.iter().filter(|r| !r.success).count() as u64;
            EndpointBreakdown {
                endpoint: endpoint.to_string(),
                path: rs[0].path.clone(),
                requests: rs.len() as u64,
                failures,
                avg_latency_ms: mean(&latencies),
                p95_latency_ms: percentile(&latencies, 95.0).unwrap_or(0.0),
                error_rate: failures as f64 / rs.len() as f64 * 100.0,
            }
        })
        .collect();
    rows.sort_by(|a, b| b.requests.cmp(&a.requests));
    rows
}

// ============================================================================
// Thresholds and recommendations
// ============================================================================

fn ceiling_result(metric: &str, threshold: f64, actual: f64) -> ThresholdResult {
    let passed = actual <= threshold;
    let severity = if passed {
        ThresholdSeverity::Pass
    } else if actual > threshold * THRESHOLD_CRITICAL_FACTOR {
        ThresholdSeverity::Critical
    } else {
        ThresholdSeverity::Warning
    };
    ThresholdResult {
        metric: metric.to_string(),
        threshold,
        actual,
        passed,
        severity,
    }
}

fn floor_result(metric: &str, threshold: f64, actual: f64) -> ThresholdResult {
    let passed = actual >= threshold;
    let severity = if passed {
        ThresholdSeverity::Pass
    } else if actual < threshold / THRESHOLD_CRITICAL_FACTOR {
        ThresholdSeverity::Critical
    } else {
        ThresholdSeverity::Warning
    };
    ThresholdResult {
        metric: metric.to_string(),
        threshold,
        actual,
        passed,
        severity,
    }
}

pub fn evaluate_thresholds(thresholds: &Thresholds, metrics: &Metrics) -> Vec<ThresholdResult> {
    let mut out = Vec::new();
    let rt = &metrics.response_time;
    if let Some(t) = thresholds.response_time.p95 {
        out.push(ceiling_result("responseTime.p95", t, rt.p95));
    }
    if let Some(t) = thresholds.response_time.p99 {
        out.push(ceiling_result("responseTime.p99", t, rt.p99));
    }
    if let Some(t) = thresholds.response_time.max {
        out.push(ceiling_result("responseTime.max", t, rt.max));
    }
    if let Some(t) = thresholds.error_rate.max {
        out.push(ceiling_result("errorRate", t, metrics.error_rate));
    }
    if let Some(t) = thresholds.throughput.min {
        out.push(floor_result("throughput", t, metrics.throughput.requests_per_second));
    }
    out
}

pub fn recommendations(
    metrics: &Metrics,
    errors: &[ErrorSummary],
    thresholds: &[ThresholdResult],
) -> Vec<String> {
    let mut out = Vec::new();
    let rt = &metrics.response_time;

    if metrics.error_rate > RECOMMEND_ERROR_RATE_PCT {
        out.push(format!(
            "Error rate is {:.1}%; investigate failing endpoints and server logs before trusting latency figures",
            metrics.error_rate
        ));
    }
    if rt.p95 > RECOMMEND_P95_MS {
        out.push(format!(
            "p95 response time is {:.0}ms; profile slow endpoints, add caching or review database queries",
            rt.p95
        ));
    }
    if metrics.throughput.requests_per_second < RECOMMEND_MIN_RPS {
        out.push(format!(
            "Throughput is {:.1} req/s; check for connection limits, serialization points or excessive think time",
            metrics.throughput.requests_per_second
        ));
    }
    if rt.p95 > 0.0 && rt.p99 > rt.p95 * RECOMMEND_TAIL_RATIO {
        out.push(format!(
            "p99 ({:.0}ms) is more than {:.0}x p95 ({:.0}ms); look for GC pauses, lock contention or cold caches",
            rt.p99, RECOMMEND_TAIL_RATIO, rt.p95
        ));
    }
    if let Some(top) = errors.first() {
        if top.percentage > 1.0 {
            out.push(format!(
                "Most frequent error '{}' accounts for {:.1}% of requests (endpoints: {})",
                top.message,
                top.percentage,
                top.endpoints.join(", ")
            ));
        }
    }
    let critical: Vec<&str> = thresholds
        .iter()
        .filter(|t| t.severity == ThresholdSeverity::Critical)
        .map(|t| t.metric.as_str())
        .collect();
    if !critical.is_empty() {
        out.push(format!(
            "Critical threshold violations: {}",
            critical.join(", ")
        ));
    }

    if out.is_empty() {
        out.push("All metrics within expected ranges".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{ErrorRateThreshold, ResponseTimeThresholds, ThroughputThreshold};

    fn result(latency: f64, success: bool, offset_ms: u64, endpoint: &str) -> RequestResult {
        RequestResult {
            success,
            status_code: if success { 200 } else { 500 },
            latency_ms: latency,
            payload_bytes: 100,
            error: None,
            timestamp: Utc::now(),
            offset_ms,
            user_id: 0,
            endpoint: endpoint.to_string(),
            path: format!("/{}", endpoint),
        }
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let values: Vec<f64> = (1..=10).map(|v| (v * 10) as f64).collect();
        assert_eq!(percentile(&values, 50.0), Some(50.0));
        assert_eq!(percentile(&values, 95.0), Some(100.0));
        assert_eq!(percentile(&values, 99.0), Some(100.0));
        assert_eq!(percentile(&values, 10.0), Some(10.0));
        assert_eq!(percentile(&values, 0.0), Some(10.0));
    }

    #[test]
    fn test_percentile_empty_is_none() {
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_compute_metrics() {
        let results: Vec<RequestResult> = (1..=10)
            .map(|v| result((v * 10) as f64, v != 10, v * 100, "a"))
            .collect();
        let refs: Vec<&RequestResult> = results.iter().collect();
        let metrics = compute_metrics(&refs, Duration::from_secs(2), &[]);
        assert_eq!(metrics.response_time.min, 10.0);
        assert_eq!(metrics.response_time.max, 100.0);
        assert_eq!(metrics.response_time.avg, 55.0);
        assert_eq!(metrics.response_time.p50, 50.0);
        assert_eq!(metrics.response_time.p95, 100.0);
        assert_eq!(metrics.throughput.requests_per_second, 5.0);
        assert_eq!(metrics.throughput.total_bytes, 1000);
        assert!((metrics.error_rate - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_compute_metrics_empty() {
        let metrics = compute_metrics(&[], Duration::from_secs(1), &[]);
        assert_eq!(metrics.response_time.p95, 0.0);
        assert_eq!(metrics.error_rate, 0.0);
    }

    #[test]
    fn test_timeline_point_uses_last_second() {
        let results = vec![
            result(10.0, true, 100, "a"),
            result(20.0, true, 1_500, "a"),
            result(30.0, false, 1_900, "a"),
        ];
        let point = timeline_point(&results, 2_000, Duration::from_secs(1), 4);
        assert_eq!(point.active_users, 4);
        assert_eq!(point.requests_per_second, 2.0);
        assert_eq!(point.avg_latency_ms, 25.0);
        assert_eq!(point.error_rate, 50.0);
    }

    #[test]
    fn test_timeline_point_tolerates_late_appends() {
        // A slow request lands at the tail with an offset older than the window.
        let results = vec![
            result(10.0, true, 1_200, "a"),
            result(20.0, true, 1_800, "a"),
            result(900.0, true, 300, "slow"),
        ];
        let point = timeline_point(&results, 2_000, Duration::from_secs(1), 2);
        assert_eq!(point.requests_per_second, 2.0);
        assert_eq!(point.avg_latency_ms, 15.0);
    }

    #[test]
    fn test_error_summaries_grouped() {
        let mut results = vec![
            result(1.0, false, 0, "a"),
            result(1.0, false, 0, "b"),
            result(1.0, true, 0, "a"),
            result(1.0, false, 0, "a"),
        ];
        results[3].error = Some("timeout".to_string());
        let errors = error_summaries(&results);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "HTTP 500");
        assert_eq!(errors[0].count, 2);
        assert_eq!(errors[0].endpoints, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(errors[0].percentage, 50.0);
        assert_eq!(errors[1].message, "timeout");
    }

    #[test]
    fn test_endpoint_breakdown() {
        let results = vec![
            result(10.0, true, 0, "a"),
            result(30.0, false, 0, "a"),
            result(5.0, true, 0, "b"),
        ];
        let refs: Vec<&RequestResult> = results.iter().collect();
        let rows = endpoint_breakdown(&refs);
        assert_eq!(rows[0].endpoint, "a");
        assert_eq!(rows[0].requests, 2);
        assert_eq!(rows[0].avg_latency_ms, 20.0);
        assert_eq!(rows[0].error_rate, 50.0);
        assert_eq!(rows[1].path, "/b");
    }

    #[test]
    fn test_threshold_severity() {
        let thresholds = Thresholds {
            response_time: ResponseTimeThresholds {
                p95: Some(100.0),
                p99: Some(100.0),
                max: Some(1000.0),
            },
            error_rate: ErrorRateThreshold { max: Some(1.0) },
            throughput: ThroughputThreshold { min: Some(30.0) },
        };
        let mut metrics = Metrics::default();
        metrics.response_time.p95 = 120.0;
        metrics.response_time.p99 = 200.0;
        metrics.response_time.max = 500.0;
        metrics.error_rate = 0.5;
        metrics.throughput.requests_per_second = 10.0;

        let results = evaluate_thresholds(&thresholds, &metrics);
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].severity, ThresholdSeverity::Warning);
        assert_eq!(results[1].severity, ThresholdSeverity::Critical);
        assert!(results[2].passed);
        assert_eq!(results[3].severity, ThresholdSeverity::Pass);
        assert_eq!(results[4].severity, ThresholdSeverity::Critical);
    }

    #[test]
    fn test_recommendations_rules() {
        let mut metrics = Metrics::default();
        metrics.error_rate = 8.0;
        metrics.response_time.p95 = 2500.0;
        metrics.response_time.p99 = 9000.0;
        metrics.throughput.requests_per_second = 3.0;
        let recs = recommendations(&metrics, &[], &[]);
        assert_eq!(recs.len(), 4);
        assert!(recs[0].contains("Error rate"));
        assert!(recs[1].contains("p95"));
        assert!(recs[2].contains("Throughput"));
        assert!(recs[3].contains("p99"));
    }

    #[test]
    fn test_recommendations_healthy() {
        let mut metrics = Metrics::default();
        metrics.response_time.p95 = 100.0;
        metrics.response_time.p99 = 120.0;
        metrics.throughput.requests_per_second = 50.0;
        let recs = recommendations(&metrics, &[], &[]);
        assert_eq!(recs, vec!["All metrics within expected ranges".to_string()]);
    }
}
