pub mod baseline;
pub mod detector;
pub mod scorer;
pub mod stats;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_ALPHA, DEFAULT_ENVIRONMENT};

// ============================================================================
// Metrics snapshot
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySnapshot {
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughputSnapshot {
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_mb: f64,
}

/// The subset of a run's metrics that regression analysis tracks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub response_time: LatencySnapshot,
    pub throughput: ThroughputSnapshot,
    /// Percent of failed requests.
    pub error_rate: f64,
    /// Percent of successful requests.
    pub availability: f64,
    #[serde(default)]
    pub resource_usage: ResourceUsage,
}

// ============================================================================
// Baselines and thresholds
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegressionBaseline {
    pub scenario_id: String,
    pub environment: String,
    pub version: String,
    pub metrics: PerformanceMetrics,
    pub sample_size: u64,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineMeta {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_environment() -> String {
    DEFAULT_ENVIRONMENT.to_string()
}

fn default_confidence() -> f64 {
    1.0 - DEFAULT_ALPHA
}

impl Default for BaselineMeta {
    fn default() -> Self {
        Self {
            version: default_version(),
            environment: default_environment(),
            confidence: default_confidence(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    #[default]
    Absolute,
    Statistical,
}

/// Per-metric alerting policy. Percentages are relative deltas versus baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegressionThreshold {
    pub metric: String,
    pub warning_pct: f64,
    pub critical_pct: f64,
    #[serde(default)]
    pub method: DetectionMethod,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_min_samples")]
    pub min_sample_size: usize,
}

fn default_min_samples() -> usize {
    5
}

impl RegressionThreshold {
    pub fn new(metric: &str, warning_pct: f64, critical_pct: f64) -> Self {
        Self {
            metric: metric.to_string(),
            warning_pct,
            critical_pct,
            method: DetectionMethod::Absolute,
            confidence: default_confidence(),
            min_sample_size: default_min_samples(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricDirection {
    HigherIsWorse,
    LowerIsWorse,
}

pub const METRIC_P95: &str = "responseTime.p95";
pub const METRIC_MEAN: &str = "responseTime.mean";
pub const METRIC_THROUGHPUT: &str = "throughput.mean";
pub const METRIC_ERROR_RATE: &str = "errorRate";

/// Metrics compared against baselines, in reporting order.
pub const TRACKED_METRICS: [&str; 4] = [METRIC_P95, METRIC_MEAN, METRIC_THROUGHPUT, METRIC_ERROR_RATE];

impl PerformanceMetrics {
    pub fn value(&self, metric: &str) -> Option<f64> {
        match metric {
            METRIC_P95 => Some(self.response_time.p95),
            METRIC_MEAN => Some(self.response_time.mean),
            "responseTime.p50" => Some(self.response_time.p50),
            "responseTime.p99" => Some(self.response_time.p99),
            METRIC_THROUGHPUT => Some(self.throughput.mean),
            METRIC_ERROR_RATE => Some(self.error_rate),
            "availability" => Some(self.availability),
            _ => None,
        }
    }
}

pub fn direction(metric: &str) -> MetricDirection {
    match metric {
        METRIC_THROUGHPUT | "availability" => MetricDirection::LowerIsWorse,
        _ => MetricDirection::HigherIsWorse,
    }
}

// ============================================================================
// Alerts and analysis output
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Regression,
    Improvement,
    Trend,
    Anomaly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Degrading,
    Stable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegressionAlert {
    pub id: String,
    pub scenario_id: String,
    pub metric: String,
    pub kind: AlertKind,
    pub severity: Severity,
    /// Signed; positive always means worse.
    pub degradation_pct: f64,
    pub baseline_value: f64,
    pub current_value: f64,
    pub confidence: f64,
    pub trend: Option<Trend>,
    pub recommended_actions: Vec<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendAnalysis {
    pub metric: String,
    pub trend: Trend,
    /// Mann–Kendall S statistic.
    pub s: i64,
    pub z: f64,
    pub significant: bool,
    /// Theil–Sen slope in metric units per run.
    pub slope: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Level,
    Variance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePoint {
    /// Estimated first index of the new regime.
    pub index: usize,
    /// Index at which the cumulative sum crossed the threshold.
    pub detected_at: usize,
    pub kind: ChangeKind,
    pub mean_before: f64,
    pub mean_after: f64,
    pub cusum: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seasonality {
    pub seasonal: bool,
    pub period: Option<usize>,
    /// Autocorrelation at the reported period.
    pub strength: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricChangePoints {
    pub metric: String,
    pub points: Vec<ChangePoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSeasonality {
    pub metric: String,
    #[serde(flatten)]
    pub seasonality: Seasonality,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPeriod {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub runs_analyzed: usize,
    pub total_alerts: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub regressions: usize,
    pub improvements: usize,
    pub degrading_metrics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegressionReport {
    pub scenario_id: String,
    pub period: ReportPeriod,
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub alerts: Vec<RegressionAlert>,
    pub trends: Vec<TrendAnalysis>,
    pub change_points: Vec<MetricChangePoints>,
    pub seasonality: Vec<MetricSeasonality>,
    pub recommendations: Vec<String>,
}
