pub mod controller;
pub mod executor;
pub mod metrics;
pub mod sampler;
pub mod selector;
pub mod user;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::regression::RegressionAlert;

// ============================================================================
// Data model
// ============================================================================

/// One executed request. Immutable once produced by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResult {
    pub success: bool,
    /// 0 when the transport failed before a response arrived.
    pub status_code: u16,
    pub latency_ms: f64,
    pub payload_bytes: u64,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Monotonic offset from run start at which the request completed.
    pub offset_ms: u64,
    pub user_id: usize,
    pub endpoint: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePoint {
    pub offset_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub active_users: usize,
    pub requests_per_second: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    /// Percent of failed requests in the window.
    pub error_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTimeStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub std: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughputStats {
    pub requests_per_second: f64,
    pub bytes_per_second: f64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcurrencyStats {
    pub max_users: usize,
    pub avg_users: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub response_time: ResponseTimeStats,
    pub throughput: ThroughputStats,
    /// Percent of failed requests.
    pub error_rate: f64,
    pub concurrency: ConcurrencyStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Requests counted in `Metrics` (warmup/cooldown excluded).
    pub measured_requests: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointBreakdown {
    pub endpoint: String,
    pub path: String,
    pub requests: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummary {
    pub message: String,
    pub count: u64,
    pub percentage: f64,
    pub endpoints: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdSeverity {
    Pass,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdResult {
    pub metric: String,
    pub threshold: f64,
    pub actual: f64,
    pub passed: bool,
    pub severity: ThresholdSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Stopped,
    DryRun,
}

/// Final artifact of a load run. Built once at run end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRunResult {
    pub run_id: String,
    pub scenario_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub summary: RunSummary,
    pub metrics: Metrics,
    pub endpoints: Vec<EndpointBreakdown>,
    pub timeline: Vec<TimelinePoint>,
    pub errors: Vec<ErrorSummary>,
    pub thresholds: Vec<ThresholdResult>,
    pub recommendations: Vec<String>,
    /// Regression alerts raised when the run was compared against its baseline.
    #[serde(default)]
    pub alerts: Vec<RegressionAlert>,
}

impl LoadRunResult {
    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }
}

/// Lifecycle phase reported by `get_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    RampUp,
    Steady,
    RampDown,
    Draining,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub scenario_id: Option<String>,
    pub run_id: Option<String>,
    pub is_running: bool,
    pub phase: RunPhase,
    pub progress: f64,
    pub elapsed_ms: u64,
    pub eta_remaining_ms: u64,
    pub active_users: usize,
}

impl RunStatus {
    pub fn idle(scenario_id: Option<String>) -> Self {
        Self {
            scenario_id,
            run_id: None,
            is_running: false,
            phase: RunPhase::Idle,
            progress: 0.0,
            elapsed_ms: 0,
            eta_remaining_ms: 0,
            active_users: 0,
        }
    }
}

/// Per-run options for `run_load_test`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub save_baseline: bool,
    #[serde(default)]
    pub compare_baseline: bool,
}
