pub mod db;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use db::PerfDb;

use crate::regression::PerformanceMetrics;

// ============================================================================
// Data model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunRecordStatus {
    Running,
    Completed,
    Stopped,
    DryRun,
    Failed,
    Interrupted,
}

impl RunRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunRecordStatus::Running => "running",
            RunRecordStatus::Completed => "completed",
            RunRecordStatus::Stopped => "stopped",
            RunRecordStatus::DryRun => "dry_run",
            RunRecordStatus::Failed => "failed",
            RunRecordStatus::Interrupted => "interrupted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => RunRecordStatus::Running,
            "completed" => RunRecordStatus::Completed,
            "stopped" => RunRecordStatus::Stopped,
            "dry_run" => RunRecordStatus::DryRun,
            "failed" => RunRecordStatus::Failed,
            _ => RunRecordStatus::Interrupted,
        }
    }
}

/// Row summary for run listings; the full `LoadRunResult` is fetched by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub scenario_id: String,
    pub status: RunRecordStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_requests: Option<i64>,
    pub p95_ms: Option<f64>,
    pub error_rate: Option<f64>,
    pub thresholds_passed: Option<bool>,
    pub error: Option<String>,
}

/// One point of a scenario's metric history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub metrics: PerformanceMetrics,
}

/// Inclusive time range filter. Open ends are unbounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}
