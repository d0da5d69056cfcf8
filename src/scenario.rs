use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::MAX_PLANNED_DURATION_MS;
use crate::error::{LoadError, LoadResult};

pub type ScenarioId = String;

// ============================================================================
// Data model
// ============================================================================

/// Immutable load test definition. Read-only for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    #[serde(default)]
    pub id: ScenarioId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Base target URL, e.g. `http://localhost:8000`.
    pub target: String,
    pub endpoints: Vec<EndpointDefinition>,
    pub user_profile: UserProfile,
    pub duration: TestDuration,
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Values substituted for `{{name}}` placeholders in paths, headers and bodies.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDefinition {
    #[serde(default)]
    pub name: Option<String>,
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub validation: ValidationRules,
}

/// Success classification rules, checked in declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRules {
    #[serde(default)]
    pub status_codes: Option<Vec<u16>>,
    #[serde(default)]
    pub max_response_time_ms: Option<f64>,
    #[serde(default)]
    pub body_contains: Vec<String>,
    #[serde(default)]
    pub required_headers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub concurrency: usize,
    #[serde(default)]
    pub ramp_up: RampConfig,
    #[serde(default)]
    pub ramp_down: RampConfig,
    #[serde(default)]
    pub think_time: ThinkTime,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RampConfig {
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub strategy: RampStrategy,
    /// Batch count for the `step` strategy.
    #[serde(default)]
    pub steps: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RampStrategy {
    #[default]
    Linear,
    Exponential,
    Step,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkTime {
    pub min_ms: f64,
    pub max_ms: f64,
    #[serde(default)]
    pub distribution: Distribution,
}

impl Default for ThinkTime {
    fn default() -> Self {
        Self {
            min_ms: 0.0,
            max_ms: 0.0,
            distribution: Distribution::Uniform,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    #[default]
    Uniform,
    Normal,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDuration {
    pub total_ms: u64,
    /// Leading part of the steady phase excluded from aggregate metrics.
    #[serde(default)]
    pub warmup_ms: u64,
    /// Trailing part of the steady phase excluded from aggregate metrics.
    #[serde(default)]
    pub cooldown_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    #[serde(default)]
    pub response_time: ResponseTimeThresholds,
    #[serde(default)]
    pub error_rate: ErrorRateThreshold,
    #[serde(default)]
    pub throughput: ThroughputThreshold,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTimeThresholds {
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRateThreshold {
    /// Maximum error rate in percent.
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughputThreshold {
    /// Minimum requests per second.
    pub min: Option<f64>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_weight() -> f64 {
    1.0
}

// ============================================================================
// Behavior
// ============================================================================

impl EndpointDefinition {
    /// Display name, falling back to `METHOD path`.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{} {}", self.method.to_uppercase(), self.path),
        }
    }
}

impl Scenario {
    pub fn total_weight(&self) -> f64 {
        self.endpoints.iter().map(|e| e.weight).sum()
    }

    /// Ramp-up + steady + ramp-down, excluding the grace period.
    pub fn planned_duration(&self) -> Duration {
        Duration::from_millis(self.planned_ms())
    }

    fn planned_ms(&self) -> u64 {
        self.user_profile
            .ramp_up
            .duration_ms
            .saturating_add(self.duration.total_ms)
            .saturating_add(self.user_profile.ramp_down.duration_ms)
    }

    /// Reject malformed definitions before a run starts.
    pub fn validate(&self) -> LoadResult<()> {
        if self.name.trim().is_empty() {
            return Err(LoadError::validation("scenario name must not be empty"));
        }

        let target = url::Url::parse(&self.target).map_err(|e| {
            LoadError::validation(format!("invalid target '{}': {}", self.target, e))
        })?;
        if target.scheme() != "http" && target.scheme() != "https" {
            return Err(LoadError::validation(format!(
                "target scheme must be http or https, got '{}'",
                target.scheme()
            )));
        }

        if self.endpoints.is_empty() {
            return Err(LoadError::validation("scenario has no endpoints"));
        }
        for endpoint in &self.endpoints {
            if endpoint.path.is_empty() {
                return Err(LoadError::validation("endpoint path must not be empty"));
            }
            if !endpoint.weight.is_finite() || endpoint.weight < 0.0 {
                return Err(LoadError::validation(format!(
                    "endpoint '{}' has invalid weight {}",
                    endpoint.label(),
                    endpoint.weight
                )));
            }
            if endpoint.method.is_empty()
                || !endpoint.method.chars().all(|c| c.is_ascii_alphabetic())
            {
                return Err(LoadError::validation(format!(
                    "endpoint '{}' has invalid method '{}'",
                    endpoint.label(),
                    endpoint.method
                )));
            }
            if endpoint.timeout_ms == Some(0) {
                return Err(LoadError::validation(format!(
                    "endpoint '{}' has a zero timeout",
                    endpoint.label()
                )));
            }
        }
        if self.total_weight() <= 0.0 {
            return Err(LoadError::validation(
                "sum of endpoint weights must be greater than zero",
            ));
        }

        let profile = &self.user_profile;
        if profile.concurrency == 0 {
            return Err(LoadError::validation("concurrency must be at least 1"));
        }
        let think = &profile.think_time;
        if !think.min_ms.is_finite() || !think.max_ms.is_finite() || think.min_ms < 0.0 {
            return Err(LoadError::validation("think time bounds must be finite and >= 0"));
        }
        if think.min_ms > think.max_ms {
            return Err(LoadError::validation(format!(
                "think time min ({}) exceeds max ({})",
                think.min_ms, think.max_ms
            )));
        }
        for (label, ramp) in [("rampUp", &profile.ramp_up), ("rampDown", &profile.ramp_down)] {
            if ramp.steps == Some(0) {
                return Err(LoadError::validation(format!("{label}.steps must be at least 1")));
            }
        }

        if self.duration.total_ms == 0 {
            return Err(LoadError::validation("duration.totalMs must be greater than zero"));
        }
        if self.planned_ms() > MAX_PLANNED_DURATION_MS {
            return Err(LoadError::validation(format!(
                "rampUp + totalMs + rampDown must not exceed {}ms",
                MAX_PLANNED_DURATION_MS
            )));
        }
        if self.duration.warmup_ms.saturating_add(self.duration.cooldown_ms)
            >= self.duration.total_ms
        {
            return Err(LoadError::validation(
                "warmup + cooldown must be shorter than the total duration",
            ));
        }

        let t = &self.thresholds;
        let limits = [
            ("responseTime.p95", t.response_time.p95),
            ("responseTime.p99", t.response_time.p99),
            ("responseTime.max", t.response_time.max),
            ("errorRate.max", t.error_rate.max),
            ("throughput.min", t.throughput.min),
        ];
        for (name, value) in limits {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(LoadError::validation(format!(
                        "threshold {name} must be a non-negative number"
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Read every `*.json` scenario in a directory. Files that fail to parse are
/// returned as errors alongside their path so the caller can report them.
pub fn load_scenario_dir(dir: &Path) -> Vec<(PathBuf, anyhow::Result<Scenario>)> {
    let pattern = dir.join("*.json");
    let pattern = pattern.to_string_lossy();
    let paths = match glob::glob(&pattern) {
        Ok(paths) => paths,
        Err(e) => return vec![(dir.to_path_buf(), Err(e.into()))],
    };

    paths
        .filter_map(|entry| entry.ok())
        .map(|path| {
            let parsed = std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|content| serde_json::from_str::<Scenario>(&content).map_err(Into::into));
            (path, parsed)
        })
        .collect()
}
