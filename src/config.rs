use clap::Parser;
use std::path::PathBuf;

/// loadwarden: synthetic load generation and performance regression detection.
#[derive(Parser, Debug, Clone)]
#[command(name = "loadwarden")]
pub struct CliArgs {
    /// HTTP port for the control API
    #[arg(long = "port", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding the SQLite store and settings file
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Directory of scenario JSON files registered at startup
    #[arg(short = 's', long = "scenario-dir")]
    pub scenario_dir: Option<PathBuf>,

    /// Environment tag used for baselines (e.g. staging, prod)
    #[arg(short = 'e', long = "environment", default_value = DEFAULT_ENVIRONMENT)]
    pub environment: String,

    /// Upper bound on concurrently in-flight requests per run (defaults to the scenario's concurrency)
    #[arg(long = "max-in-flight")]
    pub max_in_flight: Option<usize>,

    /// Default per-request timeout when an endpoint does not set one
    #[arg(long = "request-timeout-ms", default_value_t = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub request_timeout_ms: u64,

    /// Write daily-rolling log files to this directory in addition to stdout
    #[arg(long = "log-dir")]
    pub log_dir: Option<PathBuf>,

    /// Keep everything in memory (nothing written to disk)
    #[arg(long = "no-persist")]
    pub no_persist: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub scenario_dir: Option<PathBuf>,
    pub environment: String,
    pub max_in_flight: Option<usize>,
    pub request_timeout_ms: u64,
    pub log_dir: Option<PathBuf>,
    pub persist: bool,
}

pub const DEFAULT_PORT: u16 = 9890;
pub const DEFAULT_ENVIRONMENT: &str = "default";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

// Run controller constants
pub const TIMELINE_INTERVAL_MS: u64 = 1_000;
pub const RUN_GRACE_PERIOD_SECS: u64 = 10;
pub const DEFAULT_RAMP_STEPS: u32 = 4;
/// Upper bound on ramp-up + steady + ramp-down for a single run (7 days).
pub const MAX_PLANNED_DURATION_MS: u64 = 7 * 24 * 60 * 60 * 1_000;

// Recommendation heuristics
pub const RECOMMEND_ERROR_RATE_PCT: f64 = 5.0;
pub const RECOMMEND_P95_MS: f64 = 2_000.0;
pub const RECOMMEND_MIN_RPS: f64 = 10.0;
pub const RECOMMEND_TAIL_RATIO: f64 = 3.0;

// Threshold severity: failing by more than this factor is critical
pub const THRESHOLD_CRITICAL_FACTOR: f64 = 1.5;

// Statistics constants
pub const DEFAULT_ALPHA: f64 = 0.05;
pub const CUSUM_DRIFT: f64 = 0.5;
pub const CUSUM_DEFAULT_THRESHOLD: f64 = 5.0;
pub const CHANGE_POINT_WINDOW: usize = 5;
pub const TREND_Z_CRITICAL: f64 = 1.96;
pub const TREND_MIN_POINTS: usize = 4;
pub const SEASONALITY_MAX_LAG: usize = 48;
pub const SEASONALITY_PEAK_RATIO: f64 = 0.3;

// Anomaly scorer constants
pub const SCORER_BUFFER_SIZE: usize = 5_000;
pub const SCORER_MIN_SAMPLES: usize = 10;
pub const ANOMALY_ALERT_SCORE: f64 = 0.8;

// History window used for trend analysis during regression checks
pub const HISTORY_WINDOW: usize = 50;

// Event bus constants
pub const EVENT_BUFFER_SIZE: usize = 500;
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

impl AppConfig {
    pub fn from_args(args: CliArgs) -> Self {
        let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
        AppConfig {
            port: args.port,
            data_dir,
            scenario_dir: args.scenario_dir,
            environment: args.environment,
            max_in_flight: args.max_in_flight,
            request_timeout_ms: args.request_timeout_ms,
            log_dir: args.log_dir,
            persist: !args.no_persist,
        }
    }

    /// Path to the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("loadwarden.db")
    }

    /// Path to the persisted settings (regression thresholds).
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("loadwarden-settings.json")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("loadwarden")
}
