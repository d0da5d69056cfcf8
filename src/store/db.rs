use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{HistoryPoint, RunRecord, RunRecordStatus, TimeRange};
use crate::load::{LoadRunResult, RunOutcome};
use crate::regression::{PerformanceMetrics, RegressionAlert, RegressionBaseline};
use crate::scenario::Scenario;

/// Fixed-width timestamps so that range filters can compare TEXT columns.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

fn range_bounds(range: &TimeRange) -> (String, String) {
    (
        range.from.as_ref().map(ts).unwrap_or_default(),
        range.to.as_ref().map(ts).unwrap_or_else(|| "9999".to_string()),
    )
}

/// SQLite store for scenarios, runs, baselines and alerts.
pub struct PerfDb {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl PerfDb {
    pub fn new(data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Self::open(&data_dir.join("loadwarden.db"))
    }

    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::with_connection(conn, Some(db_path.to_path_buf()))
    }

    /// Throwaway database for tests and `--no-persist`.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, db_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
            db_path,
        };
        db.init_schema()?;
        db.cleanup_stale_runs()?;
        Ok(db)
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs left "running" by a previous process can never finish.
    fn cleanup_stale_runs(&self) -> anyhow::Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE runs SET status = 'interrupted' WHERE status = 'running'",
            [],
        )?;
        Ok(())
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS scenarios (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                scenario_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                started_at TEXT NOT NULL,
                completed_at TEXT,
                total_requests INTEGER,
                p95_ms REAL,
                error_rate REAL,
                thresholds_passed INTEGER,
                error TEXT,
                metrics_json TEXT,
                result_json TEXT
            );

            CREATE TABLE IF NOT EXISTS baselines (
                scenario_id TEXT NOT NULL,
                environment TEXT NOT NULL,
                version TEXT NOT NULL,
                run_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                baseline_json TEXT NOT NULL,
                PRIMARY KEY (scenario_id, environment)
            );

            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                scenario_id TEXT NOT NULL,
                run_id TEXT,
                metric TEXT NOT NULL,
                kind TEXT NOT NULL,
                severity TEXT NOT NULL,
                created_at TEXT NOT NULL,
                alert_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_runs_scenario_started ON runs(scenario_id, started_at);
            CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
            CREATE INDEX IF NOT EXISTS idx_alerts_scenario_created ON alerts(scenario_id, created_at);
        ",
        )?;
        Ok(())
    }

    // ========================================================================
    // Scenarios
    // ========================================================================

    pub fn upsert_scenario(&self, scenario: &Scenario) -> anyhow::Result<()> {
        let now = ts(&Utc::now());
        let conn = self.conn();
        conn.execute(
            "INSERT INTO scenarios (id, name, definition_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                definition_json = excluded.definition_json,
                updated_at = excluded.updated_at",
            params![
                scenario.id,
                scenario.name,
                serde_json::to_string(scenario)?,
                now
            ],
        )?;
        Ok(())
    }

    pub fn get_scenario(&self, id: &str) -> anyhow::Result<Option<Scenario>> {
        let conn = self.conn();
        let json: Option<String> = conn
            .query_row(
                "SELECT definition_json FROM scenarios WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(Into::into))
            .transpose()
    }

    pub fn list_scenarios(&self) -> anyhow::Result<Vec<Scenario>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT definition_json FROM scenarios ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|j| serde_json::from_str(j).map_err(Into::into))
            .collect()
    }

    // ========================================================================
    // Runs
    // ========================================================================

    pub fn insert_run(
        &self,
        run_id: &str,
        scenario_id: &str,
        started_at: &DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO runs (id, scenario_id, status, started_at) VALUES (?1, ?2, 'running', ?3)",
            params![run_id, scenario_id, ts(started_at)],
        )?;
        Ok(())
    }

    /// Store the final result. Inserts the row when the run was never
    /// registered (dry runs).
    pub fn complete_run(&self, result: &LoadRunResult) -> anyhow::Result<()> {
        let status = match result.outcome {
            RunOutcome::Completed => RunRecordStatus::Completed,
            RunOutcome::Stopped => RunRecordStatus::Stopped,
            RunOutcome::DryRun => RunRecordStatus::DryRun,
        };
        let metrics = PerformanceMetrics::from_result(result);
        let conn = self.conn();
        conn.execute(
            "INSERT INTO runs (id, scenario_id, status, started_at, completed_at, total_requests,
                               p95_ms, error_rate, thresholds_passed, metrics_json, result_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                completed_at = excluded.completed_at,
                total_requests = excluded.total_requests,
                p95_ms = excluded.p95_ms,
                error_rate = excluded.error_rate,
                thresholds_passed = excluded.thresholds_passed,
                metrics_json = excluded.metrics_json,
                result_json = excluded.result_json",
            params![
                result.run_id,
                result.scenario_id,
                status.as_str(),
                ts(&result.started_at),
                ts(&result.completed_at),
                result.summary.total_requests as i64,
                result.metrics.response_time.p95,
                result.metrics.error_rate,
                result.thresholds_passed(),
                serde_json::to_string(&metrics)?,
                serde_json::to_string(result)?,
            ],
        )?;
        Ok(())
    }

    pub fn fail_run(&self, run_id: &str, error: &str) -> anyhow::Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE runs SET status = 'failed', completed_at = ?1, error = ?2 WHERE id = ?3",
            params![ts(&Utc::now()), error, run_id],
        )?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> anyhow::Result<Option<LoadRunResult>> {
        let conn = self.conn();
        let json: Option<Option<String>> = conn
            .query_row(
                "SELECT result_json FROM runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        json.flatten()
            .map(|j| serde_json::from_str(&j).map_err(Into::into))
            .transpose()
    }

    pub fn list_runs(
        &self,
        scenario_id: Option<&str>,
        range: &TimeRange,
        limit: usize,
    ) -> anyhow::Result<Vec<RunRecord>> {
        let (from, to) = range_bounds(range);
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, scenario_id, status, started_at, completed_at, total_requests,
                    p95_ms, error_rate, thresholds_passed, error
             FROM runs
             WHERE (?1 IS NULL OR scenario_id = ?1) AND started_at >= ?2 AND started_at <= ?3
             ORDER BY started_at DESC
             LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(params![scenario_id, from, to, limit as i64], |row| {
                Ok(RunRecord {
                    id: row.get(0)?,
                    scenario_id: row.get(1)?,
                    status: RunRecordStatus::parse(&row.get::<_, String>(2)?),
                    started_at: parse_ts(&row.get::<_, String>(3)?),
                    completed_at: row.get::<_, Option<String>>(4)?.map(|s| parse_ts(&s)),
                    total_requests: row.get(5)?,
                    p95_ms: row.get(6)?,
                    error_rate: row.get(7)?,
                    thresholds_passed: row.get(8)?,
                    error: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Metrics of completed runs, oldest first, keeping the most recent `limit`.
    pub fn metric_history(
        &self,
        scenario_id: &str,
        range: &TimeRange,
        limit: usize,
    ) -> anyhow::Result<Vec<HistoryPoint>> {
        let (from, to) = range_bounds(range);
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, started_at, metrics_json FROM runs
             WHERE scenario_id = ?1 AND status = 'completed' AND metrics_json IS NOT NULL
               AND started_at >= ?2 AND started_at <= ?3
             ORDER BY started_at DESC
             LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(params![scenario_id, from, to, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut points = rows
            .into_iter()
            .map(|(run_id, started_at, json)| {
                Ok(HistoryPoint {
                    run_id,
                    started_at: parse_ts(&started_at),
                    metrics: serde_json::from_str(&json)?,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        points.reverse();
        Ok(points)
    }

    // ========================================================================
    // Baselines
    // ========================================================================

    /// Last write wins per (scenario, environment).
    pub fn upsert_baseline(&self, baseline: &RegressionBaseline) -> anyhow::Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO baselines (scenario_id, environment, version, run_id, created_at, baseline_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(scenario_id, environment) DO UPDATE SET
                version = excluded.version,
                run_id = excluded.run_id,
                created_at = excluded.created_at,
                baseline_json = excluded.baseline_json",
            params![
                baseline.scenario_id,
                baseline.environment,
                baseline.version,
                baseline.run_id,
                ts(&baseline.timestamp),
                serde_json::to_string(baseline)?,
            ],
        )?;
        Ok(())
    }

    pub fn get_baseline(
        &self,
        scenario_id: &str,
        environment: &str,
    ) -> anyhow::Result<Option<RegressionBaseline>> {
        let conn = self.conn();
        let json: Option<String> = conn
            .query_row(
                "SELECT baseline_json FROM baselines WHERE scenario_id = ?1 AND environment = ?2",
                params![scenario_id, environment],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(Into::into))
            .transpose()
    }

    pub fn list_baselines(&self) -> anyhow::Result<Vec<RegressionBaseline>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT baseline_json FROM baselines ORDER BY scenario_id, environment",
        )?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|j| serde_json::from_str(j).map_err(Into::into))
            .collect()
    }

    // ========================================================================
    // Alerts
    // ========================================================================

    pub fn insert_alert(&self, alert: &RegressionAlert, run_id: Option<&str>) -> anyhow::Result<()> {
        let kind = serde_json::to_value(alert.kind)?;
        let severity = serde_json::to_value(alert.severity)?;
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO alerts (id, scenario_id, run_id, metric, kind, severity, created_at, alert_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                alert.id,
                alert.scenario_id,
                run_id,
                alert.metric,
                kind.as_str().unwrap_or_default(),
                severity.as_str().unwrap_or_default(),
                ts(&alert.timestamp),
                serde_json::to_string(alert)?,
            ],
        )?;
        Ok(())
    }

    pub fn list_alerts(
        &self,
        scenario_id: Option<&str>,
        range: &TimeRange,
        limit: usize,
    ) -> anyhow::Result<Vec<RegressionAlert>> {
        let (from, to) = range_bounds(range);
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT alert_json FROM alerts
             WHERE (?1 IS NULL OR scenario_id = ?1) AND created_at >= ?2 AND created_at <= ?3
             ORDER BY created_at DESC
             LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(params![scenario_id, from, to, limit as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|j| serde_json::from_str(j).map_err(Into::into))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::controller::dry_run_result;
    use crate::regression::{AlertKind, BaselineMeta, Severity};
    use crate::scenario::tests::sample_scenario;

    fn db() -> PerfDb {
        PerfDb::open_in_memory().unwrap()
    }

    fn scenario() -> Scenario {
        let mut s = sample_scenario();
        s.id = "checkout".to_string();
        s
    }

    fn completed(run_id: &str, p95: f64) -> LoadRunResult {
        let mut result = dry_run_result(&scenario(), run_id.to_string());
        result.outcome = RunOutcome::Completed;
        result.metrics.response_time.p95 = p95;
        result
    }

    #[test]
    fn test_scenario_roundtrip_and_update() {
        let db = db();
        let mut s = scenario();
        db.upsert_scenario(&s).unwrap();
        s.name = "checkout-v2".to_string();
        db.upsert_scenario(&s).unwrap();

        let all = db.list_scenarios().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(db.get_scenario("checkout").unwrap().unwrap().name, "checkout-v2");
        assert!(db.get_scenario("missing").unwrap().is_none());
    }

    #[test]
    fn test_run_lifecycle() {
        let db = db();
        let result = completed("r1", 120.0);
        db.insert_run("r1", "checkout", &result.started_at).unwrap();
        let runs = db.list_runs(Some("checkout"), &TimeRange::default(), 10).unwrap();
        assert_eq!(runs[0].status, RunRecordStatus::Running);

        db.complete_run(&result).unwrap();
        let runs = db.list_runs(None, &TimeRange::default(), 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunRecordStatus::Completed);
        assert_eq!(runs[0].p95_ms, Some(120.0));

        let stored = db.get_run("r1").unwrap().unwrap();
        assert_eq!(stored.run_id, "r1");
    }

    #[test]
    fn test_failed_run() {
        let db = db();
        db.insert_run("r1", "checkout", &Utc::now()).unwrap();
        db.fail_run("r1", "boom").unwrap();
        let runs = db.list_runs(None, &TimeRange::default(), 10).unwrap();
        assert_eq!(runs[0].status, RunRecordStatus::Failed);
        assert_eq!(runs[0].error.as_deref(), Some("boom"));
        assert!(db.get_run("r1").unwrap().is_none());
    }

    #[test]
    fn test_stale_runs_marked_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = PerfDb::new(dir.path()).unwrap();
            db.insert_run("r1", "checkout", &Utc::now()).unwrap();
        }
        let db = PerfDb::new(dir.path()).unwrap();
        let runs = db.list_runs(None, &TimeRange::default(), 10).unwrap();
        assert_eq!(runs[0].status, RunRecordStatus::Interrupted);
    }

    #[test]
    fn test_metric_history_oldest_first_and_range() {
        let db = db();
        let base = Utc::now() - chrono::Duration::hours(3);
        for (i, p95) in [100.0, 110.0, 120.0].iter().enumerate() {
            let mut r = completed(&format!("r{}", i), *p95);
            r.started_at = base + chrono::Duration::hours(i as i64);
            db.complete_run(&r).unwrap();
        }
        let mut dry = dry_run_result(&scenario(), "dry".to_string());
        dry.started_at = base;
        db.complete_run(&dry).unwrap();

        let history = db.metric_history("checkout", &TimeRange::default(), 50).unwrap();
        let p95s: Vec<f64> = history.iter().map(|h| h.metrics.response_time.p95).collect();
        assert_eq!(p95s, vec![100.0, 110.0, 120.0]);

        let limited = db.metric_history("checkout", &TimeRange::default(), 2).unwrap();
        assert_eq!(limited[0].run_id, "r1");

        let range = TimeRange {
            from: Some(base + chrono::Duration::minutes(30)),
            to: None,
        };
        assert_eq!(db.metric_history("checkout", &range, 50).unwrap().len(), 2);
    }

    #[test]
    fn test_baseline_last_write_wins() {
        let db = db();
        let meta = BaselineMeta::default();
        db.upsert_baseline(&RegressionBaseline::from_result(&completed("r1", 100.0), &meta))
            .unwrap();
        db.upsert_baseline(&RegressionBaseline::from_result(&completed("r2", 90.0), &meta))
            .unwrap();

        let staging = BaselineMeta {
            environment: "staging".to_string(),
            ..BaselineMeta::default()
        };
        db.upsert_baseline(&RegressionBaseline::from_result(&completed("r3", 80.0), &staging))
            .unwrap();

        let baseline = db.get_baseline("checkout", "default").unwrap().unwrap();
        assert_eq!(baseline.run_id, "r2");
        assert_eq!(db.list_baselines().unwrap().len(), 2);
    }

    #[test]
    fn test_alerts_filtered_by_scenario() {
        let db = db();
        let alert = RegressionAlert {
            id: "a1".to_string(),
            scenario_id: "checkout".to_string(),
            metric: "errorRate".to_string(),
            kind: AlertKind::Regression,
            severity: Severity::High,
            degradation_pct: 80.0,
            baseline_value: 1.0,
            current_value: 1.8,
            confidence: 0.95,
            trend: None,
            recommended_actions: Vec::new(),
            message: "errorRate regressed".to_string(),
            timestamp: Utc::now(),
        };
        db.insert_alert(&alert, Some("r1")).unwrap();

        assert_eq!(db.list_alerts(Some("checkout"), &TimeRange::default(), 10).unwrap().len(), 1);
        assert!(db.list_alerts(Some("search"), &TimeRange::default(), 10).unwrap().is_empty());
    }
}
