use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{AppConfig, DEFAULT_ENVIRONMENT, DEFAULT_REQUEST_TIMEOUT_MS, HISTORY_WINDOW};
use crate::error::{LoadError, LoadResult};
use crate::events::{EventBus, LoadEvent};
use crate::load::controller::{dry_run_result, execute_run, RunDeps, RunProgress};
use crate::load::executor::Transport;
use crate::load::{LoadRunResult, RunOptions, RunOutcome, RunStatus};
use crate::notify::{format_alert, Notifier, TracingNotifier};
use crate::regression::detector::RegressionDetector;
use crate::regression::{
    BaselineMeta, PerformanceMetrics, RegressionAlert, RegressionBaseline, RegressionReport,
    RegressionThreshold, ReportPeriod,
};
use crate::scenario::{Scenario, ScenarioId};
use crate::settings::{load_settings, save_settings, PersistentSettings};
use crate::store::{PerfDb, RunRecord, TimeRange};

const REPORT_RUN_LIMIT: usize = 10_000;
const REPORT_ALERT_LIMIT: usize = 1_000;

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Environment used for automatic baselines and comparisons.
    pub environment: String,
    pub max_in_flight: Option<usize>,
    pub request_timeout: Duration,
    /// Where regression thresholds are persisted; `None` keeps them in memory.
    pub settings_path: Option<PathBuf>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENVIRONMENT.to_string(),
            max_in_flight: None,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            settings_path: None,
        }
    }
}

impl From<&AppConfig> for ServiceOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            environment: config.environment.clone(),
            max_in_flight: config.max_in_flight,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            settings_path: config.persist.then(|| config.settings_path()),
        }
    }
}

struct ActiveRun {
    run_id: String,
    progress: Arc<RunProgress>,
    stop_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

type Registry = Arc<Mutex<HashMap<ScenarioId, ActiveRun>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<ScenarioId, ActiveRun>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds a scenario's slot in the run registry. Dropping it frees the slot
/// and wakes anyone waiting in `stop_test`, even if the run task is aborted.
struct RunRegistration {
    scenario_id: ScenarioId,
    registry: Registry,
    done_tx: watch::Sender<bool>,
}

impl Drop for RunRegistration {
    fn drop(&mut self) {
        lock(&self.registry).remove(&self.scenario_id);
        let _ = self.done_tx.send(true);
    }
}

/// A run started in the background with `start_load_test`.
pub struct RunHandle {
    pub run_id: String,
    pub scenario_id: ScenarioId,
    pub handle: JoinHandle<LoadResult<LoadRunResult>>,
}

impl RunHandle {
    pub async fn wait(self) -> LoadResult<LoadRunResult> {
        self.handle
            .await
            .map_err(|e| LoadError::Task(e.to_string()))?
    }
}

/// Entry point for load runs, baselines and regression analysis.
pub struct LoadTestService {
    db: Arc<PerfDb>,
    transport: Arc<dyn Transport>,
    events: Arc<EventBus>,
    detector: RwLock<RegressionDetector>,
    notifiers: Vec<Arc<dyn Notifier>>,
    scenarios: RwLock<BTreeMap<ScenarioId, Arc<Scenario>>>,
    active: Registry,
    options: ServiceOptions,
}

impl LoadTestService {
    pub fn new(db: Arc<PerfDb>, transport: Arc<dyn Transport>, options: ServiceOptions) -> Self {
        let mut detector = RegressionDetector::default();
        if let Some(path) = &options.settings_path {
            let settings = load_settings(path);
            if !settings.thresholds.is_empty() {
                info!("Loaded {} regression thresholds from {:?}", settings.thresholds.len(), path);
            }
            detector.replace_thresholds(settings.thresholds);
        }

        Self {
            db,
            transport,
            events: Arc::new(EventBus::new()),
            detector: RwLock::new(detector),
            notifiers: vec![Arc::new(TracingNotifier)],
            scenarios: RwLock::new(BTreeMap::new()),
            active: Arc::new(Mutex::new(HashMap::new())),
            options,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn environment(&self) -> &str {
        &self.options.environment
    }

    /// Load persisted scenarios and seed the anomaly scorer from stored
    /// baselines. Returns the number of scenarios restored.
    pub async fn restore(&self) -> LoadResult<usize> {
        let stored = self.db.list_scenarios()?;
        let count = stored.len();
        {
            let mut scenarios = self.scenarios.write().await;
            for s in stored {
                scenarios.insert(s.id.clone(), Arc::new(s));
            }
        }

        let baselines = self.db.list_baselines()?;
        let mut detector = self.detector.write().await;
        for b in &baselines {
            detector.record_sample(&b.metrics);
        }
        info!(
            "Restored {} scenarios and {} baselines",
            count,
            baselines.len()
        );
        Ok(count)
    }

    // ========================================================================
    // Scenarios
    // ========================================================================

    pub async fn register_scenario(&self, mut scenario: Scenario) -> LoadResult<ScenarioId> {
        if scenario.id.trim().is_empty() {
            scenario.id = uuid::Uuid::new_v4().to_string();
        }
        scenario.validate()?;
        self.db.upsert_scenario(&scenario)?;

        let id = scenario.id.clone();
        info!("Registered scenario {} ({})", id, scenario.name);
        self.scenarios.write().await.insert(id.clone(), Arc::new(scenario));
        Ok(id)
    }

    pub async fn list_scenarios(&self) -> Vec<Scenario> {
        let mut all: Vec<Scenario> = self
            .scenarios
            .read()
            .await
            .values()
            .map(|s| (**s).clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub async fn get_scenario(&self, id: &str) -> LoadResult<Scenario> {
        self.scenario(id).await.map(|s| (*s).clone())
    }

    async fn scenario(&self, id: &str) -> LoadResult<Arc<Scenario>> {
        self.scenarios
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| LoadError::not_found(format!("Scenario '{}'", id)))
    }

    // ========================================================================
    // Runs
    // ========================================================================

    /// Run a scenario to completion and return its result.
    pub async fn run_load_test(
        &self,
        scenario_id: &str,
        options: RunOptions,
    ) -> LoadResult<LoadRunResult> {
        let scenario = self.scenario(scenario_id).await?;
        scenario.validate()?;
        if options.dry_run {
            return self.dry_run(&scenario);
        }
        let (registration, progress, stop_rx) = self.register_run(&scenario)?;
        self.drive(scenario, registration, progress, stop_rx, options)
            .await
    }

    /// Same checks as `run_load_test`, but the run continues in the background.
    pub async fn start_load_test(
        self: &Arc<Self>,
        scenario_id: &str,
        options: RunOptions,
    ) -> LoadResult<RunHandle> {
        let scenario = self.scenario(scenario_id).await?;
        scenario.validate()?;

        if options.dry_run {
            let result = self.dry_run(&scenario);
            return Ok(RunHandle {
                run_id: result.as_ref().map(|r| r.run_id.clone()).unwrap_or_default(),
                scenario_id: scenario.id.clone(),
                handle: tokio::spawn(async move { result }),
            });
        }

        let (registration, progress, stop_rx) = self.register_run(&scenario)?;
        let run_id = progress.run_id.clone();
        let svc = self.clone();
        let id = scenario.id.clone();
        let handle = tokio::spawn(async move {
            svc.drive(scenario, registration, progress, stop_rx, options)
                .await
        });

        Ok(RunHandle {
            run_id,
            scenario_id: id,
            handle,
        })
    }

    fn dry_run(&self, scenario: &Scenario) -> LoadResult<LoadRunResult> {
        if lock(&self.active).contains_key(&scenario.id) {
            return Err(LoadError::AlreadyRunning(scenario.id.clone()));
        }
        let result = dry_run_result(scenario, uuid::Uuid::new_v4().to_string());
        if let Err(e) = self.db.complete_run(&result) {
            warn!("Failed to record dry run {}: {}", result.run_id, e);
        }
        info!("Dry run for scenario {} ({})", scenario.id, result.run_id);
        Ok(result)
    }

    /// Claim the scenario's slot; fails fast if a run already holds it.
    fn register_run(
        &self,
        scenario: &Scenario,
    ) -> LoadResult<(RunRegistration, Arc<RunProgress>, watch::Receiver<bool>)> {
        let mut active = lock(&self.active);
        if let Some(existing) = active.get(&scenario.id) {
            warn!(
                "Rejected run for scenario {}: run {} still active",
                scenario.id, existing.run_id
            );
            return Err(LoadError::AlreadyRunning(scenario.id.clone()));
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let progress = Arc::new(RunProgress::new(run_id.clone(), scenario));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        active.insert(
            scenario.id.clone(),
            ActiveRun {
                run_id,
                progress: progress.clone(),
                stop_tx,
                done_rx,
            },
        );

        let registration = RunRegistration {
            scenario_id: scenario.id.clone(),
            registry: self.active.clone(),
            done_tx,
        };
        Ok((registration, progress, stop_rx))
    }

    async fn drive(
        &self,
        scenario: Arc<Scenario>,
        registration: RunRegistration,
        progress: Arc<RunProgress>,
        stop_rx: watch::Receiver<bool>,
        options: RunOptions,
    ) -> LoadResult<LoadRunResult> {
        let run_id = progress.run_id.clone();
        if let Err(e) = self.db.insert_run(&run_id, &scenario.id, &chrono::Utc::now()) {
            warn!("Failed to record start of run {}: {}", run_id, e);
        }
        self.events
            .publish(LoadEvent::RunStarted {
                run_id: run_id.clone(),
                scenario_id: scenario.id.clone(),
                concurrency: scenario.user_profile.concurrency,
            })
            .await;

        let deps = RunDeps {
            transport: self.transport.clone(),
            max_in_flight: self.options.max_in_flight,
            request_timeout: self.options.request_timeout,
            events: self.events.clone(),
        };
        let mut result = match execute_run(scenario.clone(), progress, deps, stop_rx).await {
            Ok(r) => r,
            Err(e) => {
                if let Err(db_err) = self.db.fail_run(&run_id, &e.to_string()) {
                    warn!("Failed to record failure of run {}: {}", run_id, db_err);
                }
                self.events
                    .publish(LoadEvent::RunFailed {
                        run_id,
                        scenario_id: scenario.id.clone(),
                        error: e.to_string(),
                    })
                    .await;
                return Err(e);
            }
        };
        // The slot is free as soon as traffic has stopped.
        drop(registration);

        if let Err(e) = self.db.complete_run(&result) {
            warn!("Failed to record result of run {}: {}", run_id, e);
        }

        if options.compare_baseline {
            match self.analyze_regressions(&scenario.id, &result).await {
                Ok(alerts) => result.alerts = alerts,
                Err(e) => warn!("Regression analysis for run {} failed: {}", run_id, e),
            }
        }
        if options.save_baseline {
            if result.outcome == RunOutcome::Completed {
                let meta = BaselineMeta {
                    environment: self.options.environment.clone(),
                    ..BaselineMeta::default()
                };
                if let Err(e) = self.set_baseline(&scenario.id, &result, meta).await {
                    warn!("Automatic baseline for run {} not saved: {}", run_id, e);
                }
            } else {
                info!("Run {} was stopped early; baseline not updated", run_id);
            }
        }

        self.events
            .publish(LoadEvent::RunCompleted {
                run_id,
                scenario_id: scenario.id.clone(),
                outcome: result.outcome,
                total_requests: result.summary.total_requests,
                thresholds_passed: result.thresholds_passed(),
            })
            .await;
        Ok(result)
    }

    /// Status of the scenario's active run, or of any active run when no
    /// scenario is given.
    pub async fn get_status(&self, scenario_id: Option<&str>) -> RunStatus {
        let progress = {
            let active = lock(&self.active);
            match scenario_id {
                Some(id) => active.get(id).map(|r| r.progress.clone()),
                None => active.values().next().map(|r| r.progress.clone()),
            }
        };
        match progress {
            Some(p) => p.status().await,
            None => RunStatus::idle(scenario_id.map(str::to_string)),
        }
    }

    pub async fn active_runs(&self) -> Vec<RunStatus> {
        let progresses: Vec<Arc<RunProgress>> = lock(&self.active)
            .values()
            .map(|r| r.progress.clone())
            .collect();
        let mut out = Vec::with_capacity(progresses.len());
        for p in progresses {
            out.push(p.status().await);
        }
        out
    }

    /// Signal the scenario's run to stop and wait until it has wound down.
    pub async fn stop_test(&self, scenario_id: &str) -> LoadResult<()> {
        let mut done_rx = {
            let active = lock(&self.active);
            let run = active.get(scenario_id).ok_or_else(|| {
                LoadError::not_found(format!("Active run for scenario '{}'", scenario_id))
            })?;
            info!("Stopping run {} for scenario {}", run.run_id, scenario_id);
            let _ = run.stop_tx.send(true);
            run.done_rx.clone()
        };
        // A closed channel means the registration is already gone.
        let _ = done_rx.wait_for(|done| *done).await;
        Ok(())
    }

    pub fn list_runs(
        &self,
        scenario_id: Option<&str>,
        range: &TimeRange,
        limit: usize,
    ) -> LoadResult<Vec<RunRecord>> {
        Ok(self.db.list_runs(scenario_id, range, limit)?)
    }

    pub fn get_run(&self, run_id: &str) -> LoadResult<LoadRunResult> {
        self.db
            .get_run(run_id)?
            .ok_or_else(|| LoadError::not_found(format!("Run '{}'", run_id)))
    }

    // ========================================================================
    // Baselines and regression analysis
    // ========================================================================

    pub async fn set_baseline(
        &self,
        scenario_id: &str,
        result: &LoadRunResult,
        meta: BaselineMeta,
    ) -> LoadResult<RegressionBaseline> {
        self.scenario(scenario_id).await?;
        if result.scenario_id != scenario_id {
            return Err(LoadError::validation(format!(
                "run {} belongs to scenario '{}', not '{}'",
                result.run_id, result.scenario_id, scenario_id
            )));
        }
        if result.outcome == RunOutcome::DryRun {
            return Err(LoadError::validation("a dry run cannot become a baseline"));
        }
        if !meta.confidence.is_finite() || meta.confidence <= 0.0 || meta.confidence > 1.0 {
            return Err(LoadError::validation("confidence must be in (0, 1]"));
        }

        let baseline = RegressionBaseline::from_result(result, &meta);
        self.db.upsert_baseline(&baseline)?;
        self.detector.write().await.record_sample(&baseline.metrics);

        info!(
            "Baseline for {} ({}) set from run {}",
            scenario_id, baseline.environment, result.run_id
        );
        self.events
            .publish(LoadEvent::BaselineUpdated {
                scenario_id: scenario_id.to_string(),
                environment: baseline.environment.clone(),
                run_id: result.run_id.clone(),
            })
            .await;
        Ok(baseline)
    }

    pub fn get_baselines(&self) -> LoadResult<Vec<RegressionBaseline>> {
        Ok(self.db.list_baselines()?)
    }

    pub fn get_baseline(&self, scenario_id: &str) -> LoadResult<Option<RegressionBaseline>> {
        Ok(self.db.get_baseline(scenario_id, &self.options.environment)?)
    }

    /// Compare a run against the scenario's baseline and history. Alerts are
    /// persisted, published and handed to every notifier.
    pub async fn analyze_regressions(
        &self,
        scenario_id: &str,
        result: &LoadRunResult,
    ) -> LoadResult<Vec<RegressionAlert>> {
        let baseline = self.db.get_baseline(scenario_id, &self.options.environment)?;
        if baseline.is_none() {
            return Ok(Vec::new());
        }

        let history: Vec<PerformanceMetrics> = match self
            .db
            .metric_history(scenario_id, &TimeRange::default(), HISTORY_WINDOW + 1)
        {
            Ok(points) => points
                .into_iter()
                .filter(|p| p.run_id != result.run_id)
                .map(|p| p.metrics)
                .collect(),
            Err(e) => {
                warn!("Metric history for {} unavailable: {}", scenario_id, e);
                Vec::new()
            }
        };

        let current = PerformanceMetrics::from_result(result);
        let alerts = self.detector.read().await.analyze(
            scenario_id,
            baseline.as_ref(),
            &current,
            &history,
        );

        for alert in &alerts {
            if let Err(e) = self.db.insert_alert(alert, Some(&result.run_id)) {
                warn!("Failed to store alert {}: {}", alert.id, e);
            }
            let message = format_alert(alert);
            for notifier in &self.notifiers {
                notifier.notify(alert, &message).await;
            }
            self.events
                .publish(LoadEvent::Alert {
                    alert: alert.clone(),
                })
                .await;
        }
        Ok(alerts)
    }

    pub async fn set_threshold(&self, metric: &str, mut threshold: RegressionThreshold) -> LoadResult<()> {
        threshold.metric = metric.to_string();
        let thresholds = {
            let mut detector = self.detector.write().await;
            detector.set_threshold(threshold)?;
            detector.thresholds()
        };
        if let Some(path) = &self.options.settings_path {
            if let Err(e) = save_settings(path, &PersistentSettings { thresholds }) {
                warn!("Failed to save thresholds to {:?}: {}", path, e);
            }
        }
        Ok(())
    }

    pub async fn thresholds(&self) -> Vec<RegressionThreshold> {
        self.detector.read().await.thresholds()
    }

    pub async fn retrain_scorer(&self) -> bool {
        self.detector.write().await.retrain()
    }

    pub async fn generate_regression_report(
        &self,
        scenario_id: &str,
        period: ReportPeriod,
    ) -> LoadResult<RegressionReport> {
        self.scenario(scenario_id).await?;
        if period.from > period.to {
            return Err(LoadError::validation("report period starts after it ends"));
        }

        let range = TimeRange {
            from: Some(period.from),
            to: Some(period.to),
        };
        let history: Vec<PerformanceMetrics> = self
            .db
            .metric_history(scenario_id, &range, REPORT_RUN_LIMIT)?
            .into_iter()
            .map(|p| p.metrics)
            .collect();
        let alerts = self
            .db
            .list_alerts(Some(scenario_id), &range, REPORT_ALERT_LIMIT)?;

        Ok(self
            .detector
            .read()
            .await
            .report(scenario_id, period, &history, alerts))
    }
}
