use chrono::Utc;
use futures::future::join_all;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::executor::{RequestExecutor, Transport};
use super::metrics;
use super::sampler::ramp_schedule;
use super::selector::WeightedSelector;
use super::user::{RunContext, UserReport, VirtualUser};
use super::{
    ConcurrencyStats, LoadRunResult, Metrics, RequestResult, ResponseTimeStats, RunOutcome,
    RunPhase, RunStatus, RunSummary, ThroughputStats, TimelinePoint,
};
use crate::config::{MAX_PLANNED_DURATION_MS, RUN_GRACE_PERIOD_SECS, TIMELINE_INTERVAL_MS};
use crate::error::LoadResult;
use crate::events::{EventBus, LoadEvent};
use crate::scenario::{RampConfig, Scenario};

/// Collaborators a run needs besides its scenario.
#[derive(Clone)]
pub struct RunDeps {
    pub transport: Arc<dyn Transport>,
    /// Cap on concurrent in-flight requests; defaults to the scenario's concurrency.
    pub max_in_flight: Option<usize>,
    pub request_timeout: Duration,
    pub events: Arc<EventBus>,
}

/// Live view of a run, read by `get_status` while the controller writes it.
pub struct RunProgress {
    pub run_id: String,
    pub scenario_id: String,
    started: Instant,
    planned: Duration,
    phase: RwLock<RunPhase>,
    active_users: Arc<AtomicUsize>,
}

impl RunProgress {
    pub fn new(run_id: String, scenario: &Scenario) -> Self {
        Self {
            run_id,
            scenario_id: scenario.id.clone(),
            started: Instant::now(),
            planned: scenario.planned_duration(),
            phase: RwLock::new(RunPhase::RampUp),
            active_users: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn set_phase(&self, phase: RunPhase) {
        *self.phase.write().await = phase;
    }

    pub async fn status(&self) -> RunStatus {
        let elapsed = self.started.elapsed();
        let progress = if self.planned.is_zero() {
            100.0
        } else {
            (elapsed.as_secs_f64() / self.planned.as_secs_f64() * 100.0).min(100.0)
        };
        RunStatus {
            scenario_id: Some(self.scenario_id.clone()),
            run_id: Some(self.run_id.clone()),
            is_running: true,
            phase: *self.phase.read().await,
            progress,
            elapsed_ms: elapsed.as_millis() as u64,
            eta_remaining_ms: self.planned.saturating_sub(elapsed).as_millis() as u64,
            active_users: self.active_users.load(Ordering::SeqCst),
        }
    }
}

// ============================================================================
// Run lifecycle
// ============================================================================

/// Drive one load run to completion: ramp up, hold, ramp down, drain, then
/// aggregate. Returns early (with partial results) when `stop_rx` flips.
pub async fn execute_run(
    scenario: Arc<Scenario>,
    progress: Arc<RunProgress>,
    deps: RunDeps,
    mut stop_rx: watch::Receiver<bool>,
) -> LoadResult<LoadRunResult> {
    let selector = WeightedSelector::new(&scenario.endpoints)?;
    let profile = &scenario.user_profile;
    let started_at = Utc::now();
    let run_start = progress.started;

    let ctx = Arc::new(RunContext {
        run_start,
        executor: RequestExecutor::new(
            &scenario.target,
            scenario.variables.clone(),
            deps.transport.clone(),
            deps.request_timeout,
        ),
        endpoints: scenario.endpoints.clone(),
        selector,
        think_time: profile.think_time.clone(),
        results: Mutex::new(Vec::new()),
        in_flight: Semaphore::new(deps.max_in_flight.unwrap_or(profile.concurrency).max(1)),
        active_users: progress.active_users.clone(),
    });

    info!(
        "Load run {} started: scenario={}, users={}, planned={}ms",
        progress.run_id,
        scenario.id,
        profile.concurrency,
        progress.planned.as_millis()
    );

    let (sampler_done_tx, sampler_done_rx) = watch::channel(false);
    let sampler = spawn_timeline_sampler(
        ctx.clone(),
        progress.clone(),
        deps.events.clone(),
        stop_rx.clone(),
        sampler_done_rx,
    );

    // --- Ramp-up ---
    let mut retire_txs = Vec::with_capacity(profile.concurrency);
    let mut handles: Vec<JoinHandle<UserReport>> = Vec::with_capacity(profile.concurrency);
    for (idx, offset) in schedule(&profile.ramp_up, profile.concurrency).into_iter().enumerate() {
        if !wait_until(instant_after(run_start, offset), &mut stop_rx).await {
            break;
        }
        let (retire_tx, retire_rx) = watch::channel(false);
        let user = VirtualUser::new(idx + 1, ctx.clone(), stop_rx.clone(), retire_rx);
        handles.push(tokio::spawn(user.run()));
        retire_txs.push(retire_tx);
    }
    debug!("Run {}: {} users spawned", progress.run_id, handles.len());

    // --- Steady state ---
    let mut steady: Option<(u64, u64)> = None;
    if !*stop_rx.borrow() {
        progress.set_phase(RunPhase::Steady).await;
        let steady_start = Instant::now();
        let held = wait_until(
            instant_after(steady_start, Duration::from_millis(scenario.duration.total_ms)),
            &mut stop_rx,
        )
        .await;
        steady = Some((offset_ms(run_start, steady_start), offset_ms(run_start, Instant::now())));
        if !held {
            info!("Load run {} stopped during steady state", progress.run_id);
        }
    }

    // --- Ramp-down: retire in reverse spawn order ---
    if !*stop_rx.borrow() {
        progress.set_phase(RunPhase::RampDown).await;
        let down_start = Instant::now();
        let down = schedule(&profile.ramp_down, retire_txs.len());
        for (retire_tx, offset) in retire_txs.iter().rev().zip(down) {
            if !wait_until(instant_after(down_start, offset), &mut stop_rx).await {
                break;
            }
            let _ = retire_tx.send(true);
        }
    }

    // --- Drain ---
    progress.set_phase(RunPhase::Draining).await;
    let deadline = instant_after(
        run_start,
        progress.planned.saturating_add(Duration::from_secs(RUN_GRACE_PERIOD_SECS)),
    );
    let mut total_user_requests = 0u64;
    match tokio::time::timeout_at(deadline, join_all(handles.iter_mut())).await {
        Ok(reports) => {
            for report in reports {
                match report {
                    Ok(r) => total_user_requests += r.requests,
                    Err(e) => warn!("Virtual user task failed: {}", e),
                }
            }
        }
        Err(_) => {
            warn!(
                "Load run {} exceeded its deadline; aborting remaining users",
                progress.run_id
            );
            for handle in &handles {
                handle.abort();
            }
        }
    }
    drop(retire_txs);

    let _ = sampler_done_tx.send(true);
    let timeline = match sampler.await {
        Ok(points) => points,
        Err(e) => {
            warn!("Timeline sampler failed: {}", e);
            Vec::new()
        }
    };

    let elapsed = run_start.elapsed();
    let results = std::mem::take(&mut *ctx.results.lock().await);
    let outcome = if *stop_rx.borrow() {
        RunOutcome::Stopped
    } else {
        RunOutcome::Completed
    };

    info!(
        "Load run {} finished: outcome={:?}, requests={} (users reported {}), elapsed={}ms",
        progress.run_id,
        outcome,
        results.len(),
        total_user_requests,
        elapsed.as_millis()
    );

    let window = MeasurementWindow::new(
        steady,
        scenario.duration.warmup_ms,
        scenario.duration.cooldown_ms,
    );
    Ok(build_result(
        &scenario,
        progress.run_id.clone(),
        started_at,
        outcome,
        results,
        timeline,
        &window,
        elapsed,
    ))
}

fn schedule(ramp: &RampConfig, users: usize) -> Vec<Duration> {
    ramp_schedule(
        users,
        Duration::from_millis(ramp.duration_ms),
        ramp.strategy,
        ramp.steps,
    )
}

/// `base + offset`, capped at the longest run a scenario may plan.
fn instant_after(base: Instant, offset: Duration) -> Instant {
    let cap = Duration::from_millis(MAX_PLANNED_DURATION_MS)
        .saturating_add(Duration::from_secs(RUN_GRACE_PERIOD_SECS));
    base.checked_add(offset.min(cap)).unwrap_or(base)
}

fn offset_ms(run_start: Instant, at: Instant) -> u64 {
    at.duration_since(run_start).as_millis() as u64
}

/// Sleep until `deadline`. Returns false if the run was stopped first.
async fn wait_until(deadline: Instant, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow() {
        return false;
    }
    tokio::select! {
        _ = sleep_until(deadline) => true,
        _ = stop.wait_for(|v| *v) => false,
    }
}

fn spawn_timeline_sampler(
    ctx: Arc<RunContext>,
    progress: Arc<RunProgress>,
    events: Arc<EventBus>,
    mut stop_rx: watch::Receiver<bool>,
    mut done_rx: watch::Receiver<bool>,
) -> JoinHandle<Vec<TimelinePoint>> {
    tokio::spawn(async move {
        let period = Duration::from_millis(TIMELINE_INTERVAL_MS);
        let mut ticker = tokio::time::interval_at(ctx.run_start + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut points = Vec::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop_rx.wait_for(|v| *v) => break,
                _ = done_rx.wait_for(|v| *v) => break,
            }

            let now = offset_ms(ctx.run_start, Instant::now());
            let point = {
                let results = ctx.results.lock().await;
                metrics::timeline_point(
                    &results,
                    now,
                    period,
                    ctx.active_users.load(Ordering::SeqCst),
                )
            };
            debug!(
                "Run {} t={}ms users={} rps={:.1} p95={:.1}ms",
                progress.run_id,
                now,
                point.active_users,
                point.requests_per_second,
                point.p95_latency_ms
            );
            events
                .publish(LoadEvent::Timeline {
                    run_id: progress.run_id.clone(),
                    scenario_id: progress.scenario_id.clone(),
                    point: point.clone(),
                })
                .await;
            points.push(point);
        }
        points
    })
}

// ============================================================================
// Aggregation
// ============================================================================

/// Warmup and cooldown slices of the steady state, as offsets from run start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementWindow {
    pub warmup: Range<u64>,
    pub cooldown: Range<u64>,
}

impl MeasurementWindow {
    /// `steady` is the (start, end) offset of the steady state, or `None`
    /// when the run never reached it.
    pub fn new(steady: Option<(u64, u64)>, warmup_ms: u64, cooldown_ms: u64) -> Self {
        let Some((start, end)) = steady else {
            return Self {
                warmup: 0..0,
                cooldown: 0..0,
            };
        };
        let warmup_end = start.saturating_add(warmup_ms).min(end);
        let cooldown_start = end.saturating_sub(cooldown_ms).max(warmup_end);
        Self {
            warmup: start..warmup_end,
            cooldown: cooldown_start..end,
        }
    }

    pub fn is_measured(&self, offset_ms: u64) -> bool {
        !self.warmup.contains(&offset_ms) && !self.cooldown.contains(&offset_ms)
    }

    pub fn excluded_ms(&self) -> u64 {
        (self.warmup.end - self.warmup.start) + (self.cooldown.end - self.cooldown.start)
    }
}

#[allow(clippy::too_many_arguments)]
fn build_result(
    scenario: &Scenario,
    run_id: String,
    started_at: chrono::DateTime<Utc>,
    outcome: RunOutcome,
    results: Vec<RequestResult>,
    timeline: Vec<TimelinePoint>,
    window: &MeasurementWindow,
    elapsed: Duration,
) -> LoadRunResult {
    let measured: Vec<&RequestResult> = results
        .iter()
        .filter(|r| window.is_measured(r.offset_ms))
        .collect();
    let measured_span =
        Duration::from_millis((elapsed.as_millis() as u64).saturating_sub(window.excluded_ms()));

    let metrics = metrics::compute_metrics(&measured, measured_span, &timeline);
    let thresholds = metrics::evaluate_thresholds(&scenario.thresholds, &metrics);
    let errors = metrics::error_summaries(&results);
    let recommendations = metrics::recommendations(&metrics, &errors, &thresholds);

    LoadRunResult {
        run_id,
        scenario_id: scenario.id.clone(),
        started_at,
        completed_at: Utc::now(),
        outcome,
        summary: metrics::summarize(&results, measured.len(), elapsed),
        endpoints: metrics::endpoint_breakdown(&measured),
        metrics,
        timeline,
        errors,
        thresholds,
        recommendations,
        alerts: Vec::new(),
    }
}

/// Synthetic result for validating a scenario without sending traffic.
pub fn dry_run_result(scenario: &Scenario, run_id: String) -> LoadRunResult {
    let now = Utc::now();
    let users = scenario.user_profile.concurrency;
    let metrics = Metrics {
        response_time: ResponseTimeStats {
            min: 10.0,
            max: 250.0,
            avg: 60.0,
            std: 25.0,
            p50: 50.0,
            p90: 100.0,
            p95: 120.0,
            p99: 200.0,
        },
        throughput: ThroughputStats {
            requests_per_second: users as f64 * 10.0,
            bytes_per_second: users as f64 * 10.0 * 1024.0,
            total_bytes: 0,
        },
        error_rate: 0.0,
        concurrency: ConcurrencyStats {
            max_users: users,
            avg_users: users as f64,
        },
    };
    let thresholds = metrics::evaluate_thresholds(&scenario.thresholds, &metrics);

    LoadRunResult {
        run_id,
        scenario_id: scenario.id.clone(),
        started_at: now,
        completed_at: now,
        outcome: RunOutcome::DryRun,
        summary: RunSummary::default(),
        metrics,
        endpoints: Vec::new(),
        timeline: Vec::new(),
        errors: Vec::new(),
        thresholds,
        recommendations: vec![format!(
            "Dry run: scenario '{}' is valid; no traffic was sent",
            scenario.name
        )],
        alerts: Vec::new(),
    }
}
