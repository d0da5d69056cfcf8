use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{error, info};

use crate::error::LoadError;
use crate::load::{LoadRunResult, RunOptions, RunStatus};
use crate::state::SharedState;
use crate::store::{RunRecord, TimeRange};

#[derive(Deserialize)]
pub struct RunsQuery {
    pub scenario: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// POST /scenarios/{id}/run: run to completion and return the result.
pub async fn run_load_test(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Option<Json<RunOptions>>,
) -> Result<Json<LoadRunResult>, LoadError> {
    let options = body.map(|Json(o)| o).unwrap_or_default();
    Ok(Json(state.service.run_load_test(&id, options).await?))
}

/// POST /scenarios/{id}/start: start a run in the background.
pub async fn start_load_test(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Option<Json<RunOptions>>,
) -> Result<impl IntoResponse, LoadError> {
    let options = body.map(|Json(o)| o).unwrap_or_default();
    let handle = state.service.start_load_test(&id, options).await?;
    let run_id = handle.run_id.clone();

    tokio::spawn(async move {
        let run_id = handle.run_id.clone();
        match handle.wait().await {
            Ok(result) => info!(
                "Background run {} finished: {:?}, {} requests",
                run_id, result.outcome, result.summary.total_requests
            ),
            Err(e) => error!("Background run {} failed: {}", run_id, e),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "started",
            "runId": run_id,
            "scenarioId": id,
        })),
    ))
}

/// POST /scenarios/{id}/stop: stop the active run and wait for it to wind down.
pub async fn stop_test(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, LoadError> {
    state.service.stop_test(&id).await?;
    Ok(Json(serde_json::json!({
        "status": "stopped",
        "scenarioId": id,
    })))
}

/// GET /scenarios/{id}/status
pub async fn scenario_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Json<RunStatus> {
    Json(state.service.get_status(Some(&id)).await)
}

/// GET /status: every active run.
pub async fn active_runs(State(state): State<SharedState>) -> Json<Vec<RunStatus>> {
    Json(state.service.active_runs().await)
}

/// GET /runs
pub async fn list_runs(
    State(state): State<SharedState>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<RunRecord>>, LoadError> {
    let range = TimeRange {
        from: query.from,
        to: query.to,
    };
    Ok(Json(state.service.list_runs(
        query.scenario.as_deref(),
        &range,
        query.limit,
    )?))
}

/// GET /runs/{id}
pub async fn get_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<LoadRunResult>, LoadError> {
    Ok(Json(state.service.get_run(&id)?))
}
