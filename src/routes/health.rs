use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::load::RunStatus;
use crate::state::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub uptime_secs: i64,
    pub persist: bool,
    pub active_runs: Vec<RunStatus>,
}

/// Overall status string. "busy" while any run is generating load.
pub fn determine_overall_status(active_runs: usize) -> &'static str {
    if active_runs > 0 {
        "busy"
    } else {
        "idle"
    }
}

pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(build_health_response(&state).await)
}

pub async fn build_health_response(state: &SharedState) -> HealthResponse {
    let active_runs = state.service.active_runs().await;
    HealthResponse {
        status: determine_overall_status(active_runs.len()).to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.service.environment().to_string(),
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
        persist: state.config.persist,
        active_runs,
    }
}
