use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::LoadError;
use crate::scenario::Scenario;
use crate::state::SharedState;

/// POST /scenarios: register (or replace) a scenario.
pub async fn register_scenario(
    State(state): State<SharedState>,
    Json(scenario): Json<Scenario>,
) -> Result<impl IntoResponse, LoadError> {
    let id = state.service.register_scenario(scenario).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": id })),
    ))
}

/// GET /scenarios
pub async fn list_scenarios(State(state): State<SharedState>) -> Json<Vec<Scenario>> {
    Json(state.service.list_scenarios().await)
}

/// GET /scenarios/{id}
pub async fn get_scenario(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Scenario>, LoadError> {
    Ok(Json(state.service.get_scenario(&id).await?))
}
