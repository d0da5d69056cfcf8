use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::error::LoadError;
use crate::regression::{
    BaselineMeta, DetectionMethod, RegressionAlert, RegressionBaseline, RegressionReport,
    RegressionThreshold, ReportPeriod,
};
use crate::state::SharedState;

const DEFAULT_REPORT_DAYS: i64 = 7;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineRequest {
    pub run_id: String,
    pub version: Option<String>,
    /// Defaults to the service's configured environment.
    pub environment: Option<String>,
    pub confidence: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdRequest {
    pub warning_pct: f64,
    pub critical_pct: f64,
    #[serde(default)]
    pub method: DetectionMethod,
    pub confidence: Option<f64>,
    pub min_sample_size: Option<usize>,
}

#[derive(Deserialize)]
pub struct ReportQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// GET /baselines
pub async fn list_baselines(
    State(state): State<SharedState>,
) -> Result<Json<Vec<RegressionBaseline>>, LoadError> {
    Ok(Json(state.service.get_baselines()?))
}

/// POST /scenarios/{id}/baseline: promote a stored run to the scenario's baseline.
pub async fn set_baseline(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<BaselineRequest>,
) -> Result<Json<RegressionBaseline>, LoadError> {
    let result = state.service.get_run(&body.run_id)?;
    let defaults = BaselineMeta::default();
    let meta = BaselineMeta {
        version: body.version.unwrap_or(defaults.version),
        environment: body
            .environment
            .unwrap_or_else(|| state.service.environment().to_string()),
        confidence: body.confidence.unwrap_or(defaults.confidence),
    };
    Ok(Json(state.service.set_baseline(&id, &result, meta).await?))
}

/// POST /runs/{id}/analyze: compare a stored run against its baseline.
pub async fn analyze_run(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Json<Vec<RegressionAlert>>, LoadError> {
    let result = state.service.get_run(&run_id)?;
    Ok(Json(
        state
            .service
            .analyze_regressions(&result.scenario_id, &result)
            .await?,
    ))
}

/// GET /thresholds
pub async fn list_thresholds(State(state): State<SharedState>) -> Json<Vec<RegressionThreshold>> {
    Json(state.service.thresholds().await)
}

/// PUT /thresholds/{metric}
pub async fn set_threshold(
    State(state): State<SharedState>,
    Path(metric): Path<String>,
    Json(body): Json<ThresholdRequest>,
) -> Result<impl IntoResponse, LoadError> {
    let mut threshold = RegressionThreshold::new(&metric, body.warning_pct, body.critical_pct);
    threshold.method = body.method;
    if let Some(c) = body.confidence {
        threshold.confidence = c;
    }
    if let Some(n) = body.min_sample_size {
        threshold.min_sample_size = n;
    }
    state.service.set_threshold(&metric, threshold).await?;
    Ok(Json(state.service.thresholds().await))
}

/// GET /scenarios/{id}/report: defaults to the last seven days.
pub async fn regression_report(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<RegressionReport>, LoadError> {
    let to = query.to.unwrap_or_else(Utc::now);
    let from = query
        .from
        .unwrap_or_else(|| to - Duration::days(DEFAULT_REPORT_DAYS));
    Ok(Json(
        state
            .service
            .generate_regression_report(&id, ReportPeriod { from, to })
            .await?,
    ))
}

/// POST /scorer/retrain
pub async fn retrain_scorer(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let trained = state.service.retrain_scorer().await;
    Json(serde_json::json!({ "trained": trained }))
}
