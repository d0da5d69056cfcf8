use axum::routing::{get, post, put};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes::{events, health, regression, runs, scenarios, ws};
use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health::health))
        // Scenarios
        .route(
            "/scenarios",
            get(scenarios::list_scenarios).post(scenarios::register_scenario),
        )
        .route("/scenarios/{id}", get(scenarios::get_scenario))
        // Run lifecycle
        .route("/scenarios/{id}/run", post(runs::run_load_test))
        .route("/scenarios/{id}/start", post(runs::start_load_test))
        .route("/scenarios/{id}/stop", post(runs::stop_test))
        .route("/scenarios/{id}/status", get(runs::scenario_status))
        .route("/status", get(runs::active_runs))
        .route("/runs", get(runs::list_runs))
        .route("/runs/{id}", get(runs::get_run))
        // Regression detection
        .route("/baselines", get(regression::list_baselines))
        .route("/scenarios/{id}/baseline", post(regression::set_baseline))
        .route("/scenarios/{id}/report", get(regression::regression_report))
        .route("/runs/{id}/analyze", post(regression::analyze_run))
        .route("/thresholds", get(regression::list_thresholds))
        .route("/thresholds/{metric}", put(regression::set_threshold))
        .route("/scorer/retrain", post(regression::retrain_scorer))
        // Events
        .route("/events/history", get(events::event_history))
        .route("/events/stream", get(events::event_stream))
        .route("/events/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .layer(cors)
        .with_state(state)
}
