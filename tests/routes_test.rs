mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use common::{short_scenario, test_state, MockTransport};
use loadwarden::server::build_router;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

// --- Health ---

#[tokio::test]
async fn test_health_reports_idle() {
    let app = build_router(test_state(MockTransport::new(10)));
    let response = app.oneshot(empty_request("GET", "/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "idle");
    assert_eq!(body["environment"], "test");
    assert_eq!(body["active_runs"].as_array().unwrap().len(), 0);
}

// --- Scenarios ---

#[tokio::test]
async fn test_register_and_fetch_scenario() {
    let state = test_state(MockTransport::new(10));
    let scenario = serde_json::to_value(short_scenario("checkout")).unwrap();

    let response = build_router(state.clone())
        .oneshot(json_request("POST", "/scenarios", scenario))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["id"], "checkout");

    let response = build_router(state.clone())
        .oneshot(empty_request("GET", "/scenarios/checkout"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["userProfile"]["concurrency"], 2);

    let response = build_router(state)
        .oneshot(empty_request("GET", "/scenarios"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_scenario_is_bad_request() {
    let app = build_router(test_state(MockTransport::new(10)));
    let mut scenario = serde_json::to_value(short_scenario("checkout")).unwrap();
    scenario["target"] = serde_json::json!("ftp://example.com");

    let response = app
        .oneshot(json_request("POST", "/scenarios", scenario))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("scheme"));
}

#[tokio::test]
async fn test_unbounded_duration_is_bad_request() {
    let app = build_router(test_state(MockTransport::new(10)));
    let mut scenario = serde_json::to_value(short_scenario("soak")).unwrap();
    scenario["duration"]["totalMs"] = serde_json::json!(u64::MAX);

    let response = app
        .oneshot(json_request("POST", "/scenarios", scenario))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_scenario_is_not_found() {
    let app = build_router(test_state(MockTransport::new(10)));
    let response = app
        .oneshot(empty_request("GET", "/scenarios/nope"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// --- Runs ---

#[tokio::test]
async fn test_dry_run_over_http() {
    let transport = MockTransport::new(10);
    let state = test_state(transport.clone());
    state
        .service
        .register_scenario(short_scenario("checkout"))
        .await
        .unwrap();

    let response = build_router(state.clone())
        .oneshot(json_request(
            "POST",
            "/scenarios/checkout/run",
            serde_json::json!({ "dryRun": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["outcome"], "dryrun");
    assert_eq!(transport.calls(), 0);

    let run_id = body["runId"].as_str().unwrap().to_string();
    let response = build_router(state)
        .oneshot(empty_request("GET", &format!("/runs/{}", run_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_stop_without_run_is_not_found() {
    let state = test_state(MockTransport::new(10));
    state
        .service
        .register_scenario(short_scenario("checkout"))
        .await
        .unwrap();

    let response = build_router(state)
        .oneshot(empty_request("POST", "/scenarios/checkout/stop"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_start_then_conflict() {
    let state = test_state(MockTransport::new(10));
    state
        .service
        .register_scenario(short_scenario("checkout"))
        .await
        .unwrap();

    let response = build_router(state.clone())
        .oneshot(empty_request("POST", "/scenarios/checkout/start"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = build_router(state.clone())
        .oneshot(empty_request("POST", "/scenarios/checkout/start"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = build_router(state.clone())
        .oneshot(empty_request("GET", "/scenarios/checkout/status"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["isRunning"], true);

    let response = build_router(state)
        .oneshot(empty_request("POST", "/scenarios/checkout/stop"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_run_is_not_found() {
    let app = build_router(test_state(MockTransport::new(10)));
    let response = app
        .oneshot(empty_request("GET", "/runs/does-not-exist"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// --- Regression ---

#[tokio::test]
async fn test_threshold_update_validated() {
    let state = test_state(MockTransport::new(10));

    let response = build_router(state.clone())
        .oneshot(json_request(
            "PUT",
            "/thresholds/responseTime.p95",
            serde_json::json!({ "warningPct": 10, "criticalPct": 30 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let p95 = body
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["metric"] == "responseTime.p95")
        .unwrap();
    assert_eq!(p95["warningPct"], 10.0);

    let response = build_router(state.clone())
        .oneshot(json_request(
            "PUT",
            "/thresholds/cpu",
            serde_json::json!({ "warningPct": 10, "criticalPct": 30 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_baseline_from_dry_run_rejected() {
    let state = test_state(MockTransport::new(10));
    state
        .service
        .register_scenario(short_scenario("checkout"))
        .await
        .unwrap();
    let dry = state
        .service
        .run_load_test(
            "checkout",
            loadwarden::load::RunOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let response = build_router(state)
        .oneshot(json_request(
            "POST",
            "/scenarios/checkout/baseline",
            serde_json::json!({ "runId": dry.run_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_report_for_empty_history() {
    let state = test_state(MockTransport::new(10));
    state
        .service
        .register_scenario(short_scenario("checkout"))
        .await
        .unwrap();

    let response = build_router(state)
        .oneshot(empty_request("GET", "/scenarios/checkout/report"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["summary"]["runsAnalyzed"], 0);
}

// --- Events ---

#[tokio::test]
async fn test_event_history_empty_at_start() {
    let app = build_router(test_state(MockTransport::new(10)));
    let response = app
        .oneshot(empty_request("GET", "/events/history"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["total"], 0);
}
