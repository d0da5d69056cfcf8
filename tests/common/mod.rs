#![allow(dead_code)]

use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use loadwarden::config::AppConfig;
use loadwarden::load::executor::{OutboundRequest, Transport, TransportError, TransportResponse};
use loadwarden::notify::Notifier;
use loadwarden::regression::RegressionAlert;
use loadwarden::scenario::Scenario;
use loadwarden::service::{LoadTestService, ServiceOptions};
use loadwarden::state::{AppState, SharedState};
use loadwarden::store::PerfDb;

/// Answers every request with 200 after a configurable delay. Paths ending
/// in `/fail` get a connection error instead.
pub struct MockTransport {
    latency_ms: AtomicU64,
    calls: AtomicUsize,
}

impl MockTransport {
    pub fn new(latency_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            latency_ms: AtomicU64::new(latency_ms),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_latency(&self, latency_ms: u64) {
        self.latency_ms.store(latency_ms, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn send(
        &self,
        request: OutboundRequest,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = Duration::from_millis(self.latency_ms.load(Ordering::SeqCst));
        Box::pin(async move {
            tokio::time::sleep(latency).await;
            if request.url.ends_with("/fail") {
                return Err(TransportError("connection refused".to_string()));
            }
            Ok(TransportResponse {
                status: 200,
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body: r#"{"ok":true}"#.to_string(),
            })
        })
    }
}

/// Keeps every alert and message it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<(RegressionAlert, String)>>,
}

impl RecordingNotifier {
    pub fn received(&self) -> Vec<(RegressionAlert, String)> {
        self.received.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify<'a>(&'a self, alert: &'a RegressionAlert, message: &'a str) -> BoxFuture<'a, ()> {
        self.received
            .lock()
            .unwrap()
            .push((alert.clone(), message.to_string()));
        Box::pin(async {})
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        port: 9890,
        data_dir: PathBuf::from("/tmp/loadwarden-test"),
        scenario_dir: None,
        environment: "test".to_string(),
        max_in_flight: None,
        request_timeout_ms: 5_000,
        log_dir: None,
        persist: false,
    }
}

pub fn test_service(transport: Arc<MockTransport>) -> Arc<LoadTestService> {
    let db = Arc::new(PerfDb::open_in_memory().unwrap());
    Arc::new(LoadTestService::new(
        db,
        transport,
        ServiceOptions::from(&test_config()),
    ))
}

pub fn test_service_with_notifier(
    transport: Arc<MockTransport>,
    notifier: Arc<RecordingNotifier>,
) -> Arc<LoadTestService> {
    let db = Arc::new(PerfDb::open_in_memory().unwrap());
    Arc::new(
        LoadTestService::new(db, transport, ServiceOptions::from(&test_config()))
            .with_notifier(notifier),
    )
}

pub fn test_state(transport: Arc<MockTransport>) -> SharedState {
    Arc::new(AppState::new(test_config(), test_service(transport)))
}

/// Two users, one-second linear ramp, three seconds of steady load.
pub fn short_scenario(id: &str) -> Scenario {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "name": format!("{id} scenario"),
        "target": "http://localhost:8000",
        "endpoints": [
            {"path": "/api/items", "weight": 3},
            {"path": "/api/cart", "method": "POST", "weight": 1, "body": "{\"id\": 1}"}
        ],
        "userProfile": {
            "concurrency": 2,
            "rampUp": {"durationMs": 1000, "strategy": "linear"},
            "thinkTime": {"minMs": 200, "maxMs": 200}
        },
        "duration": {"totalMs": 3000},
        "thresholds": {
            "responseTime": {"p95": 500},
            "errorRate": {"max": 1}
        }
    }))
    .unwrap()
}
