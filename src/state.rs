use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::events::EventBus;
use crate::service::LoadTestService;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: AppConfig,
    pub service: Arc<LoadTestService>,
    pub events: Arc<EventBus>,
    pub started_at: DateTime<Utc>,
    /// Fired once on shutdown so long-lived WebSocket clients can close cleanly.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(config: AppConfig, service: Arc<LoadTestService>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            events: service.events(),
            service,
            started_at: Utc::now(),
            shutdown_tx,
        }
    }

    pub fn notify_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
