use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::config::{EVENT_BUFFER_SIZE, EVENT_CHANNEL_CAPACITY};
use crate::load::{RunOutcome, TimelinePoint};
use crate::regression::RegressionAlert;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LoadEvent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum LoadEvent {
    RunStarted {
        run_id: String,
        scenario_id: String,
        concurrency: usize,
    },
    Timeline {
        run_id: String,
        scenario_id: String,
        point: TimelinePoint,
    },
    RunCompleted {
        run_id: String,
        scenario_id: String,
        outcome: RunOutcome,
        total_requests: u64,
        thresholds_passed: bool,
    },
    RunFailed {
        run_id: String,
        scenario_id: String,
        error: String,
    },
    BaselineUpdated {
        scenario_id: String,
        environment: String,
        run_id: String,
    },
    Alert {
        alert: RegressionAlert,
    },
}

impl LoadEvent {
    pub fn scenario_id(&self) -> &str {
        match self {
            LoadEvent::RunStarted { scenario_id, .. }
            | LoadEvent::Timeline { scenario_id, .. }
            | LoadEvent::RunCompleted { scenario_id, .. }
            | LoadEvent::RunFailed { scenario_id, .. }
            | LoadEvent::BaselineUpdated { scenario_id, .. } => scenario_id,
            LoadEvent::Alert { alert } => &alert.scenario_id,
        }
    }
}

/// Broadcast bus with a bounded replay buffer for late subscribers.
pub struct EventBus {
    buffer: Arc<RwLock<VecDeque<EventEnvelope>>>,
    sender: broadcast::Sender<EventEnvelope>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(EVENT_BUFFER_SIZE))),
            sender,
        }
    }

    pub async fn publish(&self, event: LoadEvent) {
        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };

        let mut buf = self.buffer.write().await;
        if buf.len() >= EVENT_BUFFER_SIZE {
            buf.pop_front();
        }
        buf.push_back(envelope.clone());
        drop(buf);

        // No subscribers is fine.
        let _ = self.sender.send(envelope);
    }

    pub async fn history(&self) -> Vec<EventEnvelope> {
        self.buffer.read().await.iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }
}
