use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::events::EventEnvelope;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub scenario: Option<String>,
}

fn default_limit() -> usize {
    100
}

#[derive(Deserialize)]
pub struct StreamQuery {
    pub scenario: Option<String>,
}

pub fn matches_scenario(envelope: &EventEnvelope, scenario: Option<&str>) -> bool {
    scenario.is_none_or(|id| envelope.event.scenario_id() == id)
}

/// GET /events/history: most recent events first.
pub async fn event_history(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> Json<serde_json::Value> {
    let entries: Vec<EventEnvelope> = state
        .events
        .history()
        .await
        .into_iter()
        .filter(|e| matches_scenario(e, query.scenario.as_deref()))
        .collect();
    let total = entries.len();
    let entries: Vec<_> = entries.into_iter().rev().take(query.limit).collect();

    Json(serde_json::json!({
        "events": entries,
        "total": total,
        "limit": query.limit,
    }))
}

/// GET /events/stream: SSE stream of run progress, completions and alerts.
pub async fn event_stream(
    State(state): State<SharedState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let scenario = query.scenario;

    let event_stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(envelope) if matches_scenario(&envelope, scenario.as_deref()) => {
            let name = event_name(&envelope);
            let data = serde_json::to_string(&envelope).unwrap_or_default();
            Some(Ok(Event::default().event(name).data(data)))
        }
        // Filtered out, or lagged
        _ => None,
    });

    Sse::new(event_stream).keep_alive(KeepAlive::default())
}

fn event_name(envelope: &EventEnvelope) -> &'static str {
    use crate::events::LoadEvent;
    match envelope.event {
        LoadEvent::RunStarted { .. } => "run_started",
        LoadEvent::Timeline { .. } => "timeline",
        LoadEvent::RunCompleted { .. } => "run_completed",
        LoadEvent::RunFailed { .. } => "run_failed",
        LoadEvent::BaselineUpdated { .. } => "baseline_updated",
        LoadEvent::Alert { .. } => "alert",
    }
}
