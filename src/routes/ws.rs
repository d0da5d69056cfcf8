use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::routes::events::{matches_scenario, StreamQuery};
use crate::state::SharedState;

/// GET /events/ws: live load events over a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

async fn handle_socket(mut socket: WebSocket, state: SharedState, query: StreamQuery) {
    // Initial snapshot of what is running right now
    let snapshot = serde_json::json!({
        "type": "snapshot",
        "activeRuns": state.service.active_runs().await,
    });
    if socket.send(Message::Text(snapshot.to_string().into())).await.is_err() {
        return;
    }

    let mut rx = state.events.subscribe();
    let mut shutdown_rx = state.shutdown_tx.subscribe();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                let _ = socket.send(Message::Text(r#"{"type":"shutdown"}"#.into())).await;
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            result = rx.recv() => {
                match result {
                    Ok(envelope) => {
                        if !matches_scenario(&envelope, query.scenario.as_deref()) {
                            continue;
                        }
                        if let Ok(json) = serde_json::to_string(&envelope) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("WebSocket client lagged, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    debug!("WebSocket client disconnected");
}
