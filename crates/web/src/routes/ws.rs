//! WebSocket stream of analysis events
//!
//! Every connected client receives each [`AnalysisEvent`] as a JSON text
//! frame `{"event": ..., "data": ...}`. A client that falls behind the
//! broadcast channel has missed batches and possibly a `clear_output`, so
//! it is sent a `clear_output` of its own and resumes with the next depth.

use std::sync::Arc;

use analysis_bridge_core::AnalysisEvent;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, trace, warn};

use crate::AppState;

pub async fn ws_events(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// Serializes and sends one event. False once the client is gone.
async fn forward(socket: &mut WebSocket, event: &AnalysisEvent) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!(event = event.name(), error = %e, "Failed to serialize event");
            return true;
        }
    };
    trace!(event = event.name(), "-> client");
    socket.send(Message::Text(json)).await.is_ok()
}

/// Event to send for one broadcast receive; `None` once the bridge is gone.
fn next_frame(result: Result<AnalysisEvent, RecvError>) -> Option<AnalysisEvent> {
    match result {
        Ok(event) => Some(event),
        Err(RecvError::Lagged(skipped)) => {
            debug!(skipped, "WebSocket client lagged, resetting its view");
            Some(AnalysisEvent::Cleared)
        }
        Err(RecvError::Closed) => None,
    }
}

async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    debug!("WebSocket client connected");
    let mut rx = state.subscribe();

    loop {
        tokio::select! {
            result = rx.recv() => {
                let Some(event) = next_frame(result) else {
                    return;
                };
                if !forward(&mut socket, &event).await {
                    debug!("WebSocket client disconnected (send failed)");
                    return;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket error");
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}
