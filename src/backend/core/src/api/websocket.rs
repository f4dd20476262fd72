//! WebSocket stream of job status events.
//!
//! `/ws/job-status` forwards every [`JobEvent`](crate::events::JobEvent)
//! published on the broadcast sink as one JSON text message. Slow clients
//! lag and drop events; they never backpressure the dispatcher.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use super::AppState;

/// Handle WebSocket upgrade.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.context.events.subscribe();

    let ack = serde_json::json!({
        "type": "connected",
        "message": "Streaming job status events"
    });
    if sender.send(Message::Text(ack.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(error = %e, "Could not serialize job event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "WebSocket client lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "WebSocket receive error");
                    break;
                }
                _ => {}
            },
        }
    }

    tracing::debug!("WebSocket connection closed");
}
