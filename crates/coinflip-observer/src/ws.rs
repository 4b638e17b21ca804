//! `WebSocket` handler for the live event stream.
//!
//! Clients connect to `GET /ws` and receive every [`PublishedEvent`] as a
//! JSON text frame of the form `{"event": <channel>, "data": <payload>}`.
//! A greeting `status` frame is sent on connect. The handler uses a
//! [`broadcast::Receiver`] so all connected clients see the same stream.
//!
//! If a client falls behind, lagged messages are skipped and the client
//! resumes from the oldest event still buffered.
//!
//! [`PublishedEvent`]: coinflip_types::PublishedEvent

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::state::AppState;

/// Upgrade an HTTP request to a `WebSocket` connection and begin
/// streaming published events.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_events(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// First frame sent to every client.
fn greeting() -> String {
    serde_json::json!({
        "event": "status",
        "data": { "message": "Connected to simulation server" },
    })
    .to_string()
}

/// Handle the `WebSocket` lifecycle: subscribe to the event stream and
/// forward each event as a text frame.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    debug!("WebSocket client connected");

    // Subscribe before greeting so nothing published in between is lost.
    let mut rx = state.subscribe();

    if socket.send(Message::Text(greeting().into())).await.is_err() {
        debug!("WebSocket client disconnected (greeting failed)");
        return;
    }

    loop {
        tokio::select! {
            // Receive an event from the engine.
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!(channel = event.channel(), "Failed to serialize event: {e}");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            debug!("WebSocket client disconnected (send failed)");
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "WebSocket client lagged, skipping ahead");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event channel closed, shutting down WebSocket");
                        return;
                    }
                }
            }
            // Check if the client sent a close frame or disconnected.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("WebSocket client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        return;
                    }
                    _ => {
                        // Clients have nothing to say; ignore text and binary.
                    }
                }
            }
        }
    }
}
