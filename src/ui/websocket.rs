//! Update stream for UI collaborators
//!
//! `/ws` pushes every `SessionUpdate` as JSON, starting with the current
//! state. Clients may send `{"text": "..."}` to speak a text turn.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use crate::protocol::SessionUpdate;
use crate::ui::server::AppState;

/// Client-to-server message
#[derive(Debug, Deserialize)]
struct ClientMessage {
    text: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.session.subscribe();

    tracing::info!("UI client connected");

    let initial = SessionUpdate::State(state.session.snapshot());
    if let Ok(json) = serde_json::to_string(&initial) {
        if sender.send(Message::Text(json)).await.is_err() {
            return;
        }
    }

    let mut heartbeat = tokio::time::interval(Duration::from_secs(30));

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(request) => {
                        if let Err(e) = state.session.send_text(request.text).await {
                            tracing::warn!("UI text rejected: {}", e);
                        }
                    }
                    Err(e) => tracing::debug!("Ignoring UI message: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::warn!("UI socket receive error: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            },

            update = updates.recv() => match update {
                Ok(update) => {
                    let json = match serde_json::to_string(&update) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!("Failed to serialize update: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("UI client lagged by {} updates", n);
                    let resync = SessionUpdate::State(state.session.snapshot());
                    if let Ok(json) = serde_json::to_string(&resync) {
                        let _ = sender.send(Message::Text(json)).await;
                    }
                }
                Err(RecvError::Closed) => break,
            },

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!("UI client disconnected");
}
