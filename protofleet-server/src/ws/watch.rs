use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use protofleet_core::protocol::{ClientMessage, ServerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_watch_socket(socket, state))
}

async fn handle_watch_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let id = state.registry.register(tx);
    tracing::info!(subscriber = %id, "Watch stream opened");

    // Forward batches to the agent
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("Failed to encode batch: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Control messages are handled one at a time, so a pull pass completes
    // before the next control replaces the manifest.
    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Ping(_) => continue,
            Message::Pong(_) => continue,
            Message::Close(_) => break,
            _ => continue,
        };

        let control = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Control(control)) => control,
            Err(e) => {
                tracing::warn!(subscriber = %id, "Ignoring malformed watch message: {}", e);
                continue;
            }
        };

        if let Err(e) = state.registry.submit(&id, control).await {
            tracing::warn!(subscriber = %id, "Pull pass rejected: {}", e);
            break;
        }
    }

    state.registry.unregister(&id);
    tracing::info!(subscriber = %id, "Watch stream closed");
    send_task.abort();
}
