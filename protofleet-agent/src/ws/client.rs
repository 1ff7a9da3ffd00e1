//! WebSocket watch stream to the schema server.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use protofleet_core::protocol::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{WatchConnector, WatchStream};
use crate::utils::errors::{AgentError, Result};

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// `url` is the full watch endpoint, e.g. `ws://host:50052/ws/watch`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl WatchConnector for WsConnector {
    async fn open(&self) -> Result<WatchStream> {
        info!("Connecting to watch stream: {}", self.url);
        let (ws_stream, _) = connect_async(&self.url)
            .await
            .map_err(|e| AgentError::Network(format!("{}: {}", self.url, e)))?;
        let (mut write, mut read) = ws_stream.split();
        info!("Connected to watch stream");

        let (outbound, mut controls) = mpsc::unbounded_channel();
        let (batches, inbound) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }

                    // Forward controls to the server
                    control = controls.recv() => {
                        let Some(control) = control else { break };
                        let json = match serde_json::to_string(&ClientMessage::Control(control)) {
                            Ok(json) => json,
                            Err(e) => {
                                error!("Failed to encode control: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(json.into())).await {
                            let _ = batches.send(Err(AgentError::Network(e.to_string())));
                            break;
                        }
                    }

                    // Handle incoming messages from server
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerMessage>(&text) {
                                    Ok(ServerMessage::Batch(batch)) => {
                                        debug!(entries = batch.entries.len(), "Received batch");
                                        if batches.send(Ok(batch)).is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => warn!("Ignoring malformed server message: {}", e),
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if write.send(Message::Pong(data)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                info!("Server closed watch stream");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("Watch stream read error: {}", e);
                                let _ = batches.send(Err(AgentError::Network(e.to_string())));
                                break;
                            }
                        }
                    }
                }
            }
            token.cancel();
        });

        Ok(WatchStream {
            outbound,
            inbound,
            shutdown,
        })
    }
}
