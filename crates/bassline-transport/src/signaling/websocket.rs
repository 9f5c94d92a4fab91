//! WebSocket signaling backend
//!
//! JSON text frames over `tokio-tungstenite`. A reader and a writer task bridge
//! the socket to the channel pair handed to the signaling client.

use super::connector::{SignalingConnection, SignalingConnector};
use super::protocol::SignalMessage;
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// WebSocket rendezvous endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Server URL, e.g. `ws://127.0.0.1:8080`
    pub url: String,
    pub connect_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Connects to a rendezvous server over WebSocket
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    /// Connector for `url` with the default timeout
    pub fn with_url(url: impl Into<String>) -> Self {
        Self::new(WebSocketConfig {
            url: url.into(),
            ..WebSocketConfig::default()
        })
    }
}

#[async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn connect(&self) -> TransportResult<SignalingConnection> {
        let (stream, _response) = timeout(
            self.config.connect_timeout,
            connect_async(self.config.url.as_str()),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            operation: "websocket connect".to_string(),
            timeout_ms: self.config.connect_timeout.as_millis() as u64,
        })?
        .map_err(|e| TransportError::ConnectionFailed(format!("WebSocket connect failed: {e}")))?;
        info!(url = %self.config.url, "WebSocket signaling connected");

        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<SignalMessage>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode signaling frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!(error = %e, "WebSocket send failed");
                    break;
                }
            }
            let _ = sink.close().await;
            debug!("WebSocket writer stopped");
        });

        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let payload = match frame {
                    Ok(Message::Text(text)) => text.into_bytes(),
                    Ok(Message::Binary(bytes)) => bytes,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "WebSocket receive failed");
                        break;
                    }
                };
                match serde_json::from_slice::<SignalMessage>(&payload) {
                    Ok(message) => {
                        if inbound_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Dropping malformed signaling frame"),
                }
            }
            debug!("WebSocket reader stopped");
        });

        Ok(SignalingConnection { outbound, inbound })
    }

    fn backend(&self) -> &'static str {
        "websocket"
    }
}
