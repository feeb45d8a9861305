//! WebSocket client for the signaling relay
//!
//! Maintains the WebSocket connection to the room relay:
//! - split socket, queue-fed write task, parsing read task
//! - broadcast fan-out of relay messages
//! - connected flag and clean disconnect

use super::messages::{ClientMessage, ServerMessage};
use super::transport::{SignalingChannel, SignalingError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

const OUTBOUND_QUEUE: usize = 100;
const BROADCAST_CAPACITY: usize = 100;

// ============================================================================
// CLIENT
// ============================================================================

/// WebSocket-backed signaling channel.
pub struct WebSocketSignaling {
    connected: Arc<RwLock<bool>>,
    tx: Mutex<Option<mpsc::Sender<String>>>,
    event_tx: broadcast::Sender<ServerMessage>,
}

impl WebSocketSignaling {
    /// Connects to the relay and starts the read/write tasks.
    pub async fn connect(url: &str) -> Result<Self, SignalingError> {
        let url = Url::parse(url).map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        tracing::info!("Connecting to signaling relay: {}", url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
        let (event_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

        let connected = Arc::new(RwLock::new(true));

        let client = Self {
            connected: Arc::clone(&connected),
            tx: Mutex::new(Some(tx)),
            event_tx: event_tx.clone(),
        };

        // Write task: drain the outbound queue; a dropped sender closes
        // the socket.
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(Message::Text(msg)).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
            let _ = write.send(Message::Close(None)).await;
        });

        // Read task: parse relay messages and broadcast them.
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => {
                            let _ = event_tx.send(msg);
                        }
                        Err(e) => {
                            tracing::warn!("Dropping unparseable relay message: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by relay");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            *connected.write() = false;
        });

        Ok(client)
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.read()
    }

    /// Drops the outbound queue, which closes the socket.
    pub fn disconnect(&self) {
        *self.connected.write() = false;
        self.tx.lock().take();
        tracing::info!("Disconnected from signaling relay");
    }
}

#[async_trait]
impl SignalingChannel for WebSocketSignaling {
    async fn send(&self, msg: ClientMessage) -> Result<(), SignalingError> {
        let tx = self
            .tx
            .lock()
            .clone()
            .ok_or(SignalingError::NotConnected)?;

        let json =
            serde_json::to_string(&msg).map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        tx.send(json)
            .await
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.event_tx.subscribe()
    }
}
