//! Signaling channel contract
//!
//! A thin event bus to the relay: fire-and-forget send, broadcast
//! receive. The relay guarantees FIFO per event name; loss or
//! reordering across different event names must be tolerated by the
//! session protocol. No retries happen at this layer.

use super::messages::{ClientMessage, ServerMessage};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to signaling relay")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),
}

/// Event bus to the relay. Dropping the subscribed receiver is the
/// unsubscribe.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, msg: ClientMessage) -> Result<(), SignalingError>;

    fn subscribe(&self) -> broadcast::Receiver<ServerMessage>;
}

// ============================================================================
// TEST TRANSPORT
// ============================================================================
