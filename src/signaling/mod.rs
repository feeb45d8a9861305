//! Signaling Module - event bus to the room relay
//!
//! This module carries negotiation traffic between room members:
//! - wire message types the relay forwards verbatim
//! - the `SignalingChannel` contract (fire-and-forget send, broadcast
//!   receive)
//! - the WebSocket client implementation

mod client;
mod messages;
mod transport;

#[cfg(test)]
pub(crate) use transport::testutil;

pub use client::WebSocketSignaling;
pub use messages::{ClientMessage, ServerMessage};
pub use transport::{SignalingChannel, SignalingError};
