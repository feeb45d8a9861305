//! RTC Engine Seam
//!
//! The underlying real-time engine is treated as an opaque capability:
//! create a connection, add or replace outbound tracks, open a data
//! channel, produce/consume session descriptions and ICE candidates,
//! surface inbound track and data events. Everything above this module
//! works against the traits defined here; `webrtc.rs` provides the
//! production implementation.

mod webrtc;

#[cfg(test)]
pub(crate) mod mock;

pub use webrtc::WebRtcEngine;

use crate::media::LocalTrack;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine setup failed: {0}")]
    Setup(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("track operation failed: {0}")]
    Track(String),

    #[error("data channel failure: {0}")]
    DataChannel(String),

    #[error("connection is closed")]
    Closed,
}

// ============================================================================
// WIRE-SHAPED TYPES
// ============================================================================

/// Direction of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => write!(f, "offer"),
            SdpKind::Answer => write!(f, "answer"),
        }
    }
}

/// Opaque negotiated-media-capabilities blob, exchanged during
/// offer/answer. Serializes to the `{"type": ..., "sdp": ...}` shape the
/// relay forwards verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

/// Opaque network-reachability descriptor, exchanged trickle style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

/// Media track kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

// ============================================================================
// CONNECTION EVENTS
// ============================================================================

/// Events a connection emits into the channel bound at creation.
///
/// Handlers are fixed at construction time; there are no externally
/// mutable callback fields.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A local ICE candidate was discovered and should be relayed.
    LocalCandidate(IceCandidate),

    /// An inbound media track arrived.
    RemoteTrack {
        kind: TrackKind,
        track_id: String,
        stream_id: String,
    },

    /// A data channel (local or adopted inbound) reported open.
    DataChannelOpen,

    /// A data channel message arrived.
    DataReceived(String),

    /// Estimated remote audio level, 0.0..=1.0.
    AudioLevel(f32),

    /// The underlying transport ended.
    Closed,
}

/// Capability flags for one connection, fixed at creation.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    /// Label of the outbound data channel to open, if any.
    pub data_channel_label: Option<String>,

    /// Meter inbound audio and emit `AudioLevel` events.
    pub audio_levels: bool,
}

// ============================================================================
// ENGINE TRAITS
// ============================================================================

/// Factory for peer connections.
#[async_trait]
pub trait RtcEngine: Send + Sync {
    async fn create_connection(
        &self,
        opts: ConnectionOptions,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Arc<dyn PeerConnector>, EngineError>;
}

/// One negotiated-transport handle. Owned exclusively by a single peer
/// session and never reused after `close`.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;

    /// Adds an outbound sender for the track and returns its handle.
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<Arc<dyn TrackSender>, EngineError>;

    /// The locally created data channel, if one was requested.
    fn data_channel(&self) -> Option<Arc<dyn DataChannel>>;

    /// Idempotent.
    async fn close(&self) -> Result<(), EngineError>;
}

/// Outbound sender handle; supports in-place track replacement without a
/// renegotiation cycle.
#[async_trait]
pub trait TrackSender: Send + Sync {
    fn kind(&self) -> TrackKind;

    async fn replace_track(&self, track: Arc<LocalTrack>) -> Result<(), EngineError>;
}

/// Auxiliary bidirectional channel multiplexed over the connection.
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn is_open(&self) -> bool;

    async fn send_text(&self, value: &str) -> Result<(), EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}
