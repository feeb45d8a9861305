//! Room Mesh - client-side WebRTC room sessions
//!
//! Full-mesh peer sessions for small rooms:
//! - WebSocket signaling relay client
//! - per-peer offer/answer negotiation with trickle ICE
//! - local capture tracks with enable gates and device hot-swap
//! - optional auxiliary data channel and remote audio level metering

pub mod config;
pub mod engine;
pub mod media;
pub mod session;
pub mod signaling;

pub use config::{IceServerConfig, SessionConfig};
pub use engine::{IceCandidate, SessionDescription, TrackKind, WebRtcEngine};
pub use media::{LocalMediaController, MediaConstraints, TrackChange};
pub use session::{PeerState, RemoteStream, SessionError, SessionEvent, SessionManager};
pub use signaling::{SignalingChannel, WebSocketSignaling};

/// Initializes console logging. Noisy engine internals stay at warn
/// unless `RUST_LOG` overrides them.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("roommesh=debug".parse().expect("static directive"))
                .add_directive("webrtc=warn".parse().expect("static directive")),
        )
        .init();
}
