//! Session Module - room mesh orchestration
//!
//! The protocol core of the crate:
//! - `PeerSession`: one remote participant's connection lifecycle
//! - `SessionManager`: relay dispatch, mesh negotiation, media fan-out

mod manager;
mod peer;

pub use manager::{SessionError, SessionEvent, SessionManager};
pub use peer::{PeerSession, PeerState, RemoteStream, RemoteTrackInfo};
