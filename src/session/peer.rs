//! Peer session
//!
//! One remote participant's connection: the negotiated-transport
//! handle, outbound senders, the optional data channel and the remote
//! stream bookkeeping. Each session owns its lifecycle independently
//! of every other peer; a rejoin is always a fresh session.

use crate::engine::{EngineError, PeerConnector, TrackKind, TrackSender};
use crate::media::LocalTrack;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

// ============================================================================
// STATE MACHINE
// ============================================================================

/// Lifecycle of a peer session. No reconnection: `Closed` is terminal
/// and a returning participant gets a brand-new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Connection exists, no negotiation started.
    Created,
    /// Description exchange in flight; candidates may already trickle.
    Negotiating,
    /// First remote track or data channel arrived.
    Connected,
    /// Terminal.
    Closed,
}

/// One inbound track of the remote stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub id: String,
    pub kind: TrackKind,
}

/// The remote participant's media stream, grown incrementally as track
/// events arrive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub id: String,
    pub tracks: Vec<RemoteTrackInfo>,
}

// ============================================================================
// PEER SESSION
// ============================================================================

pub struct PeerSession {
    remote_id: String,
    connection: Arc<dyn PeerConnector>,
    state: Mutex<PeerState>,
    senders: Mutex<Vec<Arc<dyn TrackSender>>>,
    remote_stream: Mutex<Option<RemoteStream>>,
    audio_level: Mutex<f32>,
    close_signal: Notify,
}

impl PeerSession {
    pub fn new(remote_id: String, connection: Arc<dyn PeerConnector>) -> Self {
        Self {
            remote_id,
            connection,
            state: Mutex::new(PeerState::Created),
            senders: Mutex::new(Vec::new()),
            remote_stream: Mutex::new(None),
            audio_level: Mutex::new(0.0),
            close_signal: Notify::new(),
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    pub fn connection(&self) -> &Arc<dyn PeerConnector> {
        &self.connection
    }

    pub fn remote_stream(&self) -> Option<RemoteStream> {
        self.remote_stream.lock().clone()
    }

    pub fn sender_count(&self) -> usize {
        self.senders.lock().len()
    }

    pub fn audio_level(&self) -> f32 {
        *self.audio_level.lock()
    }

    pub fn set_audio_level(&self, level: f32) {
        *self.audio_level.lock() = level.clamp(0.0, 1.0);
    }

    /// Enters `Negotiating` once the description exchange starts.
    pub fn mark_negotiating(&self) {
        let mut state = self.state.lock();
        if *state == PeerState::Created {
            *state = PeerState::Negotiating;
        }
    }

    /// Declares the session live. Returns true on the first transition
    /// so the caller can raise its one-shot peer-connected notification.
    pub fn mark_connected(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            PeerState::Created | PeerState::Negotiating => {
                *state = PeerState::Connected;
                true
            }
            _ => false,
        }
    }

    /// Adds every track as an outbound sender, recording the handles
    /// for later in-place replacement.
    pub async fn attach_local_tracks(
        &self,
        tracks: &[Arc<LocalTrack>],
    ) -> Result<(), EngineError> {
        for track in tracks {
            let sender = self.connection.add_track(Arc::clone(track)).await?;
            self.senders.lock().push(sender);
        }
        Ok(())
    }

    /// Swaps the same-kind sender's track in place, or adds a sender if
    /// none exists yet. Never tears a sender down, so no renegotiation
    /// cycle is triggered.
    pub async fn replace_track(
        &self,
        kind: TrackKind,
        track: Arc<LocalTrack>,
    ) -> Result<(), EngineError> {
        let existing = self
            .senders
            .lock()
            .iter()
            .find(|s| s.kind() == kind)
            .cloned();

        match existing {
            Some(sender) => sender.replace_track(track).await,
            None => {
                let sender = self.connection.add_track(track).await?;
                self.senders.lock().push(sender);
                Ok(())
            }
        }
    }

    /// Records an inbound track. The first track stores the remote
    /// stream and returns true (peer is now connected); later tracks
    /// append to the existing stream.
    pub fn handle_remote_track(&self, kind: TrackKind, track_id: String, stream_id: String) -> bool {
        {
            let mut stream = self.remote_stream.lock();
            match stream.as_mut() {
                Some(stream) => {
                    if !stream.tracks.iter().any(|t| t.id == track_id) {
                        stream.tracks.push(RemoteTrackInfo { id: track_id, kind });
                    }
                }
                None => {
                    *stream = Some(RemoteStream {
                        id: stream_id,
                        tracks: vec![RemoteTrackInfo { id: track_id, kind }],
                    });
                }
            }
        }

        self.mark_connected()
    }

    /// Best-effort data send: writes only when a channel reports open,
    /// otherwise a silent no-op. Callers gate latency-sensitive sends
    /// on the connected state themselves.
    pub async fn send_data(&self, value: &str) {
        let Some(channel) = self.connection.data_channel() else {
            return;
        };
        if !channel.is_open() {
            return;
        }
        if let Err(e) = channel.send_text(value).await {
            tracing::warn!("Data send to {} failed: {}", self.remote_id, e);
        }
    }

    /// Resolves once the session reaches `Closed`. The event pump waits
    /// on this so closed sessions do not keep their task alive.
    pub(crate) async fn wait_closed(&self) {
        while self.state() != PeerState::Closed {
            self.close_signal.notified().await;
        }
    }

    /// Terminal transition: detaches senders, closes the data channel
    /// and the connection, drops the remote stream. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == PeerState::Closed {
                return;
            }
            *state = PeerState::Closed;
        }

        // notify_one stores a permit, so a pump that subscribes after
        // this point still wakes.
        self.close_signal.notify_one();

        self.senders.lock().clear();
        *self.remote_stream.lock() = None;

        if let Some(channel) = self.connection.data_channel() {
            if let Err(e) = channel.close().await {
                tracing::debug!("Data channel close for {}: {}", self.remote_id, e);
            }
        }

        if let Err(e) = self.connection.close().await {
            tracing::warn!("Connection close for {} failed: {}", self.remote_id, e);
        }

        tracing::info!("Peer session closed: {}", self.remote_id);
    }
}
