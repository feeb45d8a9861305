//! Session manager
//!
//! The mesh orchestrator: one instance per joined room, reacting to
//! relay traffic and peer connection events:
//! - join → caller role (offer), inbound offer → callee role (answer)
//! - trickle candidate routing in both directions
//! - duplicate-session suppression (first creation wins)
//! - local media fan-out to every live session
//! - room-wide hang-up
//!
//! Relay messages are consumed one at a time in `run`; all session-map
//! mutation happens inside that dispatch sequence.

use crate::config::SessionConfig;
use crate::engine::{
    ConnectionEvent, ConnectionOptions, EngineError, IceCandidate, RtcEngine, SessionDescription,
    TrackKind,
};
use crate::media::{LocalMediaController, MediaConstraints, MediaError, TrackChange};
use crate::session::peer::{PeerSession, PeerState, RemoteStream};
use crate::signaling::{ClientMessage, ServerMessage, SignalingChannel, SignalingError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Per-connection event queue depth.
const CONNECTION_QUEUE: usize = 64;
/// Session event bus capacity.
const EVENT_BUS_CAPACITY: usize = 100;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Events published to the application.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// First remote track or data channel open for a peer. Raised at
    /// most once per session.
    PeerConnected {
        remote_id: String,
        stream: Option<RemoteStream>,
    },

    /// The peer's session was closed and removed.
    PeerDisconnected { remote_id: String },

    /// A data channel message from a peer.
    DataReceived { remote_id: String, value: String },

    /// Metered remote audio level, 0.0..=1.0.
    AudioLevel { remote_id: String, level: f32 },
}

// ============================================================================
// MANAGER
// ============================================================================

pub struct SessionManager {
    config: SessionConfig,
    engine: Arc<dyn RtcEngine>,
    signaling: Arc<dyn SignalingChannel>,
    media: Arc<LocalMediaController>,
    sessions: Mutex<HashMap<String, Arc<PeerSession>>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        engine: Arc<dyn RtcEngine>,
        signaling: Arc<dyn SignalingChannel>,
        media: Arc<LocalMediaController>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Arc::new(Self {
            config,
            engine,
            signaling,
            media,
            sessions: Mutex::new(HashMap::new()),
            event_tx,
        })
    }

    /// Subscribes to session events. Dropping the receiver is the
    /// unsubscribe.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn media(&self) -> &LocalMediaController {
        &self.media
    }

    pub fn session(&self, remote_id: &str) -> Option<Arc<PeerSession>> {
        self.sessions.lock().get(remote_id).cloned()
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    // ========================================================================
    // ROOM MEMBERSHIP
    // ========================================================================

    /// Announces room membership. Existing members answer with join
    /// notifications that this manager turns into offers.
    pub async fn enter(&self, room_id: &str) -> Result<(), SessionError> {
        self.signaling
            .send(ClientMessage::Enter {
                room_id: room_id.to_string(),
            })
            .await?;
        tracing::info!("Entered room: {}", room_id);
        Ok(())
    }

    /// Closes every peer session, releases local media and departs the
    /// room. Safe to call with no sessions.
    pub async fn hang_up(&self, room_id: &str) -> Result<(), SessionError> {
        let drained: Vec<_> = {
            let mut sessions = self.sessions.lock();
            sessions.drain().map(|(_, session)| session).collect()
        };

        for session in drained {
            session.close().await;
            let _ = self.event_tx.send(SessionEvent::PeerDisconnected {
                remote_id: session.remote_id().to_string(),
            });
        }

        self.media.release();

        self.signaling
            .send(ClientMessage::Leave {
                room_id: room_id.to_string(),
            })
            .await?;
        tracing::info!("Left room: {}", room_id);
        Ok(())
    }

    // ========================================================================
    // RELAY DISPATCH
    // ========================================================================

    /// Consumes the signaling stream until it closes. Messages are
    /// handled strictly one at a time.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self.signaling.subscribe();
        loop {
            match rx.recv().await {
                Ok(msg) => self.dispatch(msg).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Signaling receiver lagged, {} message(s) dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::info!("Signaling stream ended");
    }

    pub(crate) async fn dispatch(self: &Arc<Self>, msg: ServerMessage) {
        match msg {
            ServerMessage::Join { remote_id } => self.handle_join(remote_id).await,
            ServerMessage::Leave { remote_id } => self.handle_leave(remote_id).await,
            ServerMessage::Offer { from, description } => self.handle_offer(from, description).await,
            ServerMessage::Answer { from, description } => {
                self.handle_answer(from, description).await
            }
            ServerMessage::IceCandidate { from, candidate } => {
                self.handle_candidate(from, candidate).await
            }
        }
    }

    /// Caller role: a new member joined, so this side creates the
    /// session and sends the offer.
    async fn handle_join(self: &Arc<Self>, remote_id: String) {
        if self.sessions.lock().contains_key(&remote_id) {
            tracing::debug!("Ignoring join for known peer: {}", remote_id);
            return;
        }

        let session = match self.create_session(&remote_id).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("Failed to create session for {}: {}", remote_id, e);
                return;
            }
        };

        session.mark_negotiating();
        if let Err(e) = self.send_offer(&session).await {
            // The session stays; trickled candidates may still land
            // before the peer gives up.
            tracing::warn!("Offer to {} failed: {}", remote_id, e);
        }
    }

    /// Callee role: an existing member offered to this side.
    async fn handle_offer(self: &Arc<Self>, from: String, description: SessionDescription) {
        if self.sessions.lock().contains_key(&from) {
            // The earlier creation for this peer wins.
            tracing::debug!("Ignoring offer from known peer: {}", from);
            return;
        }

        let session = match self.create_session(&from).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("Failed to create session for {}: {}", from, e);
                return;
            }
        };

        session.mark_negotiating();
        if let Err(e) = self.send_answer(&session, description).await {
            tracing::warn!("Answer to {} failed: {}", from, e);
        }
    }

    async fn handle_answer(self: &Arc<Self>, from: String, description: SessionDescription) {
        let Some(session) = self.session(&from) else {
            tracing::debug!("Ignoring answer from unknown peer: {}", from);
            return;
        };

        if let Err(e) = session.connection().set_remote_description(description).await {
            tracing::warn!("Applying answer from {} failed: {}", from, e);
        }
    }

    async fn handle_candidate(self: &Arc<Self>, from: String, candidate: IceCandidate) {
        let Some(session) = self.session(&from) else {
            tracing::debug!("Ignoring candidate from unknown peer: {}", from);
            return;
        };

        if let Err(e) = session.connection().add_ice_candidate(candidate).await {
            tracing::warn!("Adding candidate from {} failed: {}", from, e);
        }
    }

    async fn handle_leave(self: &Arc<Self>, remote_id: String) {
        let removed = self.sessions.lock().remove(&remote_id);
        let Some(session) = removed else {
            tracing::debug!("Ignoring leave for unknown peer: {}", remote_id);
            return;
        };

        session.close().await;
        let _ = self.event_tx.send(SessionEvent::PeerDisconnected { remote_id });
    }

    // ========================================================================
    // NEGOTIATION
    // ========================================================================

    async fn send_offer(&self, session: &PeerSession) -> Result<(), SessionError> {
        let offer = session.connection().create_offer().await?;
        session
            .connection()
            .set_local_description(offer.clone())
            .await?;

        self.signaling
            .send(ClientMessage::Offer {
                to: session.remote_id().to_string(),
                description: offer,
            })
            .await?;
        Ok(())
    }

    async fn send_answer(
        &self,
        session: &PeerSession,
        offer: SessionDescription,
    ) -> Result<(), SessionError> {
        session.connection().set_remote_description(offer).await?;
        let answer = session.connection().create_answer().await?;
        session
            .connection()
            .set_local_description(answer.clone())
            .await?;

        self.signaling
            .send(ClientMessage::Answer {
                to: session.remote_id().to_string(),
                description: answer,
            })
            .await?;
        Ok(())
    }

    async fn create_session(self: &Arc<Self>, remote_id: &str) -> Result<Arc<PeerSession>, SessionError> {
        let opts = ConnectionOptions {
            data_channel_label: self
                .config
                .data_channel
                .then(|| format!("channel-{remote_id}")),
            audio_levels: self.config.audio_levels,
        };

        let (tx, rx) = mpsc::channel(CONNECTION_QUEUE);
        let connection = self.engine.create_connection(opts, tx).await?;

        let session = Arc::new(PeerSession::new(remote_id.to_string(), connection));
        session.attach_local_tracks(&self.media.tracks()).await?;

        self.sessions
            .lock()
            .insert(remote_id.to_string(), Arc::clone(&session));

        tokio::spawn(Self::pump_connection(
            Arc::clone(self),
            Arc::clone(&session),
            rx,
        ));

        tracing::info!("Created peer session: {}", remote_id);
        Ok(session)
    }

    /// Forwards one connection's events: candidates out to the relay,
    /// everything else onto the session event bus. Ends when the session
    /// closes; events still in flight for a closed session are dropped.
    async fn pump_connection(
        self: Arc<Self>,
        session: Arc<PeerSession>,
        mut rx: mpsc::Receiver<ConnectionEvent>,
    ) {
        let remote_id = session.remote_id().to_string();

        loop {
            let event = tokio::select! {
                _ = session.wait_closed() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if session.state() == PeerState::Closed {
                break;
            }

            match event {
                ConnectionEvent::LocalCandidate(candidate) => {
                    let msg = ClientMessage::IceCandidate {
                        to: remote_id.clone(),
                        candidate,
                    };
                    if let Err(e) = self.signaling.send(msg).await {
                        tracing::warn!("Relaying candidate to {} failed: {}", remote_id, e);
                    }
                }
                ConnectionEvent::RemoteTrack {
                    kind,
                    track_id,
                    stream_id,
                } => {
                    if session.handle_remote_track(kind, track_id, stream_id) {
                        let _ = self.event_tx.send(SessionEvent::PeerConnected {
                            remote_id: remote_id.clone(),
                            stream: session.remote_stream(),
                        });
                    }
                }
                ConnectionEvent::DataChannelOpen => {
                    if session.mark_connected() {
                        let _ = self.event_tx.send(SessionEvent::PeerConnected {
                            remote_id: remote_id.clone(),
                            stream: session.remote_stream(),
                        });
                    }
                }
                ConnectionEvent::DataReceived(value) => {
                    let _ = self.event_tx.send(SessionEvent::DataReceived {
                        remote_id: remote_id.clone(),
                        value,
                    });
                }
                ConnectionEvent::AudioLevel(level) => {
                    session.set_audio_level(level);
                    let _ = self.event_tx.send(SessionEvent::AudioLevel {
                        remote_id: remote_id.clone(),
                        level,
                    });
                }
                ConnectionEvent::Closed => {
                    tracing::debug!("Transport closed for {}", remote_id);
                    break;
                }
            }
        }
    }

    // ========================================================================
    // LOCAL MEDIA
    // ========================================================================

    /// Captures the requested kinds and installs the tracks on every
    /// live session.
    pub async fn acquire_media(&self, constraints: MediaConstraints) -> Result<(), SessionError> {
        let changes = self.media.acquire(constraints)?;
        self.fan_out(changes).await;
        Ok(())
    }

    pub fn set_audio_enabled(&self, enabled: bool) -> bool {
        self.media.set_enabled(TrackKind::Audio, enabled)
    }

    pub fn set_video_enabled(&self, enabled: bool) -> bool {
        self.media.set_enabled(TrackKind::Video, enabled)
    }

    /// Switches the capture device and swaps the track into every live
    /// session without renegotiation.
    pub async fn switch_device(
        &self,
        kind: TrackKind,
        device_id: &str,
    ) -> Result<(), SessionError> {
        let change = self.media.switch_device(kind, device_id)?;
        self.fan_out(vec![change]).await;
        Ok(())
    }

    /// Swaps the video track between screen and camera capture on every
    /// live session.
    pub async fn set_screen_share(&self, enabled: bool) -> Result<(), SessionError> {
        let change = self.media.set_screen_share(enabled)?;
        self.fan_out(vec![change]).await;
        Ok(())
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.media.is_screen_sharing()
    }

    /// Best-effort send to every peer with an open data channel.
    pub async fn broadcast_data(&self, value: &str) {
        let sessions: Vec<_> = self.sessions.lock().values().cloned().collect();
        for session in sessions {
            session.send_data(value).await;
        }
    }

    async fn fan_out(&self, changes: Vec<TrackChange>) {
        let sessions: Vec<_> = self.sessions.lock().values().cloned().collect();

        for change in changes {
            for session in &sessions {
                if let Err(e) = session
                    .replace_track(change.kind, Arc::clone(&change.track))
                    .await
                {
                    // One broken session must not block the rest.
                    tracing::warn!("Track update for {} failed: {}", session.remote_id(), e);
                }
            }
        }
    }
}
