//! Scripted engine for protocol tests
//!
//! Records every negotiation step and lets tests inject connection
//! events (remote tracks, data, levels) as a real engine would.

use super::{
    ConnectionEvent, ConnectionOptions, DataChannel, EngineError, IceCandidate, PeerConnector,
    RtcEngine, SdpKind, SessionDescription, TrackKind, TrackSender,
};
use crate::media::LocalTrack;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

static SDP_SEQ: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
pub(crate) struct MockEngine {
    pub connections: Mutex<Vec<Arc<MockConnector>>>,
    pub fail_create: AtomicBool,
    /// Preset the negotiation-failure flag on every created connector.
    pub fail_negotiation: AtomicBool,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection(&self, index: usize) -> Arc<MockConnector> {
        Arc::clone(&self.connections.lock()[index])
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }
}

#[async_trait]
impl RtcEngine for MockEngine {
    async fn create_connection(
        &self,
        opts: ConnectionOptions,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Arc<dyn PeerConnector>, EngineError> {
        if self.fail_create.load(Ordering::Relaxed) {
            return Err(EngineError::Setup("scripted failure".to_string()));
        }

        let data = opts
            .data_channel_label
            .as_ref()
            .map(|_| Arc::new(MockDataChannel::default()));

        let conn = Arc::new(MockConnector {
            opts,
            events,
            local_desc: Mutex::new(None),
            remote_desc: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
            data,
            closed: AtomicBool::new(false),
            fail_negotiation: AtomicBool::new(self.fail_negotiation.load(Ordering::Relaxed)),
        });

        self.connections.lock().push(Arc::clone(&conn));
        Ok(conn)
    }
}

pub(crate) struct MockConnector {
    pub opts: ConnectionOptions,
    pub events: mpsc::Sender<ConnectionEvent>,
    pub local_desc: Mutex<Option<SessionDescription>>,
    pub remote_desc: Mutex<Option<SessionDescription>>,
    pub candidates: Mutex<Vec<IceCandidate>>,
    pub senders: Mutex<Vec<Arc<MockSender>>>,
    pub data: Option<Arc<MockDataChannel>>,
    pub closed: AtomicBool,
    pub fail_negotiation: AtomicBool,
}

impl MockConnector {
    pub fn sender_of(&self, kind: TrackKind) -> Option<Arc<MockSender>> {
        self.senders.lock().iter().find(|s| s.kind == kind).cloned()
    }

    fn check_negotiation(&self) -> Result<(), EngineError> {
        if self.fail_negotiation.load(Ordering::Relaxed) {
            return Err(EngineError::Negotiation("scripted failure".to_string()));
        }
        if self.closed.load(Ordering::Relaxed) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        self.check_negotiation()?;
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: format!("mock-offer-{}", SDP_SEQ.fetch_add(1, Ordering::Relaxed)),
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        self.check_negotiation()?;
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: format!("mock-answer-{}", SDP_SEQ.fetch_add(1, Ordering::Relaxed)),
        })
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.check_negotiation()?;
        *self.local_desc.lock() = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.check_negotiation()?;
        *self.remote_desc.lock() = Some(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<Arc<dyn TrackSender>, EngineError> {
        let sender = Arc::new(MockSender {
            kind: track.kind(),
            track: Mutex::new(track),
            replaced: AtomicUsize::new(0),
        });
        self.senders.lock().push(Arc::clone(&sender));
        Ok(sender)
    }

    fn data_channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.data
            .clone()
            .map(|d| d as Arc<dyn DataChannel>)
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

pub(crate) struct MockSender {
    pub kind: TrackKind,
    pub track: Mutex<Arc<LocalTrack>>,
    pub replaced: AtomicUsize,
}

#[async_trait]
impl TrackSender for MockSender {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    async fn replace_track(&self, track: Arc<LocalTrack>) -> Result<(), EngineError> {
        *self.track.lock() = track;
        self.replaced.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockDataChannel {
    pub open: AtomicBool,
    pub sent: Mutex<Vec<String>>,
    pub closed: AtomicBool,
}

#[async_trait]
impl DataChannel for MockDataChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    async fn send_text(&self, value: &str) -> Result<(), EngineError> {
        if !self.is_open() {
            return Err(EngineError::DataChannel("channel not open".to_string()));
        }
        self.sent.lock().push(value.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.open.store(false, Ordering::Relaxed);
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}
