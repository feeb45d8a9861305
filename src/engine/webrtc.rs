//! Production engine backed by webrtc-rs
//!
//! One `WebRtcEngine` builds any number of peer connections; every
//! connection forwards its callbacks into the event channel bound at
//! creation. Remote audio can optionally be metered with a coarse
//! level estimate derived from RTP payload energy.

use super::{
    ConnectionEvent, ConnectionOptions, DataChannel, EngineError, IceCandidate, PeerConnector,
    RtcEngine, SdpKind, SessionDescription, TrackKind, TrackSender,
};
use crate::config::IceServerConfig;
use crate::media::LocalTrack;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Emit an audio level event once per this many RTP packets (~200ms of
/// 20ms opus frames).
const LEVEL_EVERY_PACKETS: u32 = 10;

// ============================================================================
// ENGINE
// ============================================================================

/// Peer connection factory using the webrtc crate.
pub struct WebRtcEngine {
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcEngine {
    pub fn new(ice_servers: &[IceServerConfig]) -> Self {
        let ice_servers = ice_servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone(),
                credential: s.credential.clone(),
                ..Default::default()
            })
            .collect();

        Self { ice_servers }
    }
}

#[async_trait]
impl RtcEngine for WebRtcEngine {
    async fn create_connection(
        &self,
        opts: ConnectionOptions,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Arc<dyn PeerConnector>, EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| EngineError::Setup(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| EngineError::Setup(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| EngineError::Setup(e.to_string()))?,
        );

        install_handlers(&pc, &opts, &events).await;

        // Outbound data channel, if requested. The remote side's channel
        // is adopted for receive through on_data_channel above.
        let data_channel = match &opts.data_channel_label {
            Some(label) => {
                let dc = pc
                    .create_data_channel(label, None)
                    .await
                    .map_err(|e| EngineError::DataChannel(e.to_string()))?;
                wire_data_channel(&dc, &events);
                Some(Arc::new(WebRtcDataChannel { dc }) as Arc<dyn DataChannel>)
            }
            None => None,
        };

        Ok(Arc::new(WebRtcConnector { pc, data_channel }))
    }
}

/// Registers the connection callbacks, forwarding into the event channel.
async fn install_handlers(
    pc: &Arc<RTCPeerConnection>,
    opts: &ConnectionOptions,
    events: &mpsc::Sender<ConnectionEvent>,
) {
    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        Box::pin(async move {
            if let Some(c) = candidate {
                match c.to_json() {
                    Ok(init) => {
                        let _ = tx
                            .send(ConnectionEvent::LocalCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            }))
                            .await;
                    }
                    Err(e) => tracing::warn!("Failed to serialize ICE candidate: {}", e),
                }
            }
        })
    }));

    let tx = events.clone();
    let meter_audio = opts.audio_levels;
    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
        let tx = tx.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                RTPCodecType::Video => TrackKind::Video,
                _ => return,
            };

            tracing::info!("Remote track received: kind={}, ssrc={}", kind, track.ssrc());

            let _ = tx
                .send(ConnectionEvent::RemoteTrack {
                    kind,
                    track_id: track.id(),
                    stream_id: track.stream_id(),
                })
                .await;

            if kind == TrackKind::Audio && meter_audio {
                spawn_level_meter(track, tx.clone());
            }
        })
    }));

    let tx = events.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let tx = tx.clone();
        Box::pin(async move {
            tracing::debug!("Inbound data channel: {}", dc.label());
            wire_data_channel(&dc, &tx);
        })
    }));

    let tx = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let tx = tx.clone();
        Box::pin(async move {
            tracing::info!("Peer connection state: {:?}", state);
            if matches!(
                state,
                RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Closed
            ) {
                let _ = tx.send(ConnectionEvent::Closed).await;
            }
        })
    }));
}

/// Wires open/message callbacks of a data channel into the event channel.
fn wire_data_channel(dc: &Arc<RTCDataChannel>, events: &mpsc::Sender<ConnectionEvent>) {
    let tx = events.clone();
    dc.on_open(Box::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(ConnectionEvent::DataChannelOpen).await;
        })
    }));

    let tx = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = tx.clone();
        Box::pin(async move {
            let value = String::from_utf8_lossy(&msg.data).into_owned();
            let _ = tx.send(ConnectionEvent::DataReceived(value)).await;
        })
    }));
}

/// Reads RTP from a remote audio track and emits a coarse 0.0..=1.0
/// level estimate from payload energy. Not a decoder; just enough for a
/// meter. Ends when the track does.
fn spawn_level_meter(track: Arc<TrackRemote>, events: mpsc::Sender<ConnectionEvent>) {
    tokio::spawn(async move {
        let mut packets: u32 = 0;
        let mut energy: f32 = 0.0;

        loop {
            match track.read_rtp().await {
                Ok((packet, _)) => {
                    energy += payload_energy(&packet.payload);
                    packets += 1;

                    if packets == LEVEL_EVERY_PACKETS {
                        let level = (energy / packets as f32).min(1.0);
                        if events.send(ConnectionEvent::AudioLevel(level)).await.is_err() {
                            break;
                        }
                        packets = 0;
                        energy = 0.0;
                    }
                }
                Err(e) => {
                    tracing::debug!("Audio level meter stopped: {}", e);
                    break;
                }
            }
        }
    });
}

/// Mean absolute byte deviation of the encoded payload, normalized.
fn payload_energy(payload: &[u8]) -> f32 {
    if payload.is_empty() {
        return 0.0;
    }
    let sum: u32 = payload
        .iter()
        .map(|b| (*b as i16 - 128).unsigned_abs() as u32)
        .sum();
    sum as f32 / payload.len() as f32 / 128.0
}

// ============================================================================
// CONNECTOR
// ============================================================================

struct WebRtcConnector {
    pc: Arc<RTCPeerConnection>,
    data_channel: Option<Arc<dyn DataChannel>>,
}

impl WebRtcConnector {
    fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
        match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        }
        .map_err(|e| EngineError::Negotiation(e.to_string()))
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))?;

        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: offer.sdp,
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))?;

        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: answer.sdp,
        })
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = Self::to_rtc_description(desc)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = Self::to_rtc_description(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))
    }

    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<Arc<dyn TrackSender>, EngineError> {
        let kind = track.kind();
        let sender = self
            .pc
            .add_track(track.rtp_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| EngineError::Track(e.to_string()))?;

        Ok(Arc::new(WebRtcTrackSender { kind, sender }))
    }

    fn data_channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.data_channel.clone()
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pc
            .close()
            .await
            .map_err(|e| EngineError::Setup(e.to_string()))
    }
}

// ============================================================================
// SENDER / DATA CHANNEL
// ============================================================================

struct WebRtcTrackSender {
    kind: TrackKind,
    sender: Arc<RTCRtpSender>,
}

#[async_trait]
impl TrackSender for WebRtcTrackSender {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    async fn replace_track(&self, track: Arc<LocalTrack>) -> Result<(), EngineError> {
        self.sender
            .replace_track(Some(track.rtp_track() as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .map_err(|e| EngineError::Track(e.to_string()))
    }
}

struct WebRtcDataChannel {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, value: &str) -> Result<(), EngineError> {
        self.dc
            .send_text(value.to_string())
            .await
            .map(|_| ())
            .map_err(|e| EngineError::DataChannel(e.to_string()))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.dc
            .close()
            .await
            .map_err(|e| EngineError::DataChannel(e.to_string()))
    }
}
