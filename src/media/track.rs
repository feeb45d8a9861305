//! Local track handle
//!
//! One outbound media track. Enable/disable flips a gate the capture
//! path honors; the track object itself is never created or destroyed
//! by a toggle. Device switches and screen-share toggles create a new
//! track and replace the old one in place on every sender.

use super::capture::SAMPLE_RATE;
use crate::engine::TrackKind;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

/// Stream id shared by all local tracks, mirroring the single local
/// media stream.
const LOCAL_STREAM_ID: &str = "local-media";

static TRACK_SEQ: AtomicU64 = AtomicU64::new(0);

/// Where a local track's frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
}

impl fmt::Display for TrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackSource::Microphone => write!(f, "microphone"),
            TrackSource::Camera => write!(f, "camera"),
            TrackSource::Screen => write!(f, "screen"),
        }
    }
}

/// One local capture track.
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    source: TrackSource,
    device_id: Option<String>,
    enabled: AtomicBool,
    stopped: AtomicBool,
    rtp: Arc<TrackLocalStaticRTP>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, source: TrackSource, device_id: Option<String>) -> Self {
        let seq = TRACK_SEQ.fetch_add(1, Ordering::Relaxed);
        let id = format!("{}-{}-{}", kind, source, seq);

        let capability = match kind {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: SAMPLE_RATE,
                channels: 1,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90_000,
                ..Default::default()
            },
        };

        let rtp = Arc::new(TrackLocalStaticRTP::new(
            capability,
            id.clone(),
            LOCAL_STREAM_ID.to_string(),
        ));

        Self {
            id,
            kind,
            source,
            device_id,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            rtp,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn source(&self) -> TrackSource {
        self.source
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// The engine-facing RTP track.
    pub fn rtp_track(&self) -> Arc<TrackLocalStaticRTP> {
        Arc::clone(&self.rtp)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Gates the capture path; the track survives the toggle.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        tracing::debug!("Track {} enabled: {}", self.id, enabled);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Idempotent. Capture backends watch this flag to end their streams.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::Relaxed) {
            tracing::debug!("Track {} stopped", self.id);
        }
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = LocalTrack::new(TrackKind::Audio, TrackSource::Microphone, None);
        let b = LocalTrack::new(TrackKind::Audio, TrackSource::Microphone, None);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_enable_round_trip_keeps_track() {
        let track = LocalTrack::new(TrackKind::Video, TrackSource::Camera, None);
        let rtp_before = Arc::as_ptr(&track.rtp_track());

        assert!(track.is_enabled());
        track.set_enabled(false);
        assert!(!track.is_enabled());
        track.set_enabled(true);
        assert!(track.is_enabled());

        // Same underlying track object after the round trip.
        assert_eq!(rtp_before, Arc::as_ptr(&track.rtp_track()));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let track = LocalTrack::new(TrackKind::Audio, TrackSource::Microphone, None);
        track.stop();
        track.stop();
        assert!(track.is_stopped());
    }
}
