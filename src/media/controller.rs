//! Local media controller
//!
//! Owns the local capture track set: acquisition, per-kind enable
//! gates, device preference memory, device hot-swap, screen share and
//! release. The controller never talks to peer sessions; replacement
//! operations return `TrackChange` values the session layer fans out
//! to every live connection.

use super::capture::{CaptureBackend, CaptureError, DeviceInfo, DeviceKind};
use super::track::{LocalTrack, TrackSource};
use crate::engine::TrackKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum MediaError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Requested local capture kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            video: false,
            audio: true,
        }
    }

    pub fn audio_video() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

/// Result of an acquire/switch: the new track, and the id of the track
/// it replaced in place, if any. Carried to every live session so its
/// sender can swap tracks without renegotiation.
#[derive(Debug, Clone)]
pub struct TrackChange {
    pub kind: TrackKind,
    pub replaced: Option<String>,
    pub track: Arc<LocalTrack>,
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct LocalMediaController {
    backend: Arc<dyn CaptureBackend>,
    tracks: Mutex<Vec<Arc<LocalTrack>>>,
    preferences: Mutex<HashMap<DeviceKind, String>>,
}

impl LocalMediaController {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            tracks: Mutex::new(Vec::new()),
            preferences: Mutex::new(HashMap::new()),
        }
    }

    /// Obtains or augments the local track set. Newly requested kinds
    /// are added; an already-present kind is re-captured and replaced
    /// in place (old track stopped, never removed-and-re-added).
    pub fn acquire(&self, constraints: MediaConstraints) -> Result<Vec<TrackChange>, MediaError> {
        let mut changes = Vec::new();

        if constraints.audio {
            let track = self.capture(TrackKind::Audio, TrackSource::Microphone, None)?;
            changes.push(self.install(track));
        }
        if constraints.video {
            let track = self.capture(TrackKind::Video, TrackSource::Camera, None)?;
            changes.push(self.install(track));
        }

        Ok(changes)
    }

    /// Flips the enable gate on every track of `kind`. Returns false
    /// (after logging) when no such track exists, so callers can skip
    /// updating their own state.
    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) -> bool {
        let tracks = self.tracks.lock();
        let mut found = false;

        for track in tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
            found = true;
        }

        if !found {
            tracing::warn!("No local {} track available", kind);
        }
        found
    }

    /// Captures from the new device and swaps the same-kind track in
    /// place. On capture failure the previous track stays active and
    /// the preference is left untouched.
    pub fn switch_device(
        &self,
        kind: TrackKind,
        device_id: &str,
    ) -> Result<TrackChange, MediaError> {
        let source = match kind {
            TrackKind::Audio => TrackSource::Microphone,
            TrackKind::Video => TrackSource::Camera,
        };

        let track = self.backend.capture(kind, source, Some(device_id))?;

        self.preferences
            .lock()
            .insert(Self::input_device_kind(kind), device_id.to_string());

        Ok(self.install(track))
    }

    /// Swaps the video track between screen and camera capture.
    pub fn set_screen_share(&self, enabled: bool) -> Result<TrackChange, MediaError> {
        let source = if enabled {
            TrackSource::Screen
        } else {
            TrackSource::Camera
        };

        let track = self.capture(TrackKind::Video, source, None)?;
        Ok(self.install(track))
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.tracks
            .lock()
            .iter()
            .any(|t| t.kind() == TrackKind::Video && t.source() == TrackSource::Screen)
    }

    /// Enumerated devices, partitioned by kind; recomputed per call.
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, MediaError> {
        Ok(self.backend.list_devices()?)
    }

    /// Remembers a device preference without capturing (e.g. the audio
    /// output device, which the render side picks up).
    pub fn set_device_preference(&self, kind: DeviceKind, device_id: &str) {
        self.preferences
            .lock()
            .insert(kind, device_id.to_string());
    }

    pub fn preferred_device(&self, kind: DeviceKind) -> Option<String> {
        self.preferences.lock().get(&kind).cloned()
    }

    /// Snapshot of the current track set, in acquisition order.
    pub fn tracks(&self) -> Vec<Arc<LocalTrack>> {
        self.tracks.lock().clone()
    }

    pub fn track_of(&self, kind: TrackKind) -> Option<Arc<LocalTrack>> {
        self.tracks.lock().iter().find(|t| t.kind() == kind).cloned()
    }

    /// Stops every local track. Idempotent.
    pub fn release(&self) {
        let drained: Vec<_> = self.tracks.lock().drain(..).collect();
        for track in &drained {
            track.stop();
            self.backend.stop_track(track.id());
        }
        if !drained.is_empty() {
            tracing::info!("Released {} local track(s)", drained.len());
        }
    }

    fn capture(
        &self,
        kind: TrackKind,
        source: TrackSource,
        device_id: Option<&str>,
    ) -> Result<Arc<LocalTrack>, MediaError> {
        let pref;
        let device_id = match device_id {
            Some(id) => Some(id),
            // Screen capture ignores the camera preference.
            None if source == TrackSource::Screen => None,
            None => {
                pref = self.preferred_device(Self::input_device_kind(kind));
                pref.as_deref()
            }
        };

        Ok(self.backend.capture(kind, source, device_id)?)
    }

    /// Puts a freshly captured track into the set: same-kind tracks are
    /// replaced in place, new kinds are appended.
    fn install(&self, track: Arc<LocalTrack>) -> TrackChange {
        let kind = track.kind();
        let mut tracks = self.tracks.lock();

        match tracks.iter().position(|t| t.kind() == kind) {
            Some(pos) => {
                let old = Arc::clone(&tracks[pos]);
                old.stop();
                self.backend.stop_track(old.id());
                tracks[pos] = Arc::clone(&track);

                TrackChange {
                    kind,
                    replaced: Some(old.id().to_string()),
                    track,
                }
            }
            None => {
                tracks.push(Arc::clone(&track));
                TrackChange {
                    kind,
                    replaced: None,
                    track,
                }
            }
        }
    }

    fn input_device_kind(kind: TrackKind) -> DeviceKind {
        match kind {
            TrackKind::Audio => DeviceKind::AudioInput,
            TrackKind::Video => DeviceKind::VideoInput,
        }
    }
}
