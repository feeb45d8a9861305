//! Capture backends
//!
//! `CaptureBackend` mints local tracks and enumerates devices. The
//! production backend uses cpal for microphone capture and audio device
//! enumeration; camera and screen tracks are minted as opaque RTP
//! sources whose frame production is the engine's concern.

use super::track::{LocalTrack, TrackSource};
use crate::engine::TrackKind;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Capture sample rate (48kHz, the opus native rate).
pub const SAMPLE_RATE: u32 = 48_000;

/// Frame size in samples (20ms @ 48kHz).
pub const FRAME_SIZE: usize = 960;

/// Ring buffer capacity per captured audio track.
const RING_BUFFER_SIZE: usize = FRAME_SIZE * 10;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No capture device available for {0}")]
    NoDevice(TrackKind),

    #[error("Capture device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device enumeration failed: {0}")]
    Enumeration(String),

    #[error("Unsupported capture configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to build capture stream: {0}")]
    StreamBuild(String),

    #[error("Failed to start capture stream: {0}")]
    StreamPlay(String),
}

// ============================================================================
// DEVICE MODEL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    AudioInput,
    AudioOutput,
    VideoInput,
}

/// One enumerated capture/render device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
    pub kind: DeviceKind,
}

// ============================================================================
// BACKEND TRAIT
// ============================================================================

pub trait CaptureBackend: Send + Sync {
    /// Mints a new local track capturing from the given source/device.
    fn capture(
        &self,
        kind: TrackKind,
        source: TrackSource,
        device_id: Option<&str>,
    ) -> Result<Arc<LocalTrack>, CaptureError>;

    /// Enumerates devices; recomputed on every call.
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError>;

    /// Releases backend resources held for a stopped track.
    fn stop_track(&self, _track_id: &str) {}
}

// ============================================================================
// CPAL BACKEND
// ============================================================================

/// Per-track audio plumbing: captured PCM and the input level meter.
struct AudioPipe {
    buffer: Arc<Mutex<HeapRb<f32>>>,
    level: Arc<Mutex<f32>>,
}

// cpal streams are not Send; they are only created and dropped through
// the backend's stream map.
struct StreamCell(#[allow(dead_code)] Stream);
unsafe impl Send for StreamCell {}

/// Production backend: cpal microphone capture and audio device
/// enumeration. Video tracks are minted without a native frame source.
pub struct CpalBackend {
    streams: Mutex<HashMap<String, StreamCell>>,
    pipes: Mutex<HashMap<String, AudioPipe>>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            pipes: Mutex::new(HashMap::new()),
        }
    }

    /// Pops one 20ms frame of captured PCM for a track, once enough
    /// samples have accumulated. The RTP packetization hook consumes
    /// frames from here.
    pub fn read_frame(&self, track_id: &str) -> Option<Vec<f32>> {
        let pipes = self.pipes.lock();
        let pipe = pipes.get(track_id)?;
        let mut buffer = pipe.buffer.lock();

        if buffer.occupied_len() < FRAME_SIZE {
            return None;
        }

        let mut frame = Vec::with_capacity(FRAME_SIZE);
        for _ in 0..FRAME_SIZE {
            if let Some(sample) = buffer.try_pop() {
                frame.push(sample);
            }
        }
        Some(frame)
    }

    /// Last measured input level for a track, 0.0..=1.0.
    pub fn input_level(&self, track_id: &str) -> f32 {
        self.pipes
            .lock()
            .get(track_id)
            .map(|p| *p.level.lock())
            .unwrap_or(0.0)
    }

    fn capture_audio(&self, device_id: Option<&str>) -> Result<Arc<LocalTrack>, CaptureError> {
        let device = Self::find_input_device(device_id)?;
        let config = Self::find_best_input_config(&device)?;

        tracing::info!(
            "Starting microphone capture: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        let track = Arc::new(LocalTrack::new(
            TrackKind::Audio,
            TrackSource::Microphone,
            device_id.map(str::to_string),
        ));

        let buffer = Arc::new(Mutex::new(HeapRb::new(RING_BUFFER_SIZE)));
        let level = Arc::new(Mutex::new(0.0f32));

        let cb_track = Arc::clone(&track);
        let cb_buffer = Arc::clone(&buffer);
        let cb_level = Arc::clone(&level);
        let source_rate = config.sample_rate.0;

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if cb_track.is_stopped() {
                        return;
                    }

                    // Input level (RMS), measured even while disabled so
                    // meters stay honest about the live device.
                    let rms: f32 =
                        (data.iter().map(|s| s * s).sum::<f32>() / data.len() as f32).sqrt();
                    *cb_level.lock() = rms.min(1.0);

                    if !cb_track.is_enabled() {
                        return;
                    }

                    let samples = resample(data, source_rate, SAMPLE_RATE);
                    let mut buffer = cb_buffer.lock();
                    for sample in samples {
                        let _ = buffer.try_push(sample);
                    }
                },
                |err| {
                    tracing::error!("Microphone capture error: {}", err);
                },
                None,
            )
            .map_err(|e| CaptureError::StreamBuild(e.to_string()))?;

        stream
            .play()
            .map_err(|e| CaptureError::StreamPlay(e.to_string()))?;

        self.streams
            .lock()
            .insert(track.id().to_string(), StreamCell(stream));
        self.pipes
            .lock()
            .insert(track.id().to_string(), AudioPipe { buffer, level });

        Ok(track)
    }

    fn find_input_device(device_id: Option<&str>) -> Result<Device, CaptureError> {
        let host = cpal::default_host();

        match device_id {
            None => host
                .default_input_device()
                .ok_or(CaptureError::NoDevice(TrackKind::Audio)),
            Some(wanted) => {
                let devices = host
                    .input_devices()
                    .map_err(|e| CaptureError::Enumeration(e.to_string()))?;
                for device in devices {
                    if device.name().map(|n| n == wanted).unwrap_or(false) {
                        return Ok(device);
                    }
                }
                Err(CaptureError::DeviceNotFound(wanted.to_string()))
            }
        }
    }

    fn find_best_input_config(device: &Device) -> Result<StreamConfig, CaptureError> {
        let configs = device
            .supported_input_configs()
            .map_err(|e| CaptureError::UnsupportedConfig(e.to_string()))?;

        Self::select_best_config(configs.collect())
    }

    /// Preference order: 48kHz F32, then any F32 rate, then whatever the
    /// device offers.
    fn select_best_config(
        configs: Vec<SupportedStreamConfigRange>,
    ) -> Result<StreamConfig, CaptureError> {
        let target_rate = cpal::SampleRate(SAMPLE_RATE);

        for config in &configs {
            if config.min_sample_rate() <= target_rate
                && config.max_sample_rate() >= target_rate
                && config.sample_format() == SampleFormat::F32
            {
                return Ok(config.with_sample_rate(target_rate).into());
            }
        }

        for config in &configs {
            if config.sample_format() == SampleFormat::F32 {
                let rate = if config.min_sample_rate() <= target_rate
                    && config.max_sample_rate() >= target_rate
                {
                    target_rate
                } else {
                    config.max_sample_rate()
                };
                return Ok(config.with_sample_rate(rate).into());
            }
        }

        if let Some(config) = configs.first() {
            return Ok(config.with_max_sample_rate().into());
        }

        Err(CaptureError::UnsupportedConfig(
            "No suitable capture configuration found".to_string(),
        ))
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for CpalBackend {
    fn capture(
        &self,
        kind: TrackKind,
        source: TrackSource,
        device_id: Option<&str>,
    ) -> Result<Arc<LocalTrack>, CaptureError> {
        match kind {
            TrackKind::Audio => self.capture_audio(device_id),
            // Camera/screen frame production is delegated; the track is a
            // real RTP source the engine attaches and replaces like any
            // other.
            TrackKind::Video => Ok(Arc::new(LocalTrack::new(
                kind,
                source,
                device_id.map(str::to_string),
            ))),
        }
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        let host = cpal::default_host();
        let mut devices = Vec::new();

        let inputs = host
            .input_devices()
            .map_err(|e| CaptureError::Enumeration(e.to_string()))?;
        for device in inputs {
            if let Ok(name) = device.name() {
                devices.push(DeviceInfo {
                    id: name.clone(),
                    label: name,
                    kind: DeviceKind::AudioInput,
                });
            }
        }

        let outputs = host
            .output_devices()
            .map_err(|e| CaptureError::Enumeration(e.to_string()))?;
        for device in outputs {
            if let Ok(name) = device.name() {
                devices.push(DeviceInfo {
                    id: name.clone(),
                    label: name,
                    kind: DeviceKind::AudioOutput,
                });
            }
        }

        Ok(devices)
    }

    fn stop_track(&self, track_id: &str) {
        self.streams.lock().remove(track_id);
        self.pipes.lock().remove(track_id);
    }
}

/// Linear resampling, good enough for voice capture.
fn resample(data: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return data.to_vec();
    }

    let ratio = to_rate as f32 / from_rate as f32;
    let new_len = (data.len() as f32 * ratio) as usize;
    (0..new_len)
        .map(|i| {
            let src_idx = i as f32 / ratio;
            let idx = src_idx as usize;
            let frac = src_idx - idx as f32;
            let s1 = data.get(idx).copied().unwrap_or(0.0);
            let s2 = data.get(idx + 1).copied().unwrap_or(s1);
            s1 + (s2 - s1) * frac
        })
        .collect()
}

// ============================================================================
// TEST BACKEND
// ============================================================================

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::collections::HashSet;

    /// Scripted backend: mints tracks without devices, can be told to
    /// fail for specific device ids, and records everything captured.
    #[derive(Default)]
    pub(crate) struct ScriptedBackend {
        pub missing_devices: Mutex<HashSet<String>>,
        pub devices: Mutex<Vec<DeviceInfo>>,
        pub captured: Mutex<Vec<Arc<LocalTrack>>>,
        pub stopped: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn remove_device(&self, id: &str) {
            self.missing_devices.lock().insert(id.to_string());
        }
    }

    impl CaptureBackend for ScriptedBackend {
        fn capture(
            &self,
            kind: TrackKind,
            source: TrackSource,
            device_id: Option<&str>,
        ) -> Result<Arc<LocalTrack>, CaptureError> {
            if let Some(id) = device_id {
                if self.missing_devices.lock().contains(id) {
                    return Err(CaptureError::DeviceNotFound(id.to_string()));
                }
            }

            let track = Arc::new(LocalTrack::new(kind, source, device_id.map(str::to_string)));
            self.captured.lock().push(Arc::clone(&track));
            Ok(track)
        }

        fn list_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
            Ok(self.devices.lock().clone())
        }

        fn stop_track(&self, track_id: &str) {
            self.stopped.lock().push(track_id.to_string());
        }
    }
}
