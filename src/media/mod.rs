//! Media Module - local capture and devices
//!
//! This module owns the local side of a call:
//! - the capture track set (microphone, camera, screen)
//! - per-kind enable gates and device preferences
//! - device enumeration and hot-swap

pub mod capture;

mod controller;
mod track;

pub use capture::{
    CaptureBackend, CaptureError, CpalBackend, DeviceInfo, DeviceKind, FRAME_SIZE, SAMPLE_RATE,
};
pub use controller::{LocalMediaController, MediaConstraints, MediaError, TrackChange};
pub use track::{LocalTrack, TrackSource};
