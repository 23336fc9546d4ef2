//! audio - ALSA capture for the WebRTC audio track, plus the record/play
//! checks operators run against the sound card.
//!
//! Uses ALSA for audio I/O, Opus for encoding and SpeexDSP for resampling.

mod alsa_device;
mod capture;
mod opus_codec;
mod speex;
pub mod tools;
pub mod wav;

pub use alsa_device::PcmRequest;
pub use capture::{AudioCapture, CaptureConfig, pump};
