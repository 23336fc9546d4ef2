//! Minimal MPEG-TS demuxer for the local UDP leg of the ffmpeg tee.
//!
//! Only what the relay needs: PAT -> PMT -> first H.264 elementary stream,
//! reassembled into PES payloads (one access unit each for ffmpeg output).

mod demux;
mod packet;
mod pes;
mod psi;

pub use demux::{AccessUnit, TsDemuxer};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TsError {
    #[error("invalid packet size: {0}")]
    InvalidPacketSize(usize),
    #[error("invalid sync byte: {0:#04x}")]
    InvalidSyncByte(u8),
    #[error("insufficient data: expected {expected}, got {actual}")]
    InsufficientData { expected: usize, actual: usize },
    #[error("unexpected table id {actual:#04x}, expected {expected:#04x}")]
    UnexpectedTableId { expected: u8, actual: u8 },
    #[error("section CRC mismatch")]
    CrcMismatch,
    #[error("invalid PES start code")]
    InvalidPesStartCode,
}

pub type Result<T> = std::result::Result<T, TsError>;
