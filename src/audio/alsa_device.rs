//! ALSA PCM helpers shared by the live capture thread and the CLI audio tools.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

/// Requested PCM layout. Always S16LE interleaved, as `arecord -f S16_LE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmRequest {
    pub sample_rate: u32,
    pub channels: u32,
}

/// Parameters negotiated with the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub sample_rate: u32,
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
    pub buffer_size: usize,
}

pub fn open_capture(device: &str, req: PcmRequest) -> Result<(PCM, Negotiated)> {
    open_pcm(device, Direction::Capture, req)
}

pub fn open_playback(device: &str, req: PcmRequest) -> Result<(PCM, Negotiated)> {
    open_pcm(device, Direction::Playback, req)
}

fn open_pcm(device: &str, direction: Direction, req: PcmRequest) -> Result<(PCM, Negotiated)> {
    let dir_name = match direction {
        Direction::Capture => "Capture",
        Direction::Playback => "Playback",
    };
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    {
        let hwp = HwParams::any(&pcm).context("Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)
            .with_context(|| format!("Device '{}' does not support S16_LE", device))?;
        hwp.set_channels(req.channels)
            .with_context(|| format!("Device '{}' does not support {} channels", device, req.channels))?;
        hwp.set_rate_near(req.sample_rate, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }

    let negotiated = {
        let hwp = pcm.hw_params_current()?;
        Negotiated {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
            buffer_size: hwp.get_buffer_size()? as usize,
        }
    };

    if negotiated.sample_rate != req.sample_rate {
        log::warn!(
            "ALSA {}: device={} rate {} not available, using {}",
            dir_name,
            device,
            req.sample_rate,
            negotiated.sample_rate
        );
    }
    log::info!(
        "ALSA {}: device={}, format=S16_LE, rate={}, channels={}, period_size={}, buffer_size={}",
        dir_name,
        device,
        negotiated.sample_rate,
        negotiated.channels,
        negotiated.period_size,
        negotiated.buffer_size,
    );

    Ok((pcm, negotiated))
}
