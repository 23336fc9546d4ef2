//! Operator checks for the sound card, replacing `arecord`/`aplay` inside
//! the container.

use std::path::Path;

use anyhow::{Context, Result};

use super::alsa_device::{self, Negotiated, PcmRequest};
use super::wav::{self, WavSpec, WavWriter};

#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub negotiated: Negotiated,
    pub frames: usize,
    /// Absolute peak, 0..=32767
    pub peak: u16,
    pub overruns: u32,
}

impl ProbeReport {
    /// Peak level in dBFS, `None` for digital silence.
    pub fn peak_dbfs(&self) -> Option<f64> {
        (self.peak > 0).then(|| 20.0 * (self.peak as f64 / i16::MAX as f64).log10())
    }
}

pub fn peak_level(samples: &[i16]) -> u16 {
    samples
        .iter()
        .map(|s| s.saturating_abs() as u16)
        .max()
        .unwrap_or(0)
}

/// Read from the device and throw the data away, like
/// `arecord -D <dev> -f S16_LE -r <rate> -vv /dev/null`.
pub fn probe(device: &str, request: PcmRequest, seconds: u32) -> Result<ProbeReport> {
    let (pcm, params) = alsa_device::open_capture(device, request)?;
    let io = pcm.io_i16()?;
    let channels = params.channels as usize;
    let target = params.sample_rate as usize * seconds as usize;

    let mut buf = vec![0i16; params.period_size * channels];
    let mut frames = 0;
    let mut peak = 0;
    let mut overruns = 0;

    while frames < target {
        match io.readi(&mut buf) {
            Ok(n) => {
                peak = peak.max(peak_level(&buf[..n * channels]));
                frames += n;
            }
            Err(e) => {
                overruns += 1;
                log::warn!("overrun!!! ({})", e);
                pcm.prepare().context("Failed to recover PCM capture")?;
            }
        }
    }

    Ok(ProbeReport {
        negotiated: params,
        frames,
        peak,
        overruns,
    })
}

/// Record `seconds` of audio to a WAV file, like `arecord -d <s> -f S16_LE out.wav`.
/// Returns the number of frames written.
pub fn record(device: &str, request: PcmRequest, seconds: u32, path: &Path) -> Result<u32> {
    let (pcm, params) = alsa_device::open_capture(device, request)?;
    let io = pcm.io_i16()?;
    let channels = params.channels as usize;
    let target = params.sample_rate as usize * seconds as usize;

    let mut writer = WavWriter::create(
        path,
        WavSpec {
            sample_rate: params.sample_rate,
            channels: params.channels as u16,
        },
    )?;
    let mut buf = vec![0i16; params.period_size * channels];
    let mut frames = 0;

    log::info!("Recording WAVE '{}' for {}s", path.display(), seconds);
    while frames < target {
        match io.readi(&mut buf) {
            Ok(n) => {
                let n = n.min(target - frames);
                writer.write_samples(&buf[..n * channels])?;
                frames += n;
            }
            Err(e) => {
                log::warn!("overrun!!! ({})", e);
                pcm.prepare().context("Failed to recover PCM capture")?;
            }
        }
    }

    let written = writer.frames();
    writer.finish()?;
    Ok(written)
}

/// Play a PCM S16LE WAV file, like `aplay -D <dev> file.wav`.
pub fn play(device: &str, path: &Path) -> Result<usize> {
    let (spec, samples) = wav::read_wav(path)?;
    let (pcm, params) = alsa_device::open_playback(
        device,
        PcmRequest {
            sample_rate: spec.sample_rate,
            channels: spec.channels as u32,
        },
    )?;
    let io = pcm.io_i16()?;
    let channels = params.channels as usize;
    let total_frames = samples.len() / channels;

    log::info!(
        "Playing WAVE '{}': Signed 16 bit Little Endian, Rate {} Hz, Channels {}",
        path.display(),
        spec.sample_rate,
        spec.channels
    );

    // 短写和 XRUN 恢复后继续写剩余帧
    let mut frames_written = 0;
    while frames_written < total_frames {
        let offset = frames_written * channels;
        match io.writei(&samples[offset..total_frames * channels]) {
            Ok(n) => frames_written += n,
            Err(e) => {
                log::warn!("underrun!!! ({})", e);
                pcm.prepare().context("Failed to recover PCM playback")?;
            }
        }
    }
    pcm.drain()?;
    Ok(frames_written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_handles_extremes() {
        assert_eq!(peak_level(&[]), 0);
        assert_eq!(peak_level(&[3, -7, 5]), 7);
        assert_eq!(peak_level(&[i16::MIN, 0]), 32767);
    }

    #[test]
    fn dbfs_of_full_scale_is_zero() {
        let report = ProbeReport {
            negotiated: Negotiated {
                sample_rate: 44100,
                channels: 1,
                period_size: 940,
                buffer_size: 3760,
            },
            frames: 44100,
            peak: 32767,
            overruns: 0,
        };
        assert!(report.peak_dbfs().unwrap().abs() < 1e-9);

        let silent = ProbeReport { peak: 0, ..report };
        assert!(silent.peak_dbfs().is_none());
    }
}
