//! Opus encoder for the WebRTC audio track.
//!
//! Capture PCM (any rate, any channel count) -> mono mix -> 48 kHz -> 20 ms
//! Opus packets. Input of any length is buffered until a full frame exists.

use super::speex::Resampler;
use anyhow::Result;

pub const OPUS_SAMPLE_RATE: u32 = 48000;
pub const FRAME_DURATION_MS: u32 = 20;
const FRAME_SAMPLES: usize = (OPUS_SAMPLE_RATE * FRAME_DURATION_MS / 1000) as usize;

pub struct OpusEncoder {
    encoder: opus::Encoder,
    resampler: Option<Resampler>,
    input_channels: u32,
    pending: Vec<i16>,
}

impl OpusEncoder {
    /// * `input_sample_rate` - Sample rate from ALSA capture (e.g. 44100)
    /// * `input_channels`    - Number of ALSA capture channels
    /// * `bitrate`           - Bitrate in bits/s (e.g. 64000)
    pub fn new(input_sample_rate: u32, input_channels: u32, bitrate: i32) -> Result<Self> {
        let mut encoder =
            opus::Encoder::new(OPUS_SAMPLE_RATE, opus::Channels::Mono, opus::Application::Audio)?;
        encoder.set_bitrate(opus::Bitrate::Bits(bitrate))?;

        let resampler = if input_sample_rate == OPUS_SAMPLE_RATE {
            None
        } else {
            Some(Resampler::new(1, input_sample_rate, OPUS_SAMPLE_RATE)?)
        };

        Ok(Self {
            encoder,
            resampler,
            input_channels: input_channels.max(1),
            pending: Vec::with_capacity(FRAME_SAMPLES * 2),
        })
    }

    /// Feed interleaved PCM, returning every complete Opus packet.
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<Vec<u8>>> {
        let mono = mix_to_mono(pcm, self.input_channels);

        match self.resampler.as_mut() {
            Some(resampler) => {
                let mut out = vec![0i16; resampler.max_output(mono.len())];
                let (_consumed, produced) = resampler.process_int(0, &mono, &mut out)?;
                self.pending.extend_from_slice(&out[..produced as usize]);
            }
            None => self.pending.extend_from_slice(&mono),
        }

        let mut packets = Vec::new();
        let mut opus_buf = vec![0u8; 4000];
        while self.pending.len() >= FRAME_SAMPLES {
            let len = self
                .encoder
                .encode(&self.pending[..FRAME_SAMPLES], &mut opus_buf)?;
            packets.push(opus_buf[..len].to_vec());
            self.pending.drain(..FRAME_SAMPLES);
        }
        Ok(packets)
    }
}

/// Average interleaved channels into one. A trailing partial frame is dropped.
pub fn mix_to_mono(pcm: &[i16], channels: u32) -> Vec<i16> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return pcm.to_vec();
    }
    pcm.chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|s| *s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_mix_averages_channels() {
        assert_eq!(mix_to_mono(&[100, 300, -200, 0, 7], 2), vec![200, -100]);
        assert_eq!(mix_to_mono(&[1, 2, 3], 1), vec![1, 2, 3]);
        assert_eq!(mix_to_mono(&[i16::MAX, i16::MAX], 2), vec![i16::MAX]);
    }

    #[test]
    fn native_rate_yields_one_packet_per_frame() {
        let mut encoder = OpusEncoder::new(48000, 1, 64000).unwrap();
        let packets = encoder.encode(&vec![0i16; FRAME_SAMPLES * 3 + 100]).unwrap();
        assert_eq!(packets.len(), 3);
        assert!(packets.iter().all(|p| !p.is_empty()));

        // 剩余的 100 个样本等待下一次输入
        let packets = encoder.encode(&vec![0i16; FRAME_SAMPLES - 100]).unwrap();
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn resampled_stereo_capture_produces_packets() {
        let mut encoder = OpusEncoder::new(44100, 2, 64000).unwrap();
        let mut total = 0;
        // 200ms @ 44.1kHz stereo, in 20ms chunks
        for _ in 0..10 {
            let chunk: Vec<i16> = (0..882 * 2).map(|i| ((i % 50) * 100) as i16).collect();
            total += encoder.encode(&chunk).unwrap().len();
        }
        assert!((8..=10).contains(&total), "got {total} packets");
    }
}
