//! Live microphone capture for the WebRTC audio track.
//!
//! Uses a dedicated OS thread (NOT a tokio task) for blocking ALSA reads.
//! Encoded Opus packets cross into async code over an mpsc channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Result, bail};
use bytes::Bytes;
use tokio::sync::mpsc;

use super::alsa_device::{self, Negotiated, PcmRequest};
use super::opus_codec::{FRAME_DURATION_MS, OpusEncoder};
use crate::config::AudioSettings;
use crate::relay::SampleSink;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub device: String,
    pub sample_rate: u32,
    pub channels: u32,
    pub opus_bitrate: i32,
}

impl From<&AudioSettings> for CaptureConfig {
    fn from(settings: &AudioSettings) -> Self {
        Self {
            device: settings.device.clone(),
            sample_rate: settings.sample_rate,
            channels: settings.channels,
            opus_bitrate: 64000,
        }
    }
}

pub struct AudioCapture {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    negotiated: Negotiated,
}

impl AudioCapture {
    /// Start capturing. Blocks until the device is open, so a missing or busy
    /// device is reported here instead of on the thread.
    pub fn start(config: CaptureConfig, opus_tx: mpsc::Sender<Bytes>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);

        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || {
                    if let Err(e) = capture_thread(&config, opus_tx, &running, ready_tx) {
                        log::error!("Capture thread error: {}", e);
                    }
                })?
        };

        match ready_rx.recv() {
            Ok(Ok(negotiated)) => Ok(Self {
                running,
                handle: Some(handle),
                negotiated,
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                bail!("Capture thread exited before opening the device")
            }
        }
    }

    pub fn negotiated(&self) -> Negotiated {
        self.negotiated
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(
    config: &CaptureConfig,
    opus_tx: mpsc::Sender<Bytes>,
    running: &AtomicBool,
    ready: SyncSender<Result<Negotiated>>,
) -> Result<()> {
    let request = PcmRequest {
        sample_rate: config.sample_rate,
        channels: config.channels,
    };
    let (pcm, params) = match alsa_device::open_capture(&config.device, request) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return Ok(());
        }
    };
    let mut encoder =
        match OpusEncoder::new(params.sample_rate, params.channels, config.opus_bitrate) {
            Ok(encoder) => encoder,
            Err(e) => {
                let _ = ready.send(Err(e));
                return Ok(());
            }
        };
    let _ = ready.send(Ok(params));

    let channels = params.channels as usize;
    let mut read_buf = vec![0i16; params.period_size * channels];
    let io = pcm.io_i16()?;

    log::info!(
        "Audio capture started: device={}, rate={}, ch={}, period={}",
        config.device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                for packet in encoder.encode(&read_buf[..frames * channels])? {
                    if opus_tx.blocking_send(Bytes::from(packet)).is_err() {
                        log::warn!("Opus receiver dropped, stopping capture");
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Audio capture stopped");
    Ok(())
}

/// Writes Opus packets to the audio track until the capture side closes.
pub async fn pump(mut rx: mpsc::Receiver<Bytes>, sink: Arc<dyn SampleSink>) -> u64 {
    let duration = Duration::from_millis(FRAME_DURATION_MS as u64);
    let mut written = 0;
    while let Some(packet) = rx.recv().await {
        match sink.push(packet, duration).await {
            Ok(()) => written += 1,
            Err(e) => log::warn!("Failed to write audio sample: {}", e),
        }
    }
    written
}
