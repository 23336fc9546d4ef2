use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use tokio::sync::{mpsc, watch};

use crate::audio::{AudioCapture, CaptureConfig, pump};
use crate::config::Config;
use crate::ffmpeg::FfmpegSupervisor;
use crate::ingest::TsIngest;
use crate::peer::PeerRegistry;
use crate::relay::{MediaRelay, SampleSink};

#[derive(Parser, Debug, Default)]
pub struct ServeCommand {
    /// TOML config file, overridden by environment variables
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl ServeCommand {
    pub async fn run(self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        config.ensure_dirs()?;
        log::info!(
            "Input {} -> HLS {}, UDP 127.0.0.1:{}",
            config.input,
            config.hls_playlist().display(),
            config.udp_port
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // 编码一次，HLS 与 WebRTC 共用
        let ffmpeg_handle = tokio::spawn(
            FfmpegSupervisor::from_config(&config).run(shutdown_rx.clone()),
        );

        // 等 ffmpeg 起来再开始收 UDP
        tokio::time::sleep(Duration::from_secs(config.startup_delay_secs)).await;

        let capture = start_audio(&config).await;
        let relay = Arc::new(MediaRelay::new(true, capture.is_some()));

        let ingest = TsIngest::bind(config.udp_port).await?;
        let video: Arc<dyn SampleSink> = relay.video().context("Video track missing")?;
        let ingest_handle = {
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = ingest.run(video, shutdown_rx).await {
                    log::error!("MPEG-TS ingest error: {}", e);
                }
            })
        };

        let (capture, pump_handle) = match (capture, relay.audio()) {
            (Some((capture, opus_rx)), Some(track)) => {
                let sink: Arc<dyn SampleSink> = track;
                (Some(capture), Some(tokio::spawn(pump(opus_rx, sink))))
            }
            _ => (None, None),
        };

        let peers = Arc::new(PeerRegistry::new(relay.clone(), &config.stun_urls)?);
        let mut server_handle = {
            let peers = peers.clone();
            let bind = config.http_bind;
            let hls_dir = config.hls_dir.clone();
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                crate::server::run_server(bind, peers, &hls_dir, shutdown_rx).await
            })
        };

        let server_finished = tokio::select! {
            _ = shutdown_signal() => false,
            res = &mut server_handle => {
                match res {
                    Ok(Ok(())) => log::warn!("Signaling server exited"),
                    Ok(Err(e)) => log::error!("Signaling server error: {}", e),
                    Err(e) => log::error!("Signaling server task failed: {}", e),
                }
                true
            }
        };

        log::info!("Shutting down");
        let _ = shutdown_tx.send(true);

        if !server_finished {
            match server_handle.await {
                Ok(Err(e)) => log::error!("Signaling server error: {}", e),
                Err(e) => log::error!("Signaling server task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
        peers.close_all().await;

        let _ = ingest_handle.await;
        if let Ok(launches) = ffmpeg_handle.await {
            log::info!("ffmpeg supervisor stopped after {} launch(es)", launches);
        }

        if let Some(mut capture) = capture {
            // join 会阻塞到当前 period 读完
            let _ = tokio::task::spawn_blocking(move || capture.stop()).await;
        }
        if let Some(handle) = pump_handle {
            if let Ok(written) = handle.await {
                log::info!("Audio pump stopped after {} packets", written);
            }
        }

        log::info!("Shutdown complete");
        Ok(())
    }
}

/// Start ALSA capture when a device is configured. Any failure only
/// disables the audio track.
async fn start_audio(config: &Config) -> Option<(AudioCapture, mpsc::Receiver<Bytes>)> {
    if !config.audio.enabled() {
        log::info!("AUDIO_DEVICE not set, streaming video only");
        return None;
    }

    let capture_config = CaptureConfig::from(&config.audio);
    let (opus_tx, opus_rx) = mpsc::channel(64);
    let started =
        tokio::task::spawn_blocking(move || AudioCapture::start(capture_config, opus_tx)).await;

    match started {
        Ok(Ok(capture)) => {
            let params = capture.negotiated();
            log::info!(
                "Audio track enabled: {} at {} Hz, {} channel(s)",
                config.audio.device,
                params.sample_rate,
                params.channels
            );
            Some((capture, opus_rx))
        }
        Ok(Err(e)) => {
            log::warn!("Audio capture unavailable ({}), streaming video only", e);
            None
        }
        Err(e) => {
            log::warn!("Audio capture task failed ({}), streaming video only", e);
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
