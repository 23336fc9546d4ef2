use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::audio::{PcmRequest, tools};

#[derive(Parser, Debug)]
pub struct ProbeAudioCommand {
    /// ALSA device, e.g. hw:1,0
    #[arg(short = 'D', long)]
    pub device: String,

    #[arg(short, long, default_value = "44100")]
    pub rate: u32,

    #[arg(short, long, default_value = "1")]
    pub channels: u32,

    /// Seconds to read
    #[arg(short, long, default_value = "3")]
    pub duration: u32,
}

impl ProbeAudioCommand {
    pub async fn run(self) -> Result<()> {
        let request = PcmRequest {
            sample_rate: self.rate,
            channels: self.channels,
        };
        let device = self.device.clone();
        let report = tokio::task::spawn_blocking(move || {
            tools::probe(&device, request, self.duration)
        })
        .await
        .context("Probe task panicked")??;

        let params = report.negotiated;
        println!("Device:   {}", self.device);
        println!(
            "Format:   S16_LE, {} Hz, {} channel(s)",
            params.sample_rate, params.channels
        );
        println!(
            "Period:   {} frames, buffer {} frames",
            params.period_size, params.buffer_size
        );
        println!("Frames:   {}", report.frames);
        match report.peak_dbfs() {
            Some(db) => println!("Peak:     {} ({:.1} dBFS)", report.peak, db),
            None => println!("Peak:     0 (silence)"),
        }
        println!("Overruns: {}", report.overruns);
        Ok(())
    }
}

#[derive(Parser, Debug)]
pub struct RecordAudioCommand {
    #[arg(short = 'D', long)]
    pub device: String,

    /// Seconds to record
    #[arg(short, long, default_value = "5")]
    pub duration: u32,

    #[arg(short, long, default_value = "44100")]
    pub rate: u32,

    #[arg(short, long, default_value = "1")]
    pub channels: u32,

    /// Output WAV file
    pub output: PathBuf,
}

impl RecordAudioCommand {
    pub async fn run(self) -> Result<()> {
        let request = PcmRequest {
            sample_rate: self.rate,
            channels: self.channels,
        };
        let output = self.output.clone();
        let frames = tokio::task::spawn_blocking(move || {
            tools::record(&self.device, request, self.duration, &output)
        })
        .await
        .context("Record task panicked")??;

        println!("Wrote {} frames to {}", frames, self.output.display());
        Ok(())
    }
}

#[derive(Parser, Debug)]
pub struct PlayAudioCommand {
    #[arg(short = 'D', long)]
    pub device: String,

    /// PCM S16_LE WAV file
    pub input: PathBuf,
}

impl PlayAudioCommand {
    pub async fn run(self) -> Result<()> {
        let frames = tokio::task::spawn_blocking(move || tools::play(&self.device, &self.input))
            .await
            .context("Playback task panicked")??;
        println!("Played {} frames", frames);
        Ok(())
    }
}
