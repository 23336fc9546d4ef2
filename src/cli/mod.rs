use anyhow::Result;
use clap::{Parser, Subcommand};

mod audio;
mod print_ffmpeg;
mod serve;

pub use audio::{PlayAudioCommand, ProbeAudioCommand, RecordAudioCommand};
pub use print_ffmpeg::PrintFfmpegCommand;
pub use serve::ServeCommand;

#[derive(Parser, Debug)]
#[command(name = "video-streamer", version)]
#[command(about = "Camera or media input to HLS and WebRTC, encoded once by ffmpeg")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run ffmpeg, the WebRTC relay and the signaling server (default)
    Serve(ServeCommand),
    /// Print the ffmpeg command line the current configuration produces
    PrintFfmpeg(PrintFfmpegCommand),
    /// Read from an ALSA capture device and report levels
    ProbeAudio(ProbeAudioCommand),
    /// Record from an ALSA capture device to a WAV file
    RecordAudio(RecordAudioCommand),
    /// Play a WAV file on an ALSA playback device
    PlayAudio(PlayAudioCommand),
}

impl Args {
    pub async fn run(self) -> Result<()> {
        let command = self
            .command
            .unwrap_or(Command::Serve(ServeCommand::default()));

        match command {
            Command::Serve(cmd) => cmd.run().await,
            Command::PrintFfmpeg(cmd) => cmd.run(),
            Command::ProbeAudio(cmd) => cmd.run().await,
            Command::RecordAudio(cmd) => cmd.run().await,
            Command::PlayAudio(cmd) => cmd.run().await,
        }
    }
}
