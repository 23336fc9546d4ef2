use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::config::Config;
use crate::ffmpeg::FfmpegSupervisor;

#[derive(Parser, Debug, Default)]
pub struct PrintFfmpegCommand {
    /// TOML config file, overridden by environment variables
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl PrintFfmpegCommand {
    pub fn run(self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        println!("{}", FfmpegSupervisor::from_config(&config).command_line());
        Ok(())
    }
}
