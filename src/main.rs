use anyhow::Result;
use clap::Parser;

mod audio;
mod cli;
mod config;
mod ffmpeg;
mod ingest;
mod peer;
mod relay;
mod server;
mod ts;

#[tokio::main]
async fn main() -> Result<()> {
    // 默认 info 级别，RUST_LOG 可覆盖
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    cli::Args::parse().run().await
}
