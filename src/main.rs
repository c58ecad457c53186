use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use screenrec::app::{self, RunOptions};
use screenrec::core::encoder::{Container, Quality};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Record for N seconds, then stop automatically
    #[arg(short, long)]
    duration: Option<u64>,

    /// Quality preset (maps to a fixed x264 CRF)
    #[arg(short, long, value_enum, default_value = "medium")]
    quality: Quality,

    /// Output container format
    #[arg(short, long, value_enum, default_value = "mp4")]
    format: Container,

    /// Disable audio capture
    #[arg(long)]
    no_audio: bool,

    /// Pick a window to record (xdotool)
    #[arg(short, long, conflicts_with = "select")]
    window: bool,

    /// Drag-select a screen region to record (slop)
    #[arg(short, long)]
    select: bool,

    /// Save recordings to this directory (remembered for next time)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Print the resolved audio capture source and exit
    #[arg(long)]
    probe_audio: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screenrec=info".into()),
        )
        .init();

    let args = Args::parse();

    app::run(RunOptions {
        quality: args.quality,
        format: args.format,
        no_audio: args.no_audio,
        window: args.window,
        select: args.select,
        duration: args.duration,
        output_dir: args.output_dir,
        probe_audio: args.probe_audio,
    })
    .await
}
