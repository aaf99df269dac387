//! `pipeline-play`: play a local audio file through the concurrent demux/decode pipeline.
//!
//! ## Pipeline
//! 1. **Demux**: a background thread reads container packets into a bounded queue.
//! 2. **Decode**: a background thread decodes (and resamples if needed) into a bounded frame buffer.
//! 3. **Feed**: the main thread ticks every `--tick-ms` and hands ready audio to the CPAL device.

mod cli;
mod config;
mod runtime;

use anyhow::{Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,media_pipeline=info,pipeline_play=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    match &args.cmd {
        Some(cli::Command::Play { path, status_json }) => {
            let cfg = config::PlayConfig::from_args(&args, path.clone(), *status_json);
            runtime::run_play(cfg)
        }
        None => bail!("nothing to do: pass `play <path>` or `--list-devices`"),
    }
}
