use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pipeline-play", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Control loop period in milliseconds
    #[arg(long, default_value_t = 20)]
    pub tick_ms: u64,

    /// Audio buffered before playback starts, in milliseconds
    #[arg(long, default_value_t = 250)]
    pub prebuffer_ms: u64,

    /// Packet queue capacity (demux -> decode)
    #[arg(long, default_value_t = 64)]
    pub packet_queue: usize,

    /// Decoded frame queue capacity (decode -> output)
    #[arg(long, default_value_t = 32)]
    pub frame_queue: usize,

    /// Max frames handed to the device per tick
    #[arg(long, default_value_t = 4096)]
    pub max_write_frames: usize,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long, default_value_t = 1024)]
    pub resample_chunk_frames: usize,

    /// Device-side buffer length in milliseconds
    #[arg(long, default_value_t = 200)]
    pub output_buffer_ms: u64,

    /// Initial volume percent
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub volume: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a local file
    Play {
        /// Path to audio file (FLAC, MP3, AAC, ALAC, WAV, AIFF, Vorbis)
        path: PathBuf,

        /// Print the final status snapshot as JSON
        #[arg(long)]
        status_json: bool,
    },
}
