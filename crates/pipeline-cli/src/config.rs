use std::path::PathBuf;

pub use media_pipeline::PipelineConfig;

use crate::cli::Args;

#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub path: PathBuf,
    pub device: Option<String>,
    pub status_json: bool,
    pub pipeline: PipelineConfig,
}

impl PlayConfig {
    pub fn from_args(args: &Args, path: PathBuf, status_json: bool) -> Self {
        Self {
            path,
            device: args.device.clone(),
            status_json,
            pipeline: pipeline_config(args),
        }
    }
}

/// Map command-line tuning flags onto the library config.
pub fn pipeline_config(args: &Args) -> PipelineConfig {
    PipelineConfig {
        packet_queue_len: args.packet_queue,
        frame_queue_len: args.frame_queue,
        prebuffer_ms: args.prebuffer_ms,
        tick_interval_ms: args.tick_ms,
        max_write_frames: args.max_write_frames,
        resample_chunk_frames: args.resample_chunk_frames,
        output_buffer_ms: args.output_buffer_ms,
        initial_volume: args.volume,
        ..PipelineConfig::default()
    }
    .normalized()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn flags_map_onto_pipeline_config() {
        let args = Args::try_parse_from([
            "pipeline-play",
            "--device",
            "usb",
            "--packet-queue",
            "8",
            "--frame-queue",
            "0",
            "--output-buffer-ms",
            "500",
            "play",
            "x.flac",
        ])
        .unwrap();
        let cfg = PlayConfig::from_args(&args, PathBuf::from("x.flac"), false);
        assert_eq!(cfg.device.as_deref(), Some("usb"));
        assert_eq!(cfg.pipeline.packet_queue_len, 8);
        assert_eq!(cfg.pipeline.frame_queue_len, 1);
        assert_eq!(cfg.pipeline.output_buffer_ms, 500);
        assert_eq!(cfg.pipeline.max_consecutive_decode_errors, 16);
    }
}
