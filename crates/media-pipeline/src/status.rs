//! Serializable snapshot of a [`Player`](crate::pipeline::Player).

use serde::Serialize;

use crate::events::PlaybackEndReason;
use crate::output::SinkInfo;
use crate::pipeline::PlayerState;
use crate::types::{PcmFormat, StreamInfo};

/// Point-in-time view of the player for UIs and `--status-json`.
///
/// Track fields are `None` while no pipeline is open.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PlayerStatus {
    pub state: PlayerState,
    /// Path or label of the open source.
    pub now_playing: Option<String>,
    pub elapsed_ms: u64,
    pub duration_ms: Option<u64>,
    /// Decoded audio waiting for the output device.
    pub buffered_ms: Option<u64>,
    pub source_codec: Option<String>,
    pub container: Option<String>,
    pub source_sample_rate: Option<u32>,
    pub source_bit_depth: Option<u16>,
    pub channels: Option<u16>,
    /// Rate the sink runs at; differs from the source rate while resampling.
    pub output_sample_rate: Option<u32>,
    pub resampling: Option<bool>,
    pub volume_percent: u8,
    pub muted: bool,
    /// Packets skipped since the player was created.
    pub decode_errors: u64,
    /// Frames dropped for going backwards in time.
    pub dropped_frames: Option<u64>,
    #[serde(flatten)]
    pub sink: SinkInfo,
    pub end_reason: Option<PlaybackEndReason>,
    pub last_error: Option<String>,
}

impl PlayerStatus {
    /// Fill the track-specific fields from the open source and sink format.
    pub(crate) fn with_track(mut self, info: &StreamInfo, output: PcmFormat) -> Self {
        self.duration_ms = info.duration.map(|d| d.as_millis() as u64);
        self.source_codec = info.codec.clone();
        self.container = info.container.clone();
        self.source_sample_rate = Some(info.format.sample_rate);
        self.source_bit_depth = info.format.bits_per_sample;
        self.channels = Some(info.format.channels);
        self.output_sample_rate = Some(output.sample_rate);
        self.resampling = Some(output.sample_rate != info.format.sample_rate);
        self
    }

    pub fn is_paused(&self) -> bool {
        self.state == PlayerState::Paused
    }
}
