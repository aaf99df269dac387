use std::time::Duration;

/// Pipeline tuning parameters shared by the demux/decode/feed stages.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Packet queue capacity (demux → decode), in packets.
    pub packet_queue_len: usize,
    /// Frame sink capacity (decode → feeder), in decoded frames.
    pub frame_queue_len: usize,
    /// Buffered audio required before `Opening` becomes `Playing`.
    pub prebuffer_ms: u64,
    /// Period the embedder is expected to call `Player::tick` at.
    pub tick_interval_ms: u64,
    /// Max PCM frames moved to the sink per tick.
    pub max_write_frames: usize,
    /// Resampler input chunk size in frames.
    pub resample_chunk_frames: usize,
    /// Device-side sample ring length for the CPAL sink.
    pub output_buffer_ms: u64,
    /// Consecutive recoverable decode failures tolerated before giving up.
    pub max_consecutive_decode_errors: u32,
    /// Volume percent applied when a player is created.
    pub initial_volume: u8,
}

impl Default for PipelineConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            packet_queue_len: 64,
            frame_queue_len: 32,
            prebuffer_ms: 250,
            tick_interval_ms: 20,
            max_write_frames: 4096,
            resample_chunk_frames: 1024,
            output_buffer_ms: 200,
            max_consecutive_decode_errors: 16,
            initial_volume: 100,
        }
    }
}

impl PipelineConfig {
    /// Clamp values that would otherwise stall or spin the pipeline.
    pub fn normalized(mut self) -> Self {
        self.packet_queue_len = self.packet_queue_len.max(1);
        self.frame_queue_len = self.frame_queue_len.max(1);
        self.tick_interval_ms = self.tick_interval_ms.clamp(1, 1000);
        self.max_write_frames = self.max_write_frames.max(1);
        self.resample_chunk_frames = self.resample_chunk_frames.max(16);
        self.output_buffer_ms = self.output_buffer_ms.max(self.tick_interval_ms * 2);
        self.initial_volume = self.initial_volume.min(100);
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn prebuffer(&self) -> Duration {
        Duration::from_millis(self.prebuffer_ms)
    }
}
