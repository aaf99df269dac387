//! Concurrent audio playback pipeline.
//!
//! A demux thread and a decode thread connected by bounded queues feed an
//! [`AudioBuffer`]; [`Player::tick`] moves buffered audio into an [`AudioSink`] on the
//! caller's thread.

pub mod buffer;
pub mod config;
pub mod decode;
pub mod demux;
pub mod device;
pub mod error;
pub mod events;
pub mod feeder;
pub mod output;
pub mod pipeline;
pub mod queue;
pub mod resample;
pub mod status;
pub mod types;

pub use buffer::AudioBuffer;
pub use config::PipelineConfig;
pub use decode::FrameDecoder;
pub use demux::{OpenedMedia, PacketSource};
pub use error::{PipelineError, QueueAborted, Result};
pub use events::{PlaybackEndReason, PlayerEvent, Stage};
pub use feeder::{FeedOutcome, PlaybackFeeder, Volume};
pub use output::{AudioSink, CpalSinkFactory, SinkFactory, SinkInfo};
pub use pipeline::{Player, PlayerState};
pub use queue::BoundedQueue;
pub use status::PlayerStatus;
pub use types::{Frame, Packet, PacketMessage, PcmFormat, StreamInfo};
