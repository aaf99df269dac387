//! Units of data moving through the pipeline.
//!
//! [`Packet`]s flow from the demux thread to the decode thread; [`Frame`]s flow from the
//! decode thread to the feeder. Both are immutable once produced.

use std::time::Duration;

use serde::Serialize;
use symphonia::core::units::TimeBase;

/// PCM layout negotiated between the source and the output sink.
///
/// Samples are always carried as interleaved `f32`; `bits_per_sample` records the
/// source depth for display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: Option<u16>,
}

impl PcmFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: None,
        }
    }

    pub fn with_bits(mut self, bits: Option<u16>) -> Self {
        self.bits_per_sample = bits;
        self
    }

    pub fn channel_count(&self) -> usize {
        usize::from(self.channels.max(1))
    }

    /// Duration of `frames` PCM frames at this rate.
    pub fn frames_to_duration(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let rate = u64::from(self.sample_rate);
        let secs = frames / rate;
        let rem = frames % rate;
        Duration::from_secs(secs) + Duration::from_nanos(rem * 1_000_000_000 / rate)
    }
}

/// One compressed unit of the selected stream.
#[derive(Clone, Debug)]
pub struct Packet {
    /// Container track id the packet belongs to.
    pub stream_index: u32,
    /// Presentation timestamp in stream time-base units.
    pub pts: u64,
    /// Duration in stream time-base units.
    pub duration: u64,
    pub data: Box<[u8]>,
}

/// What travels through the packet queue.
#[derive(Debug)]
pub enum PacketMessage {
    Packet(Packet),
    /// No more packets will follow.
    EndOfStream,
}

/// Decoded PCM audio for one packet (or one resampler chunk).
#[derive(Clone, Debug)]
pub struct Frame {
    pub pts: Duration,
    pub format: PcmFormat,
    /// Interleaved samples; length is a multiple of `format.channels`.
    pub samples: Vec<f32>,
}

impl Frame {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channel_count()
    }

    pub fn duration(&self) -> Duration {
        self.format.frames_to_duration(self.frames() as u64)
    }
}

/// Facts gathered while probing a source.
#[derive(Clone, Debug)]
pub struct StreamInfo {
    pub stream_index: u32,
    pub format: PcmFormat,
    pub time_base: Option<TimeBase>,
    pub duration: Option<Duration>,
    pub codec: Option<String>,
    pub container: Option<String>,
    /// Offset the source was opened at.
    pub start: Duration,
}

impl StreamInfo {
    /// Convert a packet timestamp into wall time.
    ///
    /// Falls back to the sample rate when the container does not advertise a time base.
    pub fn pts_to_duration(&self, pts: u64) -> Duration {
        match self.time_base {
            Some(tb) => {
                let t = tb.calc_time(pts);
                Duration::from_secs(t.seconds) + Duration::from_secs_f64(t.frac)
            }
            None => self.format.frames_to_duration(pts),
        }
    }
}
