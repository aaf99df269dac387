//! Periodic feeder moving ready audio from the [`AudioBuffer`] into the sink.
//!
//! Runs on the control thread. A tick never waits: it copies at most what the sink can
//! take right now and returns.

use crate::buffer::AudioBuffer;
use crate::error::{QueueAborted, Result};
use crate::output::AudioSink;

/// User-facing volume (percent) and mute state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Volume {
    percent: u8,
    muted: bool,
}

impl Volume {
    pub fn new(percent: u8, muted: bool) -> Self {
        Self {
            percent: percent.min(100),
            muted,
        }
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn set_percent(&mut self, percent: u8) {
        self.percent = percent.min(100);
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Linear gain applied to samples.
    pub fn gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            f32::from(self.percent) / 100.0
        }
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::new(100, false)
    }
}

/// Result of one feeder tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedOutcome {
    /// PCM frames handed to the sink.
    Wrote(usize),
    /// Nothing ready, or the sink is full; try again next tick.
    Idle,
    /// Buffer drained after end of stream; waiting for the sink to play out.
    Draining,
    /// The last frame has been played. Reported exactly once.
    EndOfPlayback,
    /// End of playback was already reported.
    Finished,
}

pub struct PlaybackFeeder {
    /// Samples read from the buffer (gain applied) that the sink has not taken yet.
    pending: Vec<f32>,
    max_write_frames: usize,
    written_frames: u64,
    finished: bool,
}

impl PlaybackFeeder {
    pub fn new(max_write_frames: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_write_frames: max_write_frames.max(1),
            written_frames: 0,
            finished: false,
        }
    }

    /// PCM frames written to the sink so far.
    pub fn written_frames(&self) -> u64 {
        self.written_frames
    }

    /// Move ready samples into `sink`, applying `volume`.
    ///
    /// Samples the sink does not accept are kept and offered first on the next tick,
    /// so a short write never loses audio and end of playback waits for them.
    ///
    /// Errors: `Aborted` once the buffer has been aborted (nothing is written), or the
    /// sink's own write failure.
    pub fn tick(
        &mut self,
        buffer: &AudioBuffer,
        sink: &mut dyn AudioSink,
        volume: Volume,
    ) -> Result<FeedOutcome> {
        if self.finished {
            return Ok(FeedOutcome::Finished);
        }
        if buffer.is_aborted() {
            return Err(QueueAborted.into());
        }

        let writable = sink.writable_frames().min(self.max_write_frames);
        if writable > 0 {
            let channels = buffer.format().channel_count();
            if self.pending.is_empty() {
                let read = buffer.read_into(&mut self.pending, writable)?;
                let gain = volume.gain();
                if read > 0 && gain != 1.0 {
                    self.pending.iter_mut().for_each(|s| *s *= gain);
                }
            }

            let offered = (self.pending.len() / channels).min(writable);
            if offered > 0 {
                let accepted = sink.write(&self.pending[..offered * channels])?.min(offered);
                if accepted < offered {
                    tracing::debug!(offered, accepted, "short sink write, holding the rest");
                }
                self.pending.drain(..accepted * channels);
                self.written_frames += accepted as u64;
                if accepted == 0 {
                    return Ok(FeedOutcome::Idle);
                }
                return Ok(FeedOutcome::Wrote(accepted));
            }
        } else if !self.pending.is_empty() || buffer.buffered_frames() > 0 {
            return Ok(FeedOutcome::Idle);
        }

        if self.pending.is_empty() && buffer.is_drained() {
            if sink.queued_frames() > 0 {
                return Ok(FeedOutcome::Draining);
            }
            self.finished = true;
            return Ok(FeedOutcome::EndOfPlayback);
        }
        Ok(FeedOutcome::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::types::{Frame, PcmFormat};
    use std::time::Duration;

    struct VecSink {
        capacity: usize,
        queued: usize,
        written: Vec<f32>,
    }

    impl AudioSink for VecSink {
        fn format(&self) -> PcmFormat {
            PcmFormat::new(1_000, 1)
        }
        fn writable_frames(&self) -> usize {
            self.capacity
        }
        fn write(&mut self, samples: &[f32]) -> Result<usize> {
            self.written.extend_from_slice(samples);
            Ok(samples.len())
        }
        fn queued_frames(&self) -> usize {
            self.queued
        }
    }

    fn sink(capacity: usize) -> VecSink {
        VecSink {
            capacity,
            queued: 0,
            written: Vec::new(),
        }
    }

    fn buffer_with(samples: Vec<f32>) -> AudioBuffer {
        let buf = AudioBuffer::new(PcmFormat::new(1_000, 1), 8);
        buf.push_frame(Frame {
            pts: Duration::ZERO,
            format: PcmFormat::new(1_000, 1),
            samples,
        })
        .unwrap();
        buf
    }

    #[test]
    fn writes_at_most_sink_capacity() {
        let buf = buffer_with(vec![1.0; 10]);
        let mut s = sink(4);
        let mut feeder = PlaybackFeeder::new(1024);
        assert_eq!(
            feeder.tick(&buf, &mut s, Volume::default()).unwrap(),
            FeedOutcome::Wrote(4)
        );
        assert_eq!(s.written.len(), 4);
        assert_eq!(buf.buffered_frames(), 6);
    }

    #[test]
    fn respects_max_write_frames() {
        let buf = buffer_with(vec![1.0; 10]);
        let mut s = sink(100);
        let mut feeder = PlaybackFeeder::new(3);
        assert_eq!(
            feeder.tick(&buf, &mut s, Volume::default()).unwrap(),
            FeedOutcome::Wrote(3)
        );
    }

    #[test]
    fn applies_gain_and_mute() {
        let buf = buffer_with(vec![1.0; 4]);
        let mut s = sink(2);
        let mut feeder = PlaybackFeeder::new(16);
        feeder.tick(&buf, &mut s, Volume::new(50, false)).unwrap();
        feeder.tick(&buf, &mut s, Volume::new(50, true)).unwrap();
        assert_eq!(s.written, vec![0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn idle_when_nothing_ready_and_not_finished() {
        let buf = AudioBuffer::new(PcmFormat::new(1_000, 1), 8);
        let mut s = sink(16);
        let mut feeder = PlaybackFeeder::new(16);
        assert_eq!(
            feeder.tick(&buf, &mut s, Volume::default()).unwrap(),
            FeedOutcome::Idle
        );
    }

    #[test]
    fn end_of_playback_reported_once_after_sink_drains() {
        let buf = buffer_with(vec![1.0; 2]);
        buf.mark_end_of_stream();
        let mut s = sink(16);
        let mut feeder = PlaybackFeeder::new(16);

        assert_eq!(
            feeder.tick(&buf, &mut s, Volume::default()).unwrap(),
            FeedOutcome::Wrote(2)
        );
        s.queued = 2;
        assert_eq!(
            feeder.tick(&buf, &mut s, Volume::default()).unwrap(),
            FeedOutcome::Draining
        );
        s.queued = 0;
        assert_eq!(
            feeder.tick(&buf, &mut s, Volume::default()).unwrap(),
            FeedOutcome::EndOfPlayback
        );
        assert_eq!(
            feeder.tick(&buf, &mut s, Volume::default()).unwrap(),
            FeedOutcome::Finished
        );
        assert_eq!(feeder.written_frames(), 2);
    }

    /// Takes at most half (rounded up) of every write, or nothing when `stalled`.
    struct ShortWriteSink {
        stalled: bool,
        written: Vec<f32>,
    }

    impl AudioSink for ShortWriteSink {
        fn format(&self) -> PcmFormat {
            PcmFormat::new(1_000, 1)
        }
        fn writable_frames(&self) -> usize {
            64
        }
        fn write(&mut self, samples: &[f32]) -> Result<usize> {
            if self.stalled {
                return Ok(0);
            }
            let take = samples.len().div_ceil(2);
            self.written.extend_from_slice(&samples[..take]);
            Ok(take)
        }
    }

    #[test]
    fn short_writes_keep_the_tail_for_later_ticks() {
        let expected: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let buf = buffer_with(expected.clone());
        buf.mark_end_of_stream();
        let mut s = ShortWriteSink {
            stalled: true,
            written: Vec::new(),
        };
        let mut feeder = PlaybackFeeder::new(16);

        // Nothing accepted: the samples already pulled from the buffer are held.
        assert_eq!(
            feeder.tick(&buf, &mut s, Volume::default()).unwrap(),
            FeedOutcome::Idle
        );
        assert!(buf.is_drained());
        assert_eq!(feeder.written_frames(), 0);

        s.stalled = false;
        let mut outcomes = Vec::new();
        loop {
            let outcome = feeder.tick(&buf, &mut s, Volume::default()).unwrap();
            outcomes.push(outcome);
            if outcome == FeedOutcome::EndOfPlayback || outcomes.len() > 20 {
                break;
            }
        }
        assert_eq!(
            outcomes,
            vec![
                FeedOutcome::Wrote(5),
                FeedOutcome::Wrote(3),
                FeedOutcome::Wrote(1),
                FeedOutcome::Wrote(1),
                FeedOutcome::EndOfPlayback,
            ]
        );
        assert_eq!(s.written, expected);
        assert_eq!(feeder.written_frames(), 10);
    }

    #[test]
    fn aborted_buffer_writes_nothing() {
        let buf = buffer_with(vec![1.0; 4]);
        buf.abort();
        let mut s = sink(16);
        let mut feeder = PlaybackFeeder::new(16);
        let err = feeder.tick(&buf, &mut s, Volume::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Aborted(_)));
        assert!(s.written.is_empty());
    }

    #[test]
    fn volume_clamps_percent() {
        let mut v = Volume::new(150, false);
        assert_eq!(v.percent(), 100);
        v.set_percent(30);
        assert!((v.gain() - 0.3).abs() < 1e-6);
    }
}
