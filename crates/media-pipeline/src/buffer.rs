//! Ready-to-play audio between the decode thread and the feeder tick.
//!
//! The producer side blocks on a bounded frame queue (backpressure for the decoder);
//! the consumer side only ever uses `try_pop`, so a feeder tick holds a lock for at
//! most the time it takes to copy one request's worth of samples.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::QueueAborted;
use crate::queue::BoundedQueue;
use crate::types::{Frame, PcmFormat};

/// Decoded frames waiting for the output device.
///
/// Frames are delivered in non-decreasing timestamp order: a frame whose `pts` is earlier
/// than the previously accepted one is dropped at push time.
pub struct AudioBuffer {
    format: PcmFormat,
    frames: BoundedQueue<Frame>,
    cursor: Mutex<ReadCursor>,
    buffered_frames: AtomicU64,
    consumed_frames: AtomicU64,
    dropped_frames: AtomicU64,
    /// Last accepted pts in nanoseconds, plus one (0 = nothing accepted yet).
    last_pts_ns: AtomicU64,
    end_of_stream: AtomicBool,
}

/// Partially consumed head frame, owned by the consumer.
#[derive(Default)]
struct ReadCursor {
    frame: Option<Frame>,
    offset: usize,
}

impl ReadCursor {
    fn remaining_frames(&self, channels: usize) -> usize {
        self.frame
            .as_ref()
            .map(|f| f.samples.len().saturating_sub(self.offset) / channels)
            .unwrap_or(0)
    }
}

impl AudioBuffer {
    /// `capacity` bounds the number of decoded frames held, not PCM frames.
    pub fn new(format: PcmFormat, capacity: usize) -> Self {
        Self {
            format,
            frames: BoundedQueue::new(capacity),
            cursor: Mutex::new(ReadCursor::default()),
            buffered_frames: AtomicU64::new(0),
            consumed_frames: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            last_pts_ns: AtomicU64::new(0),
            end_of_stream: AtomicBool::new(false),
        }
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Append a decoded frame, blocking while the buffer is full.
    ///
    /// Called from the decode thread only.
    pub fn push_frame(&self, frame: Frame) -> Result<(), QueueAborted> {
        if frame.samples.is_empty() {
            return Ok(());
        }

        let pts_ns = u64::try_from(frame.pts.as_nanos()).unwrap_or(u64::MAX - 1);
        let last = self.last_pts_ns.load(Ordering::Acquire);
        if last != 0 && pts_ns < last - 1 {
            tracing::warn!(
                pts_ms = frame.pts.as_millis() as u64,
                last_pts_ms = (last - 1) / 1_000_000,
                "dropping out-of-order frame"
            );
            self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        self.last_pts_ns.store(pts_ns + 1, Ordering::Release);

        let n = frame.frames() as u64;
        // Count before publishing so a concurrent read never subtracts more than was added.
        self.buffered_frames.fetch_add(n, Ordering::AcqRel);
        if let Err(e) = self.frames.push(frame) {
            self.buffered_frames.fetch_sub(n, Ordering::AcqRel);
            return Err(e);
        }
        Ok(())
    }

    /// Copy up to `max_frames` PCM frames into `out` without blocking.
    ///
    /// Returns the number of PCM frames appended (zero when nothing is ready).
    pub fn read_into(&self, out: &mut Vec<f32>, max_frames: usize) -> Result<usize, QueueAborted> {
        if self.frames.is_aborted() {
            return Err(QueueAborted);
        }

        let channels = self.format.channel_count();
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let mut copied = 0usize;

        while copied < max_frames {
            if cursor.frame.is_none() {
                match self.frames.try_pop()? {
                    Some(frame) => {
                        cursor.frame = Some(frame);
                        cursor.offset = 0;
                    }
                    None => break,
                }
            }

            let offset = cursor.offset;
            let Some(frame) = cursor.frame.as_ref() else {
                break;
            };
            let available = frame.samples.len().saturating_sub(offset) / channels;
            let take = available.min(max_frames - copied);
            let end = offset + take * channels;
            out.extend_from_slice(&frame.samples[offset..end]);
            let exhausted = take == available;
            copied += take;

            if exhausted {
                cursor.frame = None;
                cursor.offset = 0;
            } else {
                cursor.offset = end;
            }
        }
        drop(cursor);

        if copied > 0 {
            self.buffered_frames.fetch_sub(copied as u64, Ordering::AcqRel);
            self.consumed_frames.fetch_add(copied as u64, Ordering::AcqRel);
        }
        Ok(copied)
    }

    /// Producer has delivered its last frame.
    pub fn mark_end_of_stream(&self) {
        self.end_of_stream.store(true, Ordering::Release);
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream.load(Ordering::Acquire)
    }

    /// End of stream reached and every buffered frame handed to the feeder.
    pub fn is_drained(&self) -> bool {
        self.is_end_of_stream() && self.buffered_frames.load(Ordering::Acquire) == 0
    }

    /// Whether the frame sink is at capacity (the decoder is being held back).
    pub fn is_full(&self) -> bool {
        self.frames.is_full()
    }

    /// PCM frames decoded but not yet read by the feeder.
    pub fn buffered_frames(&self) -> u64 {
        self.buffered_frames.load(Ordering::Acquire)
    }

    pub fn buffered_duration(&self) -> Duration {
        self.format.frames_to_duration(self.buffered_frames())
    }

    /// PCM frames read by the feeder since creation.
    pub fn consumed_frames(&self) -> u64 {
        self.consumed_frames.load(Ordering::Acquire)
    }

    /// Frames rejected for going backwards in time.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Discard everything buffered; does not abort and keeps the end-of-stream flag.
    pub fn clear(&self) {
        let channels = self.format.channel_count();
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let mut discarded = cursor.remaining_frames(channels) as u64;
        cursor.frame = None;
        cursor.offset = 0;
        discarded += self
            .frames
            .drain()
            .iter()
            .map(|f| f.frames() as u64)
            .sum::<u64>();
        drop(cursor);
        self.buffered_frames.fetch_sub(discarded, Ordering::AcqRel);
    }

    /// Wake the producer and make every further push/read fail.
    pub fn abort(&self) {
        self.frames.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.frames.is_aborted()
    }
}
