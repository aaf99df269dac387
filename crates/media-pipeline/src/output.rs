//! Output stage: the abstract audio sink and its CPAL implementation.
//!
//! The feeder tick writes into an [`AudioSink`] up to its writable capacity. The CPAL
//! sink keeps a bounded sample ring that the device callback drains without blocking:
//! - pause means pause: the callback emits silence and leaves the ring untouched
//! - underruns are filled with silence and counted
//! - basic channel mapping (mono↔stereo, best-effort otherwise)
//! - `f32` is converted to the device sample format

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use cpal::traits::{DeviceTrait, StreamTrait};
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::device;
use crate::error::{PipelineError, Result};
use crate::types::PcmFormat;

/// Descriptive and counter data about an open sink.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SinkInfo {
    pub device: Option<String>,
    pub output_sample_format: Option<String>,
    pub buffer_size_frames: Option<u32>,
    pub underrun_frames: u64,
    pub underrun_events: u64,
}

/// Fixed-format PCM output with a bounded, queryable capacity.
///
/// Used only from the control thread. `write` must never block.
pub trait AudioSink {
    /// Format the sink accepts; fixed for the sink's lifetime.
    fn format(&self) -> PcmFormat;

    /// PCM frames that `write` will accept right now.
    fn writable_frames(&self) -> usize;

    /// Write interleaved samples; returns the number of PCM frames accepted.
    fn write(&mut self, samples: &[f32]) -> Result<usize>;

    /// PCM frames accepted but not yet played.
    fn queued_frames(&self) -> usize {
        0
    }

    fn pause(&mut self) -> Result<()> {
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    fn info(&self) -> SinkInfo {
        SinkInfo::default()
    }
}

/// Opens a sink for a given source format; called once per `open()`.
///
/// The returned sink may run at a different sample rate than `source`; the decoder then
/// resamples. Channel count must match `source`.
pub trait SinkFactory {
    fn open_sink(&mut self, source: &PcmFormat, config: &PipelineConfig) -> Result<Box<dyn AudioSink>>;
}

/// Ring capacity in samples for `(rate, channels, millis)`.
///
/// - If `millis` is zero, 200 ms is used.
/// - The result is `ceil(rate * millis / 1000) * channels` (saturating).
pub fn ring_capacity_samples(rate_hz: u32, channels: usize, millis: u64) -> usize {
    let millis = if millis == 0 { 200 } else { millis };
    let frames = (u64::from(rate_hz) * millis).div_ceil(1000) as usize;
    frames.saturating_mul(channels)
}

/// Bounded interleaved sample FIFO shared with the device callback.
pub struct SampleRing {
    channels: usize,
    capacity_samples: usize,
    samples: Mutex<VecDeque<f32>>,
}

impl SampleRing {
    pub fn new(channels: usize, capacity_samples: usize) -> Self {
        let channels = channels.max(1);
        let capacity_samples = capacity_samples.max(channels);
        Self {
            channels,
            capacity_samples,
            samples: Mutex::new(VecDeque::with_capacity(capacity_samples)),
        }
    }

    /// Append as many whole frames as fit; returns frames accepted.
    pub fn push(&self, interleaved: &[f32]) -> usize {
        let mut g = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let free_frames = (self.capacity_samples - g.len()) / self.channels;
        let take = (interleaved.len() / self.channels).min(free_frames);
        g.extend(&interleaved[..take * self.channels]);
        take
    }

    /// Move up to `max_samples` into `out` without waiting.
    pub fn pop_into(&self, out: &mut Vec<f32>, max_samples: usize) -> usize {
        let mut g = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let take = g.len().min(max_samples);
        out.extend(g.drain(..take));
        take
    }

    pub fn free_frames(&self) -> usize {
        let g = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        (self.capacity_samples - g.len()) / self.channels
    }

    pub fn len_frames(&self) -> usize {
        let g = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        g.len() / self.channels
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

/// Counters and flags shared between a [`CpalSink`] and its callback.
#[derive(Default)]
struct CallbackShared {
    paused: AtomicBool,
    failed: AtomicBool,
    underrun_frames: AtomicU64,
    underrun_events: AtomicU64,
}

/// [`AudioSink`] playing through a CPAL output stream.
pub struct CpalSink {
    _stream: cpal::Stream,
    ring: Arc<SampleRing>,
    shared: Arc<CallbackShared>,
    format: PcmFormat,
    device_name: String,
    sample_format: cpal::SampleFormat,
    buffer_size_frames: Option<u32>,
}

impl AudioSink for CpalSink {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn writable_frames(&self) -> usize {
        self.ring.free_frames()
    }

    fn write(&mut self, samples: &[f32]) -> Result<usize> {
        if self.shared.failed.load(Ordering::Relaxed) {
            return Err(PipelineError::Output(format!(
                "output stream on {} failed",
                self.device_name
            )));
        }
        Ok(self.ring.push(samples))
    }

    fn queued_frames(&self) -> usize {
        self.ring.len_frames()
    }

    fn pause(&mut self) -> Result<()> {
        self.shared.paused.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.shared.paused.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn info(&self) -> SinkInfo {
        SinkInfo {
            device: Some(self.device_name.clone()),
            output_sample_format: Some(format!("{:?}", self.sample_format)),
            buffer_size_frames: self.buffer_size_frames,
            underrun_frames: self.shared.underrun_frames.load(Ordering::Relaxed),
            underrun_events: self.shared.underrun_events.load(Ordering::Relaxed),
        }
    }
}

/// Opens [`CpalSink`]s on the default host.
#[derive(Clone, Debug, Default)]
pub struct CpalSinkFactory {
    /// Case-insensitive substring of the output device name; `None` uses the default device.
    pub device: Option<String>,
}

impl CpalSinkFactory {
    pub fn new(device: Option<String>) -> Self {
        Self {
            device: device::normalize_device_name(device),
        }
    }
}

impl SinkFactory for CpalSinkFactory {
    fn open_sink(&mut self, source: &PcmFormat, config: &PipelineConfig) -> Result<Box<dyn AudioSink>> {
        let to_output = |e: anyhow::Error| PipelineError::Output(format!("{e:#}"));

        let host = cpal::default_host();
        let device = device::pick_device(&host, self.device.as_deref()).map_err(to_output)?;
        let supported =
            device::pick_output_config(&device, Some(source.sample_rate)).map_err(to_output)?;
        let mut stream_config: cpal::StreamConfig = supported.clone().into();
        if let Some(buf) = device::pick_buffer_size(&supported) {
            stream_config.buffer_size = buf;
        }
        let device_name = device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        tracing::info!(
            device = %device_name,
            source_rate_hz = source.sample_rate,
            output_rate_hz = stream_config.sample_rate,
            buffer_size = ?stream_config.buffer_size,
            "device output config"
        );

        let channels = source.channel_count();
        let ring = Arc::new(SampleRing::new(
            channels,
            ring_capacity_samples(stream_config.sample_rate, channels, config.output_buffer_ms),
        ));
        let shared = Arc::new(CallbackShared::default());

        let stream = build_output_stream(
            &device,
            &stream_config,
            supported.sample_format(),
            ring.clone(),
            shared.clone(),
        )
        .map_err(to_output)?;
        stream
            .play()
            .map_err(|e| PipelineError::Output(format!("start stream: {e}")))?;

        Ok(Box::new(CpalSink {
            _stream: stream,
            ring,
            shared,
            format: PcmFormat::new(stream_config.sample_rate, source.channels)
                .with_bits(source.bits_per_sample),
            device_name,
            sample_format: supported.sample_format(),
            buffer_size_frames: match stream_config.buffer_size {
                cpal::BufferSize::Fixed(frames) => Some(frames),
                cpal::BufferSize::Default => None,
            },
        }))
    }
}

/// Build a CPAL output stream draining `ring`.
///
/// Dispatches on the device sample format.
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    ring: Arc<SampleRing>,
    shared: Arc<CallbackShared>,
) -> anyhow::Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, ring, shared),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, ring, shared),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, ring, shared),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, ring, shared),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
///
/// The callback never waits on a condition variable; it takes the ring lock once per
/// refill and fills any shortfall with silence.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: Arc<SampleRing>,
    shared: Arc<CallbackShared>,
) -> anyhow::Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let src_channels = ring.channels();
    let mut scratch: Vec<f32> = Vec::new();

    let shared_err = shared.clone();
    let err_fn = move |err| {
        tracing::warn!("stream error: {err}");
        shared_err.failed.store(true, Ordering::Relaxed);
    };

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
            if shared.paused.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }

            let frames = data.len() / channels_out;
            scratch.clear();
            ring.pop_into(&mut scratch, frames * src_channels);
            let got_frames = scratch.len() / src_channels;

            for frame in 0..got_frames {
                let src = &scratch[frame * src_channels..(frame + 1) * src_channels];
                for ch in 0..channels_out {
                    data[frame * channels_out + ch] =
                        <T as cpal::Sample>::from_sample::<f32>(map_channel(src, channels_out, ch));
                }
            }

            if got_frames < frames {
                data[got_frames * channels_out..].fill(silence);
                shared.underrun_events.fetch_add(1, Ordering::Relaxed);
                shared
                    .underrun_frames
                    .fetch_add((frames - got_frames) as u64, Ordering::Relaxed);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Output sample for `dst_ch` from one interleaved source frame.
///
/// Mapping rules:
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - equal counts: pass-through
/// - other layouts: clamp to the last available channel
fn map_channel(src: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    let get = |ch: usize| src.get(ch).copied().unwrap_or(0.0);
    match (src.len(), dst_channels) {
        (2, 1) => 0.5 * (get(0) + get(1)),
        (1, _) => get(0),
        (n, m) if n == m => get(dst_ch),
        (n, _) => get(dst_ch.min(n.saturating_sub(1))),
    }
}
