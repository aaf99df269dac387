//! Sample-rate conversion for decoded frames.
//!
//! Uses Rubato to convert interleaved `f32` audio from the source rate to the rate the
//! output sink was negotiated at. Runs inside the decode thread: decoded frames go in,
//! fixed-size resampled chunks come out, and the tail is flushed at end of stream.

use std::time::Duration;

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    calculate_cutoff, Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::error::{PipelineError, Result};
use crate::types::{Frame, PcmFormat};

/// Streaming resampler that re-chunks frames to a fixed input size.
///
/// Output timestamps are derived from the number of frames produced, offset by the
/// timestamp of the first input frame, so they never go backwards.
pub struct FrameResampler {
    resampler: Box<dyn Resampler<f32>>,
    channels: usize,
    chunk_frames: usize,
    out_format: PcmFormat,
    /// Input samples not yet forming a whole chunk.
    pending: Vec<f32>,
    out_interleaved: Vec<f32>,
    indexing: Indexing,
    first_pts: Option<Duration>,
    produced_frames: u64,
}

impl FrameResampler {
    /// Build a resampler converting `src` to `dst_rate` using `chunk_frames` input chunks.
    pub fn new(src: PcmFormat, dst_rate: u32, chunk_frames: usize) -> Result<Self> {
        let channels = src.channel_count();
        let chunk_frames = chunk_frames.max(1);
        if src.sample_rate == 0 || dst_rate == 0 {
            return Err(PipelineError::Fatal(format!(
                "cannot resample {} Hz -> {} Hz",
                src.sample_rate, dst_rate
            )));
        }

        let f_ratio = dst_rate as f64 / src.sample_rate as f64;

        let sinc_len = 128;
        let oversampling_factor = 256;
        let interpolation = SincInterpolationType::Cubic;
        let window = WindowFunction::BlackmanHarris2;
        let f_cutoff = calculate_cutoff(sinc_len, window);

        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff,
            interpolation,
            oversampling_factor,
            window,
        };

        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| PipelineError::Fatal(format!("resampler init: {e}")))?;

        // Room for one chunk at the maximum ratio, with headroom for the sinc delay line.
        let out_capacity_frames = (chunk_frames as f64 * f_ratio * 1.5).ceil() as usize + 64;

        Ok(Self {
            resampler: Box::new(resampler),
            channels,
            chunk_frames,
            out_format: PcmFormat::new(dst_rate, src.channels).with_bits(src.bits_per_sample),
            pending: Vec::with_capacity(chunk_frames * channels * 2),
            out_interleaved: vec![0.0; out_capacity_frames * channels],
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
            first_pts: None,
            produced_frames: 0,
        })
    }

    /// Feed one decoded frame; returns zero or more resampled frames.
    pub fn process(&mut self, frame: &Frame) -> Result<Vec<Frame>> {
        if self.first_pts.is_none() {
            self.first_pts = Some(frame.pts);
        }
        self.pending.extend_from_slice(&frame.samples);

        let chunk_samples = self.chunk_frames * self.channels;
        let mut out = Vec::new();
        let mut consumed = 0usize;
        while self.pending.len() - consumed >= chunk_samples {
            let chunk = self.pending[consumed..consumed + chunk_samples].to_vec();
            consumed += chunk_samples;
            if let Some(f) = self.run_chunk(&chunk, None)? {
                out.push(f);
            }
        }
        self.pending.drain(..consumed);
        Ok(out)
    }

    /// Resample whatever is left over as a final partial chunk.
    pub fn flush(&mut self) -> Result<Option<Frame>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let tail_frames = self.pending.len() / self.channels;
        let mut chunk = std::mem::take(&mut self.pending);
        chunk.resize(self.chunk_frames * self.channels, 0.0);
        self.run_chunk(&chunk, Some(tail_frames.min(self.chunk_frames)))
    }

    fn run_chunk(&mut self, interleaved: &[f32], partial_len: Option<usize>) -> Result<Option<Frame>> {
        let input_adapter = InterleavedSlice::new(interleaved, self.channels, self.chunk_frames)
            .map_err(|e| PipelineError::Fatal(format!("interleaved slice (input): {e}")))?;

        let out_capacity_frames = self.out_interleaved.len() / self.channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.out_interleaved, self.channels, out_capacity_frames)
                .map_err(|e| PipelineError::Fatal(format!("interleaved slice (output): {e}")))?;

        self.indexing.input_offset = 0;
        self.indexing.output_offset = 0;
        self.indexing.partial_len = partial_len;

        let (_nbr_in, nbr_out) = self
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&self.indexing))
            .map_err(|e| PipelineError::Fatal(format!("resampler process: {e}")))?;

        if nbr_out == 0 {
            return Ok(None);
        }

        let pts = self.first_pts.unwrap_or_default()
            + self.out_format.frames_to_duration(self.produced_frames);
        self.produced_frames += nbr_out as u64;

        Ok(Some(Frame {
            pts,
            format: self.out_format,
            samples: self.out_interleaved[..nbr_out * self.channels].to_vec(),
        }))
    }
}
