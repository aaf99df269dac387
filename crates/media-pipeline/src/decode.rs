//! Streaming decode stage.
//!
//! Pops packets from the packet queue, decodes them into interleaved `f32` frames,
//! optionally resamples to the sink rate, and pushes the result into the
//! [`AudioBuffer`] from a background thread.
//!
//! Per-packet decode failures are skipped and reported as events; anything else stops
//! the thread, aborts the audio buffer, and reports [`WorkerEvent::Fatal`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet as SymphoniaPacket;

use crate::buffer::AudioBuffer;
use crate::error::{PipelineError, Result};
use crate::events::{Stage, WorkerEvent};
use crate::queue::BoundedQueue;
use crate::resample::FrameResampler;
use crate::types::{Frame, Packet, PacketMessage, PcmFormat, StreamInfo};

/// Codec abstraction used by the decode thread.
///
/// Return [`PipelineError::Decode`] for a bad packet that can be skipped; any other error
/// stops decoding. `Ok(None)` means the packet produced no audio (e.g. codec priming).
pub trait FrameDecoder: Send {
    fn decode(&mut self, packet: &Packet) -> Result<Option<Frame>>;
}

/// [`FrameDecoder`] backed by a Symphonia codec.
pub struct SymphoniaDecoder {
    decoder: Box<dyn Decoder>,
    info: StreamInfo,
}

impl SymphoniaDecoder {
    pub fn new(codec_params: &CodecParameters, info: StreamInfo) -> Result<Self> {
        let decoder = symphonia::default::get_codecs()
            .make(codec_params, &DecoderOptions::default())
            .map_err(|e| PipelineError::Open(format!("codec: {e}")))?;
        Ok(Self { decoder, info })
    }
}

impl FrameDecoder for SymphoniaDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<Frame>> {
        let sym_packet =
            SymphoniaPacket::new_from_slice(packet.stream_index, packet.pts, packet.duration, &packet.data);

        let decoded = match self.decoder.decode(&sym_packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => return Err(PipelineError::Decode(msg.to_string())),
            Err(SymphoniaError::IoError(e)) => return Err(PipelineError::Decode(e.to_string())),
            Err(e) => return Err(PipelineError::Fatal(format!("codec: {e}"))),
        };

        if decoded.frames() == 0 {
            return Ok(None);
        }

        let spec = *decoded.spec();
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        Ok(Some(Frame {
            pts: self.info.pts_to_duration(packet.pts),
            format: PcmFormat::new(spec.rate, spec.channels.count() as u16)
                .with_bits(self.info.format.bits_per_sample),
            samples: sample_buf.samples().to_vec(),
        }))
    }
}

/// Everything the decode thread needs, moved into it at spawn time.
pub(crate) struct DecodeWorker {
    pub decoder: Box<dyn FrameDecoder>,
    pub packets: Arc<BoundedQueue<PacketMessage>>,
    pub buffer: Arc<AudioBuffer>,
    pub events: Sender<WorkerEvent>,
    /// Stream the decoder was opened for; frames must match its format.
    pub info: StreamInfo,
    /// Rate the sink was negotiated at; a resampler is inserted when it differs.
    pub output_rate: u32,
    pub resample_chunk_frames: usize,
    pub max_consecutive_errors: u32,
}

impl DecodeWorker {
    pub(crate) fn spawn(self) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("decode".into())
            .spawn(move || self.run())
            .map_err(|e| PipelineError::Open(format!("spawn decode thread: {e}")))
    }

    fn run(mut self) {
        tracing::debug!("decode thread started");
        match self.decode_loop() {
            Ok(frames) => tracing::debug!(frames, "decode thread reached end of stream"),
            Err(PipelineError::Aborted(_)) => tracing::debug!("decode thread aborted"),
            Err(e) => {
                tracing::error!("decoder thread error: {e}");
                // Nothing decoded after this point may reach the device.
                self.buffer.abort();
                let _ = self.events.send(WorkerEvent::Fatal {
                    stage: Stage::Decode,
                    message: e.to_string(),
                });
            }
        }
    }

    /// Returns the number of frames delivered.
    fn decode_loop(&mut self) -> Result<u64> {
        let source = self.info.format;
        let mut resampler = if self.output_rate != source.sample_rate {
            tracing::info!(
                from_hz = source.sample_rate,
                to_hz = self.output_rate,
                "resampling"
            );
            Some(FrameResampler::new(
                source,
                self.output_rate,
                self.resample_chunk_frames,
            )?)
        } else {
            None
        };

        let mut consecutive_errors = 0u32;
        let mut delivered = 0u64;

        loop {
            let packet = match self.packets.pop()? {
                PacketMessage::Packet(p) => p,
                PacketMessage::EndOfStream => {
                    if let Some(r) = resampler.as_mut() {
                        if let Some(tail) = r.flush()? {
                            self.buffer.push_frame(tail)?;
                            delivered += 1;
                        }
                    }
                    self.buffer.mark_end_of_stream();
                    return Ok(delivered);
                }
            };

            match self.decoder.decode(&packet) {
                Ok(Some(frame)) => {
                    consecutive_errors = 0;
                    self.check_format(&frame)?;
                    match resampler.as_mut() {
                        Some(r) => {
                            for out in r.process(&frame)? {
                                self.buffer.push_frame(out)?;
                                delivered += 1;
                            }
                        }
                        None => {
                            self.buffer.push_frame(frame)?;
                            delivered += 1;
                        }
                    }
                }
                Ok(None) => consecutive_errors = 0,
                Err(e) if e.is_recoverable() => {
                    consecutive_errors += 1;
                    let pts = self.info.pts_to_duration(packet.pts);
                    tracing::warn!(
                        pts_ms = pts.as_millis() as u64,
                        consecutive = consecutive_errors,
                        "skipping undecodable packet: {e}"
                    );
                    let _ = self.events.send(WorkerEvent::DecodeError {
                        pts,
                        message: e.to_string(),
                    });
                    if consecutive_errors > self.max_consecutive_errors {
                        return Err(PipelineError::Fatal(format!(
                            "{consecutive_errors} consecutive decode errors"
                        )));
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn check_format(&self, frame: &Frame) -> Result<()> {
        let source = &self.info.format;
        if frame.format.sample_rate != source.sample_rate || frame.format.channels != source.channels {
            return Err(PipelineError::Fatal(format!(
                "stream format changed mid-stream: {} Hz/{} ch -> {} Hz/{} ch",
                source.sample_rate,
                source.channels,
                frame.format.sample_rate,
                frame.format.channels
            )));
        }
        Ok(())
    }
}
