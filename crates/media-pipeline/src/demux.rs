//! Container demux stage.
//!
//! Uses Symphonia to:
//! - probe the input container and pick the default track
//! - optionally seek to a start offset
//! - read packets of that track and push them into a bounded packet queue from a
//!   background thread

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use symphonia::core::codecs::CodecParameters;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::decode::{FrameDecoder, SymphoniaDecoder};
use crate::error::{PipelineError, Result};
use crate::events::{Stage, WorkerEvent};
use crate::queue::BoundedQueue;
use crate::types::{Packet, PacketMessage, PcmFormat, StreamInfo};

/// Something that yields compressed packets of one stream in read order.
///
/// `Ok(None)` means the input is exhausted.
pub trait PacketSource: Send {
    fn next_packet(&mut self) -> Result<Option<Packet>>;
}

/// A probed source ready to be handed to the orchestrator.
pub struct OpenedMedia {
    pub info: StreamInfo,
    pub packets: Box<dyn PacketSource>,
    pub decoder: Box<dyn FrameDecoder>,
}

/// [`PacketSource`] over a Symphonia [`FormatReader`], filtered to one track.
pub struct SymphoniaDemuxer {
    format: Box<dyn FormatReader>,
    track_id: u32,
}

impl PacketSource for SymphoniaDemuxer {
    fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    tracing::warn!("container requested a decoder reset; ending stream");
                    return Ok(None);
                }
                Err(e) => return Err(PipelineError::Fatal(format!("read packet: {e}"))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            return Ok(Some(Packet {
                stream_index: packet.track_id(),
                pts: packet.ts(),
                duration: packet.dur(),
                data: packet.data,
            }));
        }
    }
}

/// Open a local file, probe it, and build the matching decoder.
///
/// Fails with [`PipelineError::Open`] before any thread exists.
pub fn open_file(path: &Path, start: Option<Duration>) -> Result<OpenedMedia> {
    let file = File::open(path)
        .map_err(|e| PipelineError::Open(format!("open {}: {e}", path.display())))?;

    let mut hint = Hint::new();
    let ext = path.extension().and_then(|e| e.to_str()).map(str::to_owned);
    if let Some(ext) = ext.as_deref() {
        hint.with_extension(ext);
    }

    let mut media = open_media_source(Box::new(file), hint, start)?;
    media.info.container = ext.map(|e| e.to_ascii_uppercase());
    Ok(media)
}

/// Probe an arbitrary Symphonia [`MediaSource`] and build demuxer + decoder.
pub fn open_media_source(
    source: Box<dyn MediaSource>,
    hint: Hint,
    start: Option<Duration>,
) -> Result<OpenedMedia> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| PipelineError::Open(format!("probe: {e}")))?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| PipelineError::Open("no default audio track".into()))?;
    let track_id = track.id;
    let codec_params: CodecParameters = track.codec_params.clone();

    let channels = codec_params
        .channels
        .ok_or_else(|| PipelineError::Open("unknown channel layout".into()))?
        .count();
    let rate = codec_params
        .sample_rate
        .filter(|r| *r > 0)
        .ok_or_else(|| PipelineError::Open("unknown sample rate".into()))?;

    let bits = codec_params
        .bits_per_sample
        .or(codec_params.bits_per_coded_sample)
        .and_then(|v| u16::try_from(v).ok());
    let pcm = PcmFormat::new(rate, channels as u16).with_bits(bits);

    let mut info = StreamInfo {
        stream_index: track_id,
        format: pcm,
        time_base: codec_params.time_base,
        duration: duration_from_codec_params(&codec_params),
        codec: codec_name_from_params(&codec_params),
        container: None,
        start: Duration::ZERO,
    };

    if let Some(offset) = start.filter(|d| !d.is_zero()) {
        let time = Time::new(offset.as_secs(), f64::from(offset.subsec_nanos()) / 1e9);
        match format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: Some(track_id),
            },
        ) {
            Ok(seeked) => {
                info.start = info.pts_to_duration(seeked.actual_ts);
                tracing::info!(
                    requested_ms = offset.as_millis() as u64,
                    actual_ms = info.start.as_millis() as u64,
                    "seeked"
                );
            }
            Err(e) => return Err(PipelineError::Open(format!("seek: {e}"))),
        }
    }

    let decoder = SymphoniaDecoder::new(&codec_params, info.clone())?;

    tracing::info!(
        channels,
        rate_hz = rate,
        codec = info.codec.as_deref().unwrap_or("unknown"),
        duration_ms = info.duration.map(|d| d.as_millis() as u64),
        "source opened"
    );

    Ok(OpenedMedia {
        info,
        packets: Box::new(SymphoniaDemuxer { format, track_id }),
        decoder: Box::new(decoder),
    })
}

/// Start the demux thread.
///
/// The thread pushes packets until the source is exhausted (then pushes
/// [`PacketMessage::EndOfStream`]), the queue is aborted, or a read fails (reported as
/// [`WorkerEvent::Fatal`]).
pub(crate) fn spawn_demuxer(
    mut source: Box<dyn PacketSource>,
    packets: Arc<BoundedQueue<PacketMessage>>,
    events: Sender<WorkerEvent>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("demux".into())
        .spawn(move || {
            tracing::debug!("demux thread started");
            let mut count = 0u64;
            loop {
                match source.next_packet() {
                    Ok(Some(packet)) => {
                        if packets.push(PacketMessage::Packet(packet)).is_err() {
                            tracing::debug!(packets = count, "demux thread aborted");
                            return;
                        }
                        count += 1;
                    }
                    Ok(None) => {
                        let _ = packets.push(PacketMessage::EndOfStream);
                        tracing::debug!(packets = count, "demux reached end of stream");
                        return;
                    }
                    Err(e) => {
                        tracing::error!(packets = count, "demux thread error: {e}");
                        let _ = events.send(WorkerEvent::Fatal {
                            stage: Stage::Demux,
                            message: e.to_string(),
                        });
                        return;
                    }
                }
            }
        })
        .map_err(|e| PipelineError::Open(format!("spawn demux thread: {e}")))
}

/// Best-effort duration from codec metadata.
///
/// Returns `None` if the container does not provide total frames or sample rate.
fn duration_from_codec_params(codec_params: &CodecParameters) -> Option<Duration> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate?;
    if rate == 0 {
        return None;
    }
    Some(PcmFormat::new(rate, 1).frames_to_duration(frames))
}

/// Best-effort codec label used for status payloads.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
