//! Orchestrator: owns one open pipeline and drives its lifecycle.
//!
//! Wiring for one open source:
//! - demux thread → packet queue → decode thread → [`AudioBuffer`]
//! - [`Player::tick`] on the control thread moves audio from the buffer into the sink
//!
//! The control thread never blocks on pipeline internals except in [`Player::close`],
//! which aborts both queues before joining the workers.

mod state;

pub use state::PlayerState;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::buffer::AudioBuffer;
use crate::config::PipelineConfig;
use crate::decode::DecodeWorker;
use crate::demux::{self, OpenedMedia};
use crate::error::{PipelineError, Result};
use crate::events::{PlaybackEndReason, PlayerEvent, Stage, WorkerEvent};
use crate::feeder::{FeedOutcome, PlaybackFeeder, Volume};
use crate::output::{AudioSink, SinkFactory};
use crate::queue::BoundedQueue;
use crate::status::PlayerStatus;
use crate::types::{PacketMessage, PcmFormat, StreamInfo};

/// Resources of one open source. Dropped only after both workers are joined.
struct ActivePipeline {
    packets: Arc<BoundedQueue<PacketMessage>>,
    buffer: Arc<AudioBuffer>,
    demux: Option<JoinHandle<()>>,
    decode: Option<JoinHandle<()>>,
    worker_events: Receiver<WorkerEvent>,
    sink: Box<dyn AudioSink>,
    feeder: PlaybackFeeder,
    info: StreamInfo,
    /// Reopened on seek; `None` for sources handed in via [`Player::open_media`].
    path: Option<PathBuf>,
    last_position: Duration,
}

impl ActivePipeline {
    fn output_format(&self) -> PcmFormat {
        self.buffer.format()
    }

    /// Played position: start offset plus frames the sink has actually consumed.
    fn position(&mut self) -> Duration {
        let played = self
            .feeder
            .written_frames()
            .saturating_sub(self.sink.queued_frames() as u64);
        let pos = self.info.start + self.output_format().frames_to_duration(played);
        if pos > self.last_position {
            self.last_position = pos;
        }
        self.last_position
    }

    /// Abort both queues, then join the workers.
    fn shutdown(&mut self) {
        self.packets.abort();
        self.buffer.abort();
        for (name, handle) in [("demux", self.demux.take()), ("decode", self.decode.take())] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    tracing::error!(thread = name, "worker thread panicked");
                }
            }
        }
    }
}

/// Playback orchestrator.
///
/// Drive it by calling [`Player::tick`] every `tick_interval_ms` from one thread.
pub struct Player {
    config: PipelineConfig,
    sinks: Box<dyn SinkFactory>,
    state: PlayerState,
    active: Option<ActivePipeline>,
    volume: Volume,
    subscribers: Vec<Sender<PlayerEvent>>,
    last_error: Option<String>,
    end_reason: Option<PlaybackEndReason>,
    decode_errors: u64,
    last_elapsed_ms: Option<u64>,
}

impl Player {
    pub fn new(config: PipelineConfig, sinks: Box<dyn SinkFactory>) -> Self {
        let config = config.normalized();
        let volume = Volume::new(config.initial_volume, false);
        Self {
            config,
            sinks,
            state: PlayerState::Idle,
            active: None,
            volume,
            subscribers: Vec::new(),
            last_error: None,
            end_reason: None,
            decode_errors: 0,
            last_elapsed_ms: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Open a local file and start decoding it.
    ///
    /// Returns once the workers are running; playback starts on a later tick once
    /// enough audio is buffered.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.ensure_can_open()?;
        let path = path.as_ref();
        let media = demux::open_file(path, None).inspect_err(|e| self.record_open_error(e))?;
        self.start(media, Some(path.to_path_buf()), false)
    }

    /// Start playing an already probed source.
    pub fn open_media(&mut self, media: OpenedMedia) -> Result<()> {
        self.ensure_can_open()?;
        self.start(media, None, false)
    }

    /// Pause playback; decoding continues until the buffer is full.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            PlayerState::Paused => Ok(()),
            PlayerState::Opening | PlayerState::Playing => {
                if let Some(active) = self.active.as_mut() {
                    if let Err(e) = active.sink.pause() {
                        self.fail(Stage::Output, e.to_string());
                        return Err(e);
                    }
                }
                self.set_state(PlayerState::Paused);
                Ok(())
            }
            state => Err(invalid("stop", state)),
        }
    }

    /// Leave `Paused`; goes back through `Opening` if the prebuffer is not reached yet.
    pub fn resume(&mut self) -> Result<()> {
        match self.state {
            PlayerState::Playing | PlayerState::Opening => Ok(()),
            PlayerState::Paused => {
                let ready = self
                    .active
                    .as_ref()
                    .map(|a| self.prebuffered(&a.buffer))
                    .unwrap_or(false);
                if ready {
                    self.start_playing()
                } else {
                    self.set_state(PlayerState::Opening);
                    Ok(())
                }
            }
            state => Err(invalid("resume", state)),
        }
    }

    /// Tear the pipeline down and wait for the worker threads to exit.
    pub fn close(&mut self) {
        if self.state == PlayerState::Closed && self.active.is_none() {
            return;
        }
        let had_pipeline = self.active.is_some();
        self.teardown();
        if had_pipeline {
            self.end_reason = Some(PlaybackEndReason::Stopped);
        }
        self.set_state(PlayerState::Closed);
    }

    /// Restart the current file at `position`, keeping the paused state.
    ///
    /// Only sources opened by path can seek.
    pub fn seek(&mut self, position: Duration) -> Result<()> {
        if !matches!(
            self.state,
            PlayerState::Opening | PlayerState::Playing | PlayerState::Paused
        ) {
            return Err(invalid("seek", self.state));
        }
        let Some(active) = self.active.as_ref() else {
            return Err(invalid("seek", self.state));
        };
        let Some(path) = active.path.clone() else {
            return Err(PipelineError::InvalidState {
                op: "seek",
                state: "playing a source without a path".into(),
            });
        };
        let target = match active.info.duration {
            Some(total) => position.min(total),
            None => position,
        };
        let paused = self.state == PlayerState::Paused;

        tracing::info!(target_ms = target.as_millis() as u64, "seek");
        self.teardown();
        self.set_state(PlayerState::Closed);

        let reopened = demux::open_file(&path, Some(target))
            .inspect_err(|e| self.record_open_error(e))
            .and_then(|media| self.start(media, Some(path), paused));
        if reopened.is_err() {
            self.end_reason = Some(PlaybackEndReason::Error);
        }
        reopened
    }

    /// One control-loop step; never blocks.
    ///
    /// Forwards worker notifications, finishes prebuffering, and feeds the sink.
    pub fn tick(&mut self) -> PlayerState {
        if self.active.is_none() {
            return self.state;
        }

        if let Some((stage, message)) = self.drain_worker_events() {
            self.fail(stage, message);
            return self.state;
        }

        if self.state == PlayerState::Opening {
            let ready = self
                .active
                .as_ref()
                .map(|a| self.prebuffered(&a.buffer))
                .unwrap_or(false);
            if ready && self.start_playing().is_err() {
                return self.state;
            }
        }

        if self.state == PlayerState::Playing {
            self.feed();
        }
        self.state
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// Playback position; monotonic while playing, zero when nothing is open.
    pub fn position(&mut self) -> Duration {
        self.active
            .as_mut()
            .map(ActivePipeline::position)
            .unwrap_or_default()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.active.as_ref().and_then(|a| a.info.duration)
    }

    /// Subscribe to [`PlayerEvent`]s. Each call returns an independent receiver.
    pub fn events(&mut self) -> Receiver<PlayerEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn set_volume(&mut self, percent: u8) {
        self.volume.set_percent(percent);
        tracing::info!(volume = self.volume.percent(), "volume set");
    }

    pub fn volume(&self) -> u8 {
        self.volume.percent()
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.volume.set_muted(muted);
        tracing::info!(muted, "mute set");
    }

    pub fn is_muted(&self) -> bool {
        self.volume.muted()
    }

    /// Message of the most recent open or fatal error.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn end_reason(&self) -> Option<PlaybackEndReason> {
        self.end_reason
    }

    pub fn status(&mut self) -> PlayerStatus {
        let mut status = PlayerStatus {
            state: self.state,
            volume_percent: self.volume.percent(),
            muted: self.volume.muted(),
            decode_errors: self.decode_errors,
            end_reason: self.end_reason,
            last_error: self.last_error.clone(),
            ..PlayerStatus::default()
        };
        if let Some(active) = self.active.as_mut() {
            status.elapsed_ms = active.position().as_millis() as u64;
            status.buffered_ms = Some(active.buffer.buffered_duration().as_millis() as u64);
            status.dropped_frames = Some(active.buffer.dropped_frames());
            status.now_playing = active.path.as_ref().map(|p| p.display().to_string());
            status.sink = active.sink.info();
            status = status.with_track(&active.info, active.output_format());
        }
        status
    }

    fn ensure_can_open(&self) -> Result<()> {
        if self.active.is_some() || self.state.is_active() {
            return Err(invalid("open", self.state));
        }
        Ok(())
    }

    fn record_open_error(&mut self, e: &PipelineError) {
        tracing::warn!("open failed: {e}");
        self.last_error = Some(e.to_string());
    }

    /// Open the sink, build the queues, and spawn the workers.
    fn start(&mut self, media: OpenedMedia, path: Option<PathBuf>, paused: bool) -> Result<()> {
        let OpenedMedia {
            info,
            packets: source,
            decoder,
        } = media;

        let mut sink = match self.sinks.open_sink(&info.format, &self.config) {
            Ok(sink) => sink,
            Err(e) => {
                self.record_open_error(&e);
                return Err(e);
            }
        };
        let output = sink.format();
        if output.channels != info.format.channels {
            let e = PipelineError::Open(format!(
                "sink opened with {} channels for a {} channel source",
                output.channels, info.format.channels
            ));
            self.record_open_error(&e);
            return Err(e);
        }
        // Silent until prebuffered.
        if let Err(e) = sink.pause() {
            self.record_open_error(&e);
            return Err(e);
        }

        let packets = Arc::new(BoundedQueue::new(self.config.packet_queue_len));
        let buffer = Arc::new(AudioBuffer::new(
            PcmFormat::new(output.sample_rate, info.format.channels),
            self.config.frame_queue_len,
        ));
        let (worker_tx, worker_rx) = crossbeam_channel::unbounded();

        self.last_error = None;
        self.end_reason = None;
        self.last_elapsed_ms = None;
        self.set_state(PlayerState::Opening);

        let mut active = ActivePipeline {
            packets: packets.clone(),
            buffer: buffer.clone(),
            demux: None,
            decode: None,
            worker_events: worker_rx,
            sink,
            feeder: PlaybackFeeder::new(self.config.max_write_frames),
            last_position: info.start,
            info: info.clone(),
            path,
        };

        let spawned = DecodeWorker {
            decoder,
            packets: packets.clone(),
            buffer,
            events: worker_tx.clone(),
            info: info.clone(),
            output_rate: output.sample_rate,
            resample_chunk_frames: self.config.resample_chunk_frames,
            max_consecutive_errors: self.config.max_consecutive_decode_errors,
        }
        .spawn()
        .and_then(|decode| {
            active.decode = Some(decode);
            demux::spawn_demuxer(source, packets, worker_tx)
        });
        match spawned {
            Ok(demux) => active.demux = Some(demux),
            Err(e) => {
                active.shutdown();
                self.record_open_error(&e);
                self.set_state(PlayerState::Closed);
                return Err(e);
            }
        }

        tracing::info!(
            source_rate_hz = info.format.sample_rate,
            output_rate_hz = output.sample_rate,
            channels = info.format.channels,
            start_ms = info.start.as_millis() as u64,
            "pipeline started"
        );
        self.active = Some(active);
        if paused {
            self.set_state(PlayerState::Paused);
        }
        Ok(())
    }

    fn prebuffered(&self, buffer: &AudioBuffer) -> bool {
        buffer.buffered_duration() >= self.config.prebuffer()
            || buffer.is_end_of_stream()
            || buffer.is_full()
    }

    fn start_playing(&mut self) -> Result<()> {
        if let Some(active) = self.active.as_mut() {
            if let Err(e) = active.sink.resume() {
                self.fail(Stage::Output, e.to_string());
                return Err(e);
            }
        }
        self.set_state(PlayerState::Playing);
        Ok(())
    }

    /// Forward non-fatal worker events; returns the first fatal one.
    fn drain_worker_events(&mut self) -> Option<(Stage, String)> {
        let events: Vec<WorkerEvent> = match self.active.as_ref() {
            Some(active) => active.worker_events.try_iter().collect(),
            None => return None,
        };
        for event in events {
            match event {
                WorkerEvent::DecodeError { pts, message } => {
                    self.decode_errors += 1;
                    self.emit(PlayerEvent::DecodeError {
                        pts_ms: pts.as_millis() as u64,
                        message,
                    });
                }
                WorkerEvent::Fatal { stage, message } => return Some((stage, message)),
            }
        }
        None
    }

    fn feed(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let outcome = active
            .feeder
            .tick(&active.buffer, active.sink.as_mut(), self.volume);
        match outcome {
            Ok(FeedOutcome::Wrote(_)) | Ok(FeedOutcome::Draining) => {
                let elapsed_ms = active.position().as_millis() as u64;
                if self.last_elapsed_ms != Some(elapsed_ms) {
                    self.last_elapsed_ms = Some(elapsed_ms);
                    self.emit(PlayerEvent::Position { elapsed_ms });
                }
            }
            Ok(FeedOutcome::EndOfPlayback) => {
                tracing::info!(
                    frames = active.feeder.written_frames(),
                    "end of playback"
                );
                self.emit(PlayerEvent::EndOfPlayback);
                self.set_state(PlayerState::Stopping);
                self.teardown();
                self.end_reason = Some(PlaybackEndReason::Eof);
                self.set_state(PlayerState::Closed);
            }
            Ok(FeedOutcome::Idle) | Ok(FeedOutcome::Finished) => {}
            // The decode thread aborted the buffer; its Fatal event arrives next tick.
            Err(PipelineError::Aborted(_)) => {}
            Err(e) => self.fail(Stage::Output, e.to_string()),
        }
    }

    /// Tear down after an unrecoverable error and report it.
    fn fail(&mut self, stage: Stage, message: String) {
        tracing::error!(%stage, "pipeline failed: {message}");
        self.set_state(PlayerState::Stopping);
        self.teardown();
        self.last_error = Some(message.clone());
        self.end_reason = Some(PlaybackEndReason::Error);
        self.emit(PlayerEvent::Fatal { stage, message });
        self.set_state(PlayerState::Closed);
    }

    fn teardown(&mut self) {
        if let Some(mut active) = self.active.take() {
            if self.state != PlayerState::Stopping {
                self.set_state(PlayerState::Stopping);
            }
            active.shutdown();
            tracing::debug!(
                written_frames = active.feeder.written_frames(),
                "pipeline torn down"
            );
        }
    }

    fn set_state(&mut self, state: PlayerState) {
        if self.state == state {
            return;
        }
        tracing::info!(from = %self.state, to = %state, "player state");
        self.state = state;
        self.emit(PlayerEvent::StateChanged { state });
    }

    fn emit(&mut self, event: PlayerEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.close();
    }
}

fn invalid(op: &'static str, state: PlayerState) -> PipelineError {
    PipelineError::InvalidState {
        op,
        state: state.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::FrameDecoder;
    use crate::demux::PacketSource;
    use crate::types::{Frame, Packet};

    struct NullSink {
        format: PcmFormat,
    }

    impl AudioSink for NullSink {
        fn format(&self) -> PcmFormat {
            self.format
        }
        fn writable_frames(&self) -> usize {
            usize::MAX
        }
        fn write(&mut self, samples: &[f32]) -> Result<usize> {
            Ok(samples.len() / self.format.channel_count())
        }
    }

    struct NullFactory {
        channels: Option<u16>,
    }

    impl SinkFactory for NullFactory {
        fn open_sink(&mut self, source: &PcmFormat, _: &PipelineConfig) -> Result<Box<dyn AudioSink>> {
            Ok(Box::new(NullSink {
                format: PcmFormat::new(source.sample_rate, self.channels.unwrap_or(source.channels)),
            }))
        }
    }

    struct Counter {
        next: u64,
        total: u64,
    }

    impl PacketSource for Counter {
        fn next_packet(&mut self) -> Result<Option<Packet>> {
            if self.next == self.total {
                return Ok(None);
            }
            self.next += 1;
            Ok(Some(Packet {
                stream_index: 0,
                pts: (self.next - 1) * 10,
                duration: 10,
                data: Box::new([0]),
            }))
        }
    }

    struct Silence(PcmFormat);

    impl FrameDecoder for Silence {
        fn decode(&mut self, packet: &Packet) -> Result<Option<Frame>> {
            Ok(Some(Frame {
                pts: self.0.frames_to_duration(packet.pts),
                format: self.0,
                samples: vec![0.0; packet.duration as usize * self.0.channel_count()],
            }))
        }
    }

    fn media(total: u64) -> OpenedMedia {
        let format = PcmFormat::new(1_000, 1);
        OpenedMedia {
            info: StreamInfo {
                stream_index: 0,
                format,
                time_base: None,
                duration: Some(format.frames_to_duration(total * 10)),
                codec: None,
                container: None,
                start: Duration::ZERO,
            },
            packets: Box::new(Counter { next: 0, total }),
            decoder: Box::new(Silence(format)),
        }
    }

    fn player() -> Player {
        Player::new(PipelineConfig::default(), Box::new(NullFactory { channels: None }))
    }

    #[test]
    fn stop_and_seek_rejected_while_idle() {
        let mut p = player();
        assert!(matches!(p.stop(), Err(PipelineError::InvalidState { .. })));
        assert!(matches!(p.resume(), Err(PipelineError::InvalidState { .. })));
        assert!(matches!(
            p.seek(Duration::from_secs(1)),
            Err(PipelineError::InvalidState { .. })
        ));
        assert_eq!(p.state(), PlayerState::Idle);
    }

    #[test]
    fn open_while_active_is_rejected() {
        let mut p = player();
        p.open_media(media(4)).unwrap();
        assert_eq!(p.state(), PlayerState::Opening);
        assert!(matches!(
            p.open_media(media(4)),
            Err(PipelineError::InvalidState { .. })
        ));
        p.close();
        assert_eq!(p.state(), PlayerState::Closed);
        assert_eq!(p.end_reason(), Some(PlaybackEndReason::Stopped));
        p.open_media(media(4)).unwrap();
    }

    #[test]
    fn seek_without_path_is_rejected() {
        let mut p = player();
        p.open_media(media(4)).unwrap();
        assert!(matches!(
            p.seek(Duration::ZERO),
            Err(PipelineError::InvalidState { op: "seek", .. })
        ));
    }

    #[test]
    fn channel_mismatch_fails_open_without_threads() {
        let mut p = Player::new(
            PipelineConfig::default(),
            Box::new(NullFactory { channels: Some(2) }),
        );
        assert!(matches!(p.open_media(media(4)), Err(PipelineError::Open(_))));
        assert_eq!(p.state(), PlayerState::Idle);
        assert!(p.last_error().is_some());
    }

    #[test]
    fn close_on_idle_ends_closed() {
        let mut p = player();
        let rx = p.events();
        p.close();
        assert_eq!(p.state(), PlayerState::Closed);
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![PlayerEvent::StateChanged {
                state: PlayerState::Closed
            }]
        );
        assert_eq!(p.end_reason(), None);
    }

    #[test]
    fn volume_and_mute_round_trip() {
        let mut p = player();
        p.set_volume(140);
        assert_eq!(p.volume(), 100);
        p.set_volume(25);
        p.set_muted(true);
        assert_eq!(p.volume(), 25);
        assert!(p.is_muted());
        let status = p.status();
        assert_eq!(status.volume_percent, 25);
        assert!(status.muted);
    }

    #[test]
    fn stop_while_opening_pauses_and_resume_returns() {
        let mut p = player();
        p.open_media(media(1_000)).unwrap();
        p.stop().unwrap();
        assert_eq!(p.state(), PlayerState::Paused);
        p.stop().unwrap();
        p.resume().unwrap();
        assert!(matches!(p.state(), PlayerState::Opening | PlayerState::Playing));
    }
}
