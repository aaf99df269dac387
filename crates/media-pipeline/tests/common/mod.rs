#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use media_pipeline::{
    AudioSink, Frame, FrameDecoder, OpenedMedia, Packet, PacketSource, PcmFormat, PipelineConfig,
    PipelineError, Player, PlayerState, Result, SinkFactory, StreamInfo,
};

pub const RATE: u32 = 1_000;
pub const FRAMES_PER_PACKET: u64 = 10;

/// Packets `0..total`, each `FRAMES_PER_PACKET` long; `corrupt_at` packets carry a bad marker.
pub struct SeqSource {
    next: u64,
    total: u64,
    corrupt_at: Vec<u64>,
}

impl PacketSource for SeqSource {
    fn next_packet(&mut self) -> Result<Option<Packet>> {
        if self.next == self.total {
            return Ok(None);
        }
        let index = self.next;
        self.next += 1;
        let marker = if self.corrupt_at.contains(&index) { 0xFF } else { 0 };
        Ok(Some(Packet {
            stream_index: 0,
            pts: index * FRAMES_PER_PACKET,
            duration: FRAMES_PER_PACKET,
            data: vec![marker].into_boxed_slice(),
        }))
    }
}

/// Emits the absolute frame index as each sample value.
pub struct SeqDecoder {
    format: PcmFormat,
    fatal_at_pts: Option<u64>,
}

impl FrameDecoder for SeqDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<Frame>> {
        if Some(packet.pts) == self.fatal_at_pts {
            return Err(PipelineError::Fatal("codec state lost".into()));
        }
        if packet.data.first() == Some(&0xFF) {
            return Err(PipelineError::Decode("bad packet".into()));
        }
        let channels = self.format.channel_count();
        let samples = (packet.pts..packet.pts + packet.duration)
            .flat_map(|i| std::iter::repeat_n(i as f32, channels))
            .collect();
        Ok(Some(Frame {
            pts: self.format.frames_to_duration(packet.pts),
            format: self.format,
            samples,
        }))
    }
}

pub fn synthetic(total_packets: u64, corrupt_at: &[u64], fatal_at_pts: Option<u64>) -> OpenedMedia {
    let format = PcmFormat::new(RATE, 1);
    OpenedMedia {
        info: StreamInfo {
            stream_index: 0,
            format,
            time_base: None,
            duration: Some(format.frames_to_duration(total_packets * FRAMES_PER_PACKET)),
            codec: Some("SYNTH".into()),
            container: None,
            start: Duration::ZERO,
        },
        packets: Box::new(SeqSource {
            next: 0,
            total: total_packets,
            corrupt_at: corrupt_at.to_vec(),
        }),
        decoder: Box::new(SeqDecoder {
            format,
            fatal_at_pts,
        }),
    }
}

#[derive(Debug, Default)]
pub struct Captured {
    pub samples: Vec<f32>,
    pub writes: usize,
    pub opened: usize,
    pub paused: bool,
}

pub type SharedCapture = Arc<Mutex<Captured>>;

/// Sink recording everything written, accepting `capacity` frames per tick.
pub struct CaptureSink {
    format: PcmFormat,
    capacity: usize,
    captured: SharedCapture,
}

impl AudioSink for CaptureSink {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn writable_frames(&self) -> usize {
        self.capacity
    }

    fn write(&mut self, samples: &[f32]) -> Result<usize> {
        let mut c = self.captured.lock().unwrap();
        c.samples.extend_from_slice(samples);
        c.writes += 1;
        Ok(samples.len() / self.format.channel_count())
    }

    fn pause(&mut self) -> Result<()> {
        self.captured.lock().unwrap().paused = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.captured.lock().unwrap().paused = false;
        Ok(())
    }
}

pub struct CaptureFactory {
    pub capacity: usize,
    pub captured: SharedCapture,
}

impl CaptureFactory {
    pub fn new(capacity: usize) -> (Self, SharedCapture) {
        let captured = SharedCapture::default();
        (
            Self {
                capacity,
                captured: captured.clone(),
            },
            captured,
        )
    }
}

impl SinkFactory for CaptureFactory {
    fn open_sink(&mut self, source: &PcmFormat, _config: &PipelineConfig) -> Result<Box<dyn AudioSink>> {
        self.captured.lock().unwrap().opened += 1;
        Ok(Box::new(CaptureSink {
            format: *source,
            capacity: self.capacity,
            captured: self.captured.clone(),
        }))
    }
}

/// Capture factory whose `fail_on`-th open (1-based) reports a device error.
pub struct FailingFactory {
    pub inner: CaptureFactory,
    pub fail_on: u32,
    pub attempts: u32,
}

impl SinkFactory for FailingFactory {
    fn open_sink(&mut self, source: &PcmFormat, config: &PipelineConfig) -> Result<Box<dyn AudioSink>> {
        self.attempts += 1;
        if self.attempts == self.fail_on {
            return Err(PipelineError::Output("device unplugged".into()));
        }
        self.inner.open_sink(source, config)
    }
}

pub fn failing_player(config: PipelineConfig, capacity: usize, fail_on: u32) -> (Player, SharedCapture) {
    let (inner, captured) = CaptureFactory::new(capacity);
    let factory = FailingFactory {
        inner,
        fail_on,
        attempts: 0,
    };
    (Player::new(config, Box::new(factory)), captured)
}

pub fn player(config: PipelineConfig, capacity: usize) -> (Player, SharedCapture) {
    let (factory, captured) = CaptureFactory::new(capacity);
    (Player::new(config, Box::new(factory)), captured)
}

/// Tick until the player reaches `Closed`; panics after `timeout`.
pub fn drive_to_close(player: &mut Player, timeout: Duration) {
    drive_until(player, timeout, |s| s == PlayerState::Closed);
}

pub fn drive_until(player: &mut Player, timeout: Duration, done: impl Fn(PlayerState) -> bool) {
    let deadline = Instant::now() + timeout;
    loop {
        if done(player.tick()) {
            return;
        }
        assert!(Instant::now() < deadline, "timed out in state {}", player.state());
        thread::sleep(Duration::from_millis(1));
    }
}

/// Value of 16-bit test-tone sample `i`.
pub fn wav_sample(i: usize) -> i16 {
    ((i % 200) as i16 - 100) * 100
}

/// Write a 16-bit PCM WAV with `frames` frames of [`wav_sample`] per channel.
pub fn write_wav(path: &Path, rate: u32, channels: u16, frames: usize) {
    let block_align = channels * 2;
    let data_len = frames as u32 * u32::from(block_align);
    let mut f = std::fs::File::create(path).unwrap();
    f.write_all(b"RIFF").unwrap();
    f.write_all(&(36 + data_len).to_le_bytes()).unwrap();
    f.write_all(b"WAVEfmt ").unwrap();
    f.write_all(&16u32.to_le_bytes()).unwrap();
    f.write_all(&1u16.to_le_bytes()).unwrap();
    f.write_all(&channels.to_le_bytes()).unwrap();
    f.write_all(&rate.to_le_bytes()).unwrap();
    f.write_all(&(rate * u32::from(block_align)).to_le_bytes()).unwrap();
    f.write_all(&block_align.to_le_bytes()).unwrap();
    f.write_all(&16u16.to_le_bytes()).unwrap();
    f.write_all(b"data").unwrap();
    f.write_all(&data_len.to_le_bytes()).unwrap();
    for i in 0..frames {
        for _ in 0..channels {
            f.write_all(&wav_sample(i).to_le_bytes()).unwrap();
        }
    }
}
