//! Interactive playback loop for `pipeline-play`.
//!
//! Drives [`Player::tick`] from a `crossbeam_channel::tick` timer and reacts to console
//! commands read on a background stdin thread.

use std::io::BufRead;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, select};
use media_pipeline::{CpalSinkFactory, PlaybackEndReason, Player, PlayerEvent, PlayerState};

use crate::config::PlayConfig;

/// Print the output devices of the default host.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    let names = media_pipeline::device::list_devices(&host)?;
    if names.is_empty() {
        println!("no output devices");
    }
    for (i, name) in names.iter().enumerate() {
        println!("{i}: {name}");
    }
    Ok(())
}

/// A line typed on stdin while playing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    TogglePause,
    Seek(Duration),
    Volume(u8),
    ToggleMute,
    Quit,
}

pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next()?;
    let arg = parts.next();
    match (cmd, arg) {
        ("p", None) => Some(ConsoleCommand::TogglePause),
        ("m", None) => Some(ConsoleCommand::ToggleMute),
        ("q", None) => Some(ConsoleCommand::Quit),
        ("s", Some(secs)) => {
            let secs: f64 = secs.parse().ok()?;
            Duration::try_from_secs_f64(secs).ok().map(ConsoleCommand::Seek)
        }
        ("v", Some(pct)) => pct
            .parse::<u8>()
            .ok()
            .filter(|v| *v <= 100)
            .map(ConsoleCommand::Volume),
        _ => None,
    }
}

/// Play one file until it ends, the user quits, or Ctrl-C.
pub fn run_play(cfg: PlayConfig) -> Result<()> {
    let tick_every = cfg.pipeline.tick_interval();
    let mut player = Player::new(
        cfg.pipeline.clone(),
        Box::new(CpalSinkFactory::new(cfg.device.clone())),
    );
    let events = player.events();

    player
        .open(&cfg.path)
        .with_context(|| format!("play {}", cfg.path.display()))?;
    tracing::info!(path = %cfg.path.display(), "playing");
    eprintln!("commands: p (pause/resume), s <secs> (seek), v <0-100> (volume), m (mute), q (quit)");

    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .context("install Ctrl-C handler")?;

    let mut commands = spawn_stdin_reader()?;
    let ticker = crossbeam_channel::tick(tick_every);
    let mut stdin_closed = false;

    loop {
        select! {
            recv(ticker) -> _ => {
                let state = player.tick();
                log_events(&events);
                if state == PlayerState::Closed {
                    break;
                }
            }
            recv(commands) -> msg => match msg {
                Ok(cmd) => {
                    if handle_command(&mut player, cmd) {
                        break;
                    }
                }
                Err(_) => stdin_closed = true,
            },
            recv(interrupt_rx) -> _ => {
                tracing::info!("interrupted");
                break;
            }
        }
        if stdin_closed {
            // Keep playing without console control.
            commands = crossbeam_channel::never();
            stdin_closed = false;
        }
    }

    player.close();
    log_events(&events);

    if cfg.status_json {
        let status = player.status();
        println!("{}", serde_json::to_string_pretty(&status)?);
    }

    match player.end_reason() {
        Some(PlaybackEndReason::Error) => Err(anyhow!(
            "playback failed: {}",
            player.last_error().unwrap_or("unknown error")
        )),
        _ => Ok(()),
    }
}

/// Returns `true` when the loop should exit.
fn handle_command(player: &mut Player, cmd: ConsoleCommand) -> bool {
    let result = match cmd {
        ConsoleCommand::TogglePause => {
            if player.state() == PlayerState::Paused {
                player.resume()
            } else {
                player.stop()
            }
        }
        ConsoleCommand::Seek(to) => player.seek(to),
        ConsoleCommand::Volume(pct) => {
            player.set_volume(pct);
            Ok(())
        }
        ConsoleCommand::ToggleMute => {
            let muted = !player.is_muted();
            player.set_muted(muted);
            Ok(())
        }
        ConsoleCommand::Quit => return true,
    };
    if let Err(e) = result {
        tracing::warn!("{cmd:?} failed: {e}");
    }
    false
}

fn log_events(events: &Receiver<PlayerEvent>) {
    for event in events.try_iter() {
        match event {
            PlayerEvent::Position { elapsed_ms } => tracing::debug!(elapsed_ms, "position"),
            PlayerEvent::StateChanged { state } => tracing::debug!(%state, "state"),
            PlayerEvent::DecodeError { pts_ms, message } => {
                tracing::warn!(pts_ms, "skipped packet: {message}")
            }
            PlayerEvent::EndOfPlayback => tracing::info!("finished"),
            PlayerEvent::Fatal { stage, message } => {
                tracing::error!(%stage, "playback stopped: {message}")
            }
        }
    }
}

fn spawn_stdin_reader() -> Result<Receiver<ConsoleCommand>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match parse_command(&line) {
                    Some(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => eprintln!("unknown command: {}", line.trim()),
                }
            }
        })
        .context("spawn stdin thread")?;
    Ok(rx)
}
