//! Notifications flowing out of the pipeline.
//!
//! Worker threads report to the orchestrator over an internal channel ([`WorkerEvent`]);
//! the orchestrator republishes what the embedder cares about as [`PlayerEvent`]s.

use std::time::Duration;

use serde::Serialize;

use crate::pipeline::PlayerState;

/// Which worker thread raised a [`WorkerEvent::Fatal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Demux,
    Decode,
    Output,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Demux => "demux",
            Stage::Decode => "decode",
            Stage::Output => "output",
        };
        f.write_str(name)
    }
}

/// Sent by the demux/decode threads; drained by `Player::tick`.
#[derive(Clone, Debug)]
pub(crate) enum WorkerEvent {
    /// One packet was skipped.
    DecodeError { pts: Duration, message: String },
    /// The worker stopped and the pipeline must be torn down.
    Fatal { stage: Stage, message: String },
}

/// Updates published to the embedding application.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlayerEvent {
    StateChanged { state: PlayerState },
    /// Playback position after a tick that wrote audio.
    Position { elapsed_ms: u64 },
    /// A packet could not be decoded and was skipped.
    DecodeError { pts_ms: u64, message: String },
    /// The last buffered frame has been played.
    EndOfPlayback,
    /// The pipeline was torn down because of an unrecoverable error.
    Fatal { stage: Stage, message: String },
}

/// Why the last pipeline stopped.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Natural end of the source.
    Eof,
    /// Decoder, container, or output error interrupted playback.
    Error,
    /// Playback was explicitly closed.
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_displays_lowercase() {
        assert_eq!(Stage::Demux.to_string(), "demux");
        assert_eq!(Stage::Output.to_string(), "output");
    }
}
