//! Error taxonomy for the playback pipeline.
//!
//! - [`PipelineError::Open`]: the source could not be opened; no threads were started.
//! - [`PipelineError::Decode`]: one packet failed to decode; the decoder skips it.
//! - [`PipelineError::Fatal`]: codec/container failure mid-stream; the pipeline is torn down.
//! - [`PipelineError::Output`]: the output device failed; treated like a fatal error.
//! - [`QueueAborted`]: internal shutdown signal, never shown to users.

use thiserror::Error;

/// Returned by queue operations after `abort()` has been called.
///
/// This is the normal way worker threads learn that the pipeline is shutting down.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Error)]
#[error("queue aborted")]
pub struct QueueAborted;

/// Errors surfaced by the pipeline and its control surface.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad source or unsupported format.
    #[error("open failed: {0}")]
    Open(String),

    /// Recoverable, per-packet decode failure.
    #[error("decode error: {0}")]
    Decode(String),

    /// Unrecoverable codec or container failure.
    #[error("fatal pipeline error: {0}")]
    Fatal(String),

    /// Output device could not be opened or failed while playing.
    #[error("audio output error: {0}")]
    Output(String),

    /// Control surface called in a state that does not allow it.
    #[error("invalid state: cannot {op} while {state}")]
    InvalidState { op: &'static str, state: String },

    #[error(transparent)]
    Aborted(#[from] QueueAborted),
}

impl PipelineError {
    /// Whether the decoder should skip the packet and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::Decode(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_decode_errors_are_recoverable() {
        assert!(PipelineError::Decode("bad frame".into()).is_recoverable());
        assert!(!PipelineError::Fatal("codec".into()).is_recoverable());
        assert!(!PipelineError::Output("device gone".into()).is_recoverable());
        assert!(!PipelineError::Aborted(QueueAborted).is_recoverable());
        assert!(!PipelineError::Open("missing".into()).is_recoverable());
    }

    #[test]
    fn invalid_state_message_names_operation() {
        let err = PipelineError::InvalidState {
            op: "open",
            state: "playing".into(),
        };
        assert_eq!(err.to_string(), "invalid state: cannot open while playing");
    }
}
