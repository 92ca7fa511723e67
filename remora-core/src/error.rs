//! Domain-specific error types for session orchestration.
//!
//! All fallible operations return `Result<T, RemoraError>`.
//! No panics on invalid input — every error is typed and recoverable,
//! and only `Startup` is fatal to a session.

use thiserror::Error;

/// The canonical error type for the remora session core.
#[derive(Debug, Error)]
pub enum RemoraError {
    // ── Session Errors ───────────────────────────────────────────
    /// Session initialisation failed (no monitors, subsystem init error).
    #[error("session startup failed: {0}")]
    Startup(String),

    /// A monitor switch or lookup referenced an index outside the
    /// current monitor snapshot.
    #[error("monitor index {index} out of range (0..{count})")]
    InvalidMonitorIndex { index: usize, count: usize },

    /// The session has already been torn down.
    #[error("session has ended")]
    SessionEnded,

    /// An operation targeted a subsystem that was disabled in the
    /// session configuration.
    #[error("{0} is disabled for this session")]
    FeatureDisabled(&'static str),

    // ── Capture Errors ───────────────────────────────────────────
    /// A frame capture failed twice in a row (one retry already made).
    #[error("capture failed after retry: {0}")]
    CaptureFailure(String),

    /// Capture is paused after repeated failures; an explicit resume
    /// is required before further frames will be produced.
    #[error("capture degraded after repeated failures; resume required")]
    DegradedCapture,

    // ── Transfer Errors ──────────────────────────────────────────
    /// A chunk write or completion referenced a stream id that is not
    /// active.
    #[error("unknown stream id: {0}")]
    UnknownStream(u64),

    /// The storage layer reported an I/O error. The owning transfer
    /// is marked failed and its temporary storage released.
    #[error("transfer I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Completion was requested before all declared bytes arrived.
    /// The transfer stays open; the caller may keep writing and retry.
    #[error("incomplete transfer: {received} of {expected} bytes received")]
    IncompleteTransfer { received: u64, expected: u64 },

    // ── Input Errors ─────────────────────────────────────────────
    /// The injection backend cannot perform the requested input kind.
    #[error("unsupported input: {0}")]
    UnsupportedInput(&'static str),

    // ── Clipboard Errors ─────────────────────────────────────────
    /// Another engine in this process already holds the clipboard hook.
    #[error("clipboard hook already held by another engine")]
    ClipboardHookHeld,

    /// The clipboard backend reported an error.
    #[error("clipboard error: {0}")]
    Clipboard(String),

    // ── Audio Errors ─────────────────────────────────────────────
    /// The audio backend reported a capture error.
    #[error("audio capture error: {0}")]
    Audio(String),

    // ── Infrastructure ───────────────────────────────────────────
    /// An mpsc/oneshot channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for RemoraError {
    fn from(s: String) -> Self {
        RemoraError::Other(s)
    }
}

impl From<&str> for RemoraError {
    fn from(s: &str) -> Self {
        RemoraError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RemoraError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RemoraError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for RemoraError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        RemoraError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for RemoraError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        RemoraError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = RemoraError::InvalidMonitorIndex { index: 3, count: 2 };
        assert!(e.to_string().contains('3'));
        assert!(e.to_string().contains('2'));

        let e = RemoraError::IncompleteTransfer {
            received: 500,
            expected: 1000,
        };
        assert!(e.to_string().contains("500"));
        assert!(e.to_string().contains("1000"));
    }

    #[test]
    fn from_string() {
        let e: RemoraError = "something broke".into();
        assert!(matches!(e, RemoraError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: RemoraError = io_err.into();
        assert!(matches!(e, RemoraError::Io(_)));
    }
}
