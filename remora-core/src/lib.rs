//! # remora-core
//!
//! Host-agnostic core of the remora remote-desktop agent.
//!
//! This crate contains:
//! - **Session**: `SessionController` owning every per-session subsystem
//! - **Service**: command-channel session driver with `SessionHandle`
//! - **Capture**: `CapturePipeline` with retry and degradation policy
//! - **Quality**: `QualityAdapter` — hysteresis tier adaptation
//! - **Clipboard**: `ClipboardSyncEngine` with echo suppression
//! - **Transfer**: `FileStreamManager` for resumable chunked uploads
//! - **Input**: `InputDispatcher` translating monitor-relative events
//! - **Monitors**: `MonitorRegistry` snapshots over a platform source
//! - **Audio**: `AudioStreamer` lifecycle over a loopback source
//! - **Error**: `RemoraError` — typed, `thiserror`-based error hierarchy
//!
//! All platform specifics (pixel grabbing, input injection, clipboard
//! and audio devices, display enumeration) live behind traits so the
//! whole crate is testable with fakes.

pub mod audio;
pub mod capture;
pub mod clipboard;
pub mod error;
pub mod flags;
pub mod input;
pub mod monitor;
pub mod quality;
pub mod service;
pub mod session;
pub mod transfer;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use audio::{AudioChunk, AudioSource, AudioStreamer};
pub use capture::{
    CaptureRegion, CapturePipeline, CompressedFrame, CursorKind, CursorState, FrameGrabber,
    PixelBuffer,
};
pub use clipboard::{
    ClipboardAccess, ClipboardContents, ClipboardPayload, ClipboardSyncEngine, PayloadOrigin,
};
pub use error::RemoraError;
pub use flags::SessionFeatures;
pub use input::{InputDispatcher, InputEvent, InputSink, MouseButton};
pub use monitor::{MonitorInfo, MonitorRegistry, MonitorSource};
pub use quality::{NetworkSample, QualityAdapter, QualityConfig, QualityTier};
pub use service::{SessionHandle, spawn};
pub use session::{SessionBackend, SessionConfig, SessionController, SessionState};
pub use transfer::{
    FileStreamManager, FsStreamStorage, FsTempFile, StreamStorage, TempFile, TransferReceipt,
    TransferState,
};

/// Milliseconds since the Unix epoch.
pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
