//! Platform backends for the session core.
//!
//! # Platform
//!
//! Windows-only for now. On other platforms [`backend`] is defined
//! but returns an error, keeping the rest of the agent compilable
//! and testable everywhere.

use std::path::PathBuf;

use remora_core::{FsStreamStorage, RemoraError, SessionBackend};

#[cfg(target_os = "windows")]
mod windows;

/// Build the host backend bundle, assembling inbound file streams
/// under `stream_dir`.
#[cfg(target_os = "windows")]
pub fn backend(stream_dir: PathBuf) -> Result<SessionBackend, RemoraError> {
    Ok(SessionBackend {
        monitors: Box::new(windows::GdiMonitorSource::new()),
        grabber: Box::new(windows::GdiFrameGrabber::new()),
        clipboard: Box::new(windows::Win32Clipboard::new()),
        input: Box::new(windows::SendInputSink::new()),
        storage: Box::new(FsStreamStorage::new(stream_dir)),
        audio: None,
    })
}

/// Build the host backend bundle.
#[cfg(not(target_os = "windows"))]
pub fn backend(_stream_dir: PathBuf) -> Result<SessionBackend, RemoraError> {
    Err(RemoraError::Startup(
        "no platform capture backend for this OS".into(),
    ))
}
