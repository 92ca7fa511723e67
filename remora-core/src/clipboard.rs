//! Clipboard mirroring between peers.
//!
//! Local changes are captured into a bounded outbound queue that the
//! transport drains; remote payloads are written back to the local
//! clipboard. A short-lived "applied" marker recognises the change
//! notification the platform may raise for our own programmatic write
//! and drops it, breaking the remote→local→remote feedback loop.
//!
//! The platform change hook is a process-wide resource: only one
//! engine per process may hold it at a time, and it is released on
//! every session-end path, including drop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RemoraError;
use crate::unix_millis;

/// Default bound on the outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Default window during which a local-change notification is treated
/// as the echo of our own `apply_remote` write.
pub const DEFAULT_ECHO_WINDOW: Duration = Duration::from_millis(500);

/// Process-wide guard: set while any engine holds the platform hook.
static HOOK_HELD: AtomicBool = AtomicBool::new(false);

/// Serializes tests that exercise the process-wide hook guard.
#[cfg(test)]
pub(crate) fn hook_test_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();
    LOCK.get_or_init(|| std::sync::Mutex::new(()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ── Payload types ────────────────────────────────────────────────

/// Clipboard content, probed in a fixed priority order:
/// image first, then file list, then text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClipboardContents {
    Text(String),
    /// Encoded image bytes (PNG on every current backend).
    Image(Vec<u8>),
    FileList(Vec<String>),
}

/// Where a payload originated, used for echo suppression downstream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PayloadOrigin {
    /// Captured from a local clipboard change.
    Local,
    /// Written locally on behalf of the remote peer.
    AppliedRemote,
}

/// One clipboard payload travelling between the peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClipboardPayload {
    pub contents: ClipboardContents,
    pub origin: PayloadOrigin,
    /// Capture timestamp, Unix milliseconds.
    pub captured_at_ms: u64,
}

impl ClipboardPayload {
    /// A locally captured text payload.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            contents: ClipboardContents::Text(text.into()),
            origin: PayloadOrigin::Local,
            captured_at_ms: unix_millis(),
        }
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RemoraError> {
        bincode::serialize(self).map_err(|e| RemoraError::Encoding(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RemoraError> {
        bincode::deserialize(bytes).map_err(|e| RemoraError::Encoding(e.to_string()))
    }
}

// ── ClipboardAccess ──────────────────────────────────────────────

/// External clipboard collaborator.
///
/// Readers return `Ok(None)` when the clipboard does not currently
/// hold that variant. `install_hook` arranges for a `()` to be sent on
/// `notify` for every clipboard change until `uninstall_hook`.
pub trait ClipboardAccess: Send {
    fn read_text(&mut self) -> Result<Option<String>, RemoraError>;
    fn read_image(&mut self) -> Result<Option<Vec<u8>>, RemoraError>;
    fn read_file_list(&mut self) -> Result<Option<Vec<String>>, RemoraError>;

    fn write_text(&mut self, text: &str) -> Result<(), RemoraError>;
    fn write_image(&mut self, data: &[u8]) -> Result<(), RemoraError>;
    fn write_file_list(&mut self, paths: &[String]) -> Result<(), RemoraError>;

    fn install_hook(
        &mut self,
        notify: tokio::sync::mpsc::UnboundedSender<()>,
    ) -> Result<(), RemoraError>;
    fn uninstall_hook(&mut self);
}

// ── ClipboardSyncEngine ──────────────────────────────────────────

/// Detects local clipboard changes and applies remote ones.
pub struct ClipboardSyncEngine {
    access: Box<dyn ClipboardAccess>,
    queue: VecDeque<ClipboardPayload>,
    capacity: usize,
    dropped: u64,
    echo_window: Duration,
    applied_at: Option<Instant>,
    hook_installed: bool,
}

impl ClipboardSyncEngine {
    /// Create an engine with the given outbound queue bound.
    pub fn new(access: Box<dyn ClipboardAccess>, capacity: usize) -> Self {
        Self {
            access,
            queue: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            dropped: 0,
            echo_window: DEFAULT_ECHO_WINDOW,
            applied_at: None,
            hook_installed: false,
        }
    }

    /// Override the echo-suppression window.
    pub fn with_echo_window(mut self, window: Duration) -> Self {
        self.echo_window = window;
        self
    }

    /// Acquire the process-wide change hook.
    ///
    /// Fails with [`RemoraError::ClipboardHookHeld`] if another engine
    /// in this process already holds it.
    pub fn install_hook(
        &mut self,
        notify: tokio::sync::mpsc::UnboundedSender<()>,
    ) -> Result<(), RemoraError> {
        if self.hook_installed {
            return Ok(());
        }
        if HOOK_HELD
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RemoraError::ClipboardHookHeld);
        }
        if let Err(e) = self.access.install_hook(notify) {
            HOOK_HELD.store(false, Ordering::SeqCst);
            return Err(e);
        }
        self.hook_installed = true;
        debug!("clipboard hook installed");
        Ok(())
    }

    /// Release the change hook. Safe to call repeatedly.
    pub fn uninstall_hook(&mut self) {
        if self.hook_installed {
            self.access.uninstall_hook();
            HOOK_HELD.store(false, Ordering::SeqCst);
            self.hook_installed = false;
            debug!("clipboard hook released");
        }
    }

    /// Handle a local-change notification.
    ///
    /// Probes the clipboard in image → file-list → text order, first
    /// match wins, and enqueues the payload for the transport. Returns
    /// `Ok(None)` when the change was the echo of our own write or the
    /// clipboard is empty.
    pub fn capture_local(&mut self) -> Result<Option<ClipboardPayload>, RemoraError> {
        if let Some(applied) = self.applied_at {
            if applied.elapsed() <= self.echo_window {
                self.applied_at = None;
                debug!("suppressed clipboard echo");
                return Ok(None);
            }
            self.applied_at = None;
        }

        let contents = if let Some(image) = self.access.read_image()? {
            ClipboardContents::Image(image)
        } else if let Some(files) = self.access.read_file_list()? {
            ClipboardContents::FileList(files)
        } else if let Some(text) = self.access.read_text()? {
            ClipboardContents::Text(text)
        } else {
            return Ok(None);
        };

        let payload = ClipboardPayload {
            contents,
            origin: PayloadOrigin::Local,
            captured_at_ms: unix_millis(),
        };
        self.enqueue(payload.clone());
        Ok(Some(payload))
    }

    /// Write a remote payload to the local clipboard.
    ///
    /// Marks the write so the resulting change notification (if the
    /// platform raises one) is recognised as an echo.
    pub fn apply_remote(&mut self, payload: &ClipboardPayload) -> Result<(), RemoraError> {
        match &payload.contents {
            ClipboardContents::Text(text) => self.access.write_text(text)?,
            ClipboardContents::Image(data) => self.access.write_image(data)?,
            ClipboardContents::FileList(paths) => self.access.write_file_list(paths)?,
        }
        self.applied_at = Some(Instant::now());
        Ok(())
    }

    /// Pop the oldest pending outbound payload.
    pub fn dequeue(&mut self) -> Option<ClipboardPayload> {
        self.queue.pop_front()
    }

    /// Number of payloads waiting for the transport.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Total payloads dropped to queue overflow since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    // ── Internal ─────────────────────────────────────────────────

    fn enqueue(&mut self, payload: ClipboardPayload) {
        if self.queue.len() >= self.capacity {
            self.queue.pop_front();
            self.dropped += 1;
            warn!(
                dropped_total = self.dropped,
                "outbound clipboard queue full; dropped oldest entry"
            );
        }
        self.queue.push_back(payload);
    }
}

impl Drop for ClipboardSyncEngine {
    fn drop(&mut self) {
        self.uninstall_hook();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeClipboard {
        text: Option<String>,
        image: Option<Vec<u8>>,
        files: Option<Vec<String>>,
        hooked: bool,
    }

    impl ClipboardAccess for FakeClipboard {
        fn read_text(&mut self) -> Result<Option<String>, RemoraError> {
            Ok(self.text.clone())
        }
        fn read_image(&mut self) -> Result<Option<Vec<u8>>, RemoraError> {
            Ok(self.image.clone())
        }
        fn read_file_list(&mut self) -> Result<Option<Vec<String>>, RemoraError> {
            Ok(self.files.clone())
        }
        fn write_text(&mut self, text: &str) -> Result<(), RemoraError> {
            self.text = Some(text.to_string());
            Ok(())
        }
        fn write_image(&mut self, data: &[u8]) -> Result<(), RemoraError> {
            self.image = Some(data.to_vec());
            Ok(())
        }
        fn write_file_list(&mut self, paths: &[String]) -> Result<(), RemoraError> {
            self.files = Some(paths.to_vec());
            Ok(())
        }
        fn install_hook(
            &mut self,
            _notify: tokio::sync::mpsc::UnboundedSender<()>,
        ) -> Result<(), RemoraError> {
            self.hooked = true;
            Ok(())
        }
        fn uninstall_hook(&mut self) {
            self.hooked = false;
        }
    }

    fn engine_with(clipboard: FakeClipboard, capacity: usize) -> ClipboardSyncEngine {
        ClipboardSyncEngine::new(Box::new(clipboard), capacity)
    }

    #[test]
    fn probe_priority_image_then_files_then_text() {
        let clipboard = FakeClipboard {
            text: Some("text".into()),
            image: Some(vec![0xAB]),
            files: Some(vec!["/tmp/a".into()]),
            ..Default::default()
        };
        let mut engine = engine_with(clipboard, 8);
        let payload = engine.capture_local().unwrap().unwrap();
        assert!(matches!(payload.contents, ClipboardContents::Image(_)));

        let clipboard = FakeClipboard {
            text: Some("text".into()),
            files: Some(vec!["/tmp/a".into()]),
            ..Default::default()
        };
        let mut engine = engine_with(clipboard, 8);
        let payload = engine.capture_local().unwrap().unwrap();
        assert!(matches!(payload.contents, ClipboardContents::FileList(_)));

        let clipboard = FakeClipboard {
            text: Some("text".into()),
            ..Default::default()
        };
        let mut engine = engine_with(clipboard, 8);
        let payload = engine.capture_local().unwrap().unwrap();
        assert!(matches!(payload.contents, ClipboardContents::Text(_)));
    }

    #[test]
    fn empty_clipboard_yields_nothing() {
        let mut engine = engine_with(FakeClipboard::default(), 8);
        assert!(engine.capture_local().unwrap().is_none());
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn apply_remote_suppresses_echo() {
        let mut engine = engine_with(FakeClipboard::default(), 8);
        let payload = ClipboardPayload::text("from remote");
        engine.apply_remote(&payload).unwrap();

        // The platform raises a change notification for our write;
        // it must not re-enter the outbound queue.
        assert!(engine.capture_local().unwrap().is_none());
        assert_eq!(engine.pending(), 0);

        // A genuine change after the echo is captured normally.
        let captured = engine.capture_local().unwrap().unwrap();
        assert!(matches!(captured.contents, ClipboardContents::Text(_)));
        assert_eq!(engine.pending(), 1);
    }

    #[test]
    fn stale_echo_marker_does_not_swallow_changes() {
        let mut engine =
            engine_with(FakeClipboard::default(), 8).with_echo_window(Duration::ZERO);
        let payload = ClipboardPayload::text("remote");
        engine.apply_remote(&payload).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        // Marker expired; the change is treated as genuine.
        assert!(engine.capture_local().unwrap().is_some());
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let clipboard = FakeClipboard {
            text: Some("a".into()),
            ..Default::default()
        };
        let mut engine = engine_with(clipboard, 2);
        for _ in 0..3 {
            engine.capture_local().unwrap();
        }
        assert_eq!(engine.pending(), 2);
        assert_eq!(engine.dropped_count(), 1);
    }

    #[test]
    fn dequeue_is_fifo() {
        let clipboard = FakeClipboard {
            text: Some("a".into()),
            ..Default::default()
        };
        let mut engine = engine_with(clipboard, 8);
        engine.capture_local().unwrap();
        engine.capture_local().unwrap();
        assert!(engine.dequeue().is_some());
        assert!(engine.dequeue().is_some());
        assert!(engine.dequeue().is_none());
    }

    #[test]
    fn hook_is_exclusive_per_process() {
        let _guard = hook_test_lock();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut first = engine_with(FakeClipboard::default(), 8);
        first.install_hook(tx.clone()).unwrap();

        let mut second = engine_with(FakeClipboard::default(), 8);
        let err = second.install_hook(tx.clone()).err().unwrap();
        assert!(matches!(err, RemoraError::ClipboardHookHeld));

        // Released on uninstall; a new engine may then acquire it.
        first.uninstall_hook();
        let mut third = engine_with(FakeClipboard::default(), 8);
        third.install_hook(tx).unwrap();
        drop(third); // Drop releases the hook for later tests.
    }

    #[test]
    fn payload_roundtrip() {
        let payload = ClipboardPayload {
            contents: ClipboardContents::FileList(vec!["/tmp/a".into(), "/tmp/b".into()]),
            origin: PayloadOrigin::Local,
            captured_at_ms: 1_700_000_000_000,
        };
        let bytes = payload.to_bytes().unwrap();
        let decoded = ClipboardPayload::from_bytes(&bytes).unwrap();
        assert_eq!(payload, decoded);
    }
}
