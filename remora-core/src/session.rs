//! Session lifecycle and orchestration.
//!
//! The [`SessionController`] owns every per-session subsystem — monitor
//! registry, capture pipeline, quality adapter, clipboard engine, file
//! streams, input dispatch, and (optionally) audio — and sequences
//! their lifecycles. All platform specifics arrive through the
//! [`SessionBackend`] collaborator bundle, so the controller itself is
//! host-agnostic and fully testable with fakes.
//!
//! State machine: `Active` → (`Degraded` ⇄ `Active`) → `Ended`.
//! `Ended` is terminal; teardown is idempotent and releases clipboard
//! hook, open transfers, and audio device regardless of how the
//! session ends.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::audio::{AudioChunk, AudioSource, AudioStreamer};
use crate::capture::{CaptureRegion, CapturePipeline, CompressedFrame, FrameGrabber};
use crate::clipboard::{ClipboardAccess, ClipboardPayload, ClipboardSyncEngine};
use crate::error::RemoraError;
use crate::flags::SessionFeatures;
use crate::input::{InputDispatcher, InputEvent, InputSink};
use crate::monitor::{MonitorInfo, MonitorRegistry, MonitorSource};
use crate::quality::{NetworkSample, QualityAdapter, QualityConfig, QualityTier};
use crate::transfer::{FileStreamManager, StreamStorage, TransferReceipt};

// ── Configuration ────────────────────────────────────────────────

/// Per-session tunables, fixed at start.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Feature toggles for this session.
    pub features: SessionFeatures,
    /// Quality tier the session starts at.
    pub initial_quality: QualityTier,
    /// Monitor streamed first.
    pub initial_monitor: usize,
    /// Consecutive capture failures before the pipeline degrades.
    pub capture_failure_threshold: u32,
    /// Bound on the outbound clipboard queue.
    pub clipboard_queue_capacity: usize,
    /// Hysteresis tunables for quality adaptation.
    pub quality: QualityConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            features: SessionFeatures::default(),
            initial_quality: QualityTier::default(),
            initial_monitor: 0,
            capture_failure_threshold: 3,
            clipboard_queue_capacity: crate::clipboard::DEFAULT_QUEUE_CAPACITY,
            quality: QualityConfig::default(),
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Streaming normally.
    Active,
    /// Capture subsystem tripped; other subsystems keep working.
    Degraded,
    /// Terminal. Every operation except teardown is refused.
    Ended,
}

// ── Backend bundle ───────────────────────────────────────────────

/// Platform collaborators a session is built from.
///
/// `audio` may be `None` when the host has no loopback device; the
/// audio feature then cannot be enabled.
pub struct SessionBackend {
    pub monitors: Box<dyn MonitorSource>,
    pub grabber: Box<dyn FrameGrabber>,
    pub clipboard: Box<dyn ClipboardAccess>,
    pub input: Box<dyn InputSink>,
    pub storage: Box<dyn StreamStorage>,
    pub audio: Option<Box<dyn AudioSource>>,
}

// ── SessionController ────────────────────────────────────────────

/// Owns and sequences all per-session subsystems.
pub struct SessionController {
    id: u64,
    started_at_ms: u64,
    features: SessionFeatures,
    state: SessionState,
    registry: MonitorRegistry,
    current_monitor: usize,
    pipeline: CapturePipeline,
    adapter: QualityAdapter,
    clipboard: ClipboardSyncEngine,
    clipboard_rx: Option<mpsc::UnboundedReceiver<()>>,
    dispatcher: InputDispatcher,
    transfers: FileStreamManager,
    audio: Option<AudioStreamer>,
}

impl SessionController {
    /// Start a session: enumerate monitors, validate the initial
    /// monitor index, install the clipboard hook and start audio
    /// capture when those features are enabled.
    ///
    /// Fails with [`RemoraError::Startup`] when no monitor is attached
    /// or an enabled feature cannot be brought up; nothing leaks on
    /// the failure paths (subsystem drops release their resources).
    pub fn start(backend: SessionBackend, config: SessionConfig) -> Result<Self, RemoraError> {
        let registry = MonitorRegistry::new(backend.monitors)?;
        registry.check_index(config.initial_monitor)?;

        let mut adapter = QualityAdapter::new(config.initial_quality, config.quality.clone());
        adapter.set_adaptive(config.features.contains(SessionFeatures::ADAPTIVE_QUALITY));

        let mut clipboard =
            ClipboardSyncEngine::new(backend.clipboard, config.clipboard_queue_capacity);
        let clipboard_rx = if config.features.contains(SessionFeatures::CLIPBOARD_SYNC) {
            let (tx, rx) = mpsc::unbounded_channel();
            clipboard.install_hook(tx)?;
            Some(rx)
        } else {
            None
        };

        let audio = if config.features.contains(SessionFeatures::AUDIO) {
            let source = backend.audio.ok_or_else(|| {
                RemoraError::Startup("audio feature enabled but no capture device".into())
            })?;
            let mut streamer = AudioStreamer::new(source);
            streamer.start()?;
            Some(streamer)
        } else {
            None
        };

        static NEXT_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
        let id = NEXT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        info!(
            session = id,
            features = ?config.features,
            monitor = config.initial_monitor,
            quality = ?config.initial_quality,
            monitors = registry.len(),
            "session started"
        );

        Ok(Self {
            id,
            started_at_ms: crate::unix_millis(),
            features: config.features,
            state: SessionState::Active,
            registry,
            current_monitor: config.initial_monitor,
            pipeline: CapturePipeline::new(backend.grabber, config.capture_failure_threshold),
            adapter,
            clipboard,
            clipboard_rx,
            dispatcher: InputDispatcher::new(backend.input),
            transfers: FileStreamManager::new(backend.storage),
            audio,
        })
    }

    /// Tear the session down: abort open transfers, release the
    /// clipboard hook, stop audio. Idempotent and infallible — cleanup
    /// problems are logged, never surfaced.
    pub async fn end(&mut self) {
        if self.state == SessionState::Ended {
            return;
        }
        self.state = SessionState::Ended;
        self.transfers.abort_all().await;
        self.clipboard.uninstall_hook();
        self.clipboard_rx = None;
        if let Some(audio) = &mut self.audio {
            audio.stop();
        }
        info!(session = self.id, "session ended");
    }

    /// Session identifier, unique within this process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Session start time, milliseconds since the Unix epoch.
    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn check_live(&self) -> Result<(), RemoraError> {
        if self.state == SessionState::Ended {
            Err(RemoraError::SessionEnded)
        } else {
            Ok(())
        }
    }

    fn check_feature(&self, feature: SessionFeatures, name: &'static str) -> Result<(), RemoraError> {
        if self.features.contains(feature) {
            Ok(())
        } else {
            Err(RemoraError::FeatureDisabled(name))
        }
    }

    // ── Monitors ─────────────────────────────────────────────────

    /// Snapshot of the attached monitors.
    pub fn monitors(&self) -> std::sync::Arc<[MonitorInfo]> {
        self.registry.snapshot()
    }

    /// Index of the monitor currently streamed.
    pub fn current_monitor(&self) -> usize {
        self.current_monitor
    }

    /// Switch the streamed monitor. Validates before mutating: on an
    /// out-of-range index the current selection is untouched.
    pub fn switch_monitor(&mut self, index: usize) -> Result<(), RemoraError> {
        self.check_live()?;
        self.registry.check_index(index)?;
        self.current_monitor = index;
        info!(monitor = index, "switched streamed monitor");
        Ok(())
    }

    /// Re-enumerate monitors (hotplug). If the streamed monitor index
    /// no longer exists, selection falls back to monitor 0.
    pub fn refresh_monitors(&mut self) -> Result<usize, RemoraError> {
        self.check_live()?;
        let count = self.registry.refresh()?;
        if self.current_monitor >= count {
            warn!(
                old = self.current_monitor,
                "streamed monitor disappeared; falling back to monitor 0"
            );
            self.current_monitor = 0;
        }
        Ok(count)
    }

    // ── Capture ──────────────────────────────────────────────────

    /// Capture and encode one frame from the streamed monitor.
    ///
    /// `tier` overrides the adapter's current tier for this frame
    /// only. Persistent capture failure moves the session to
    /// [`SessionState::Degraded`].
    pub async fn capture_frame(
        &mut self,
        region: Option<CaptureRegion>,
        tier: Option<QualityTier>,
    ) -> Result<CompressedFrame, RemoraError> {
        self.check_live()?;
        let monitor = self
            .registry
            .get(self.current_monitor)
            .ok_or(RemoraError::InvalidMonitorIndex {
                index: self.current_monitor,
                count: self.registry.len(),
            })?
            .clone();
        let tier = tier.unwrap_or_else(|| self.adapter.current_tier());

        let result = self
            .pipeline
            .capture(&monitor, self.current_monitor, region, tier)
            .await;
        if self.pipeline.is_degraded() && self.state == SessionState::Active {
            self.state = SessionState::Degraded;
            warn!("session degraded: capture pipeline tripped");
        }
        result
    }

    /// Clear capture degradation and return to `Active`.
    pub fn resume(&mut self) -> Result<(), RemoraError> {
        self.check_live()?;
        self.pipeline.resume();
        if self.state == SessionState::Degraded {
            self.state = SessionState::Active;
            info!("session resumed from degraded state");
        }
        Ok(())
    }

    // ── Quality ──────────────────────────────────────────────────

    /// Feed one network-health sample; returns the resulting tier.
    pub fn record_network_feedback(&mut self, sample: &NetworkSample) -> QualityTier {
        self.adapter.record_feedback(sample)
    }

    /// Manually pin the quality tier.
    pub fn set_quality(&mut self, tier: QualityTier) {
        self.adapter.set_tier(tier);
    }

    /// Current quality tier.
    pub fn quality_tier(&self) -> QualityTier {
        self.adapter.current_tier()
    }

    /// Enable or disable automatic quality adjustment.
    pub fn set_adaptive_quality(&mut self, enabled: bool) {
        self.adapter.set_adaptive(enabled);
    }

    // ── Clipboard ────────────────────────────────────────────────

    /// Take the change-notification receiver (once). The session
    /// driver selects on it to learn when to call
    /// [`poll_clipboard`](Self::poll_clipboard).
    pub fn take_clipboard_events(&mut self) -> Option<mpsc::UnboundedReceiver<()>> {
        self.clipboard_rx.take()
    }

    /// Read the local clipboard after a change notification.
    pub fn poll_clipboard(&mut self) -> Result<Option<ClipboardPayload>, RemoraError> {
        self.check_live()?;
        self.check_feature(SessionFeatures::CLIPBOARD_SYNC, "clipboard sync")?;
        self.clipboard.capture_local()
    }

    /// Write a remote peer's clipboard payload locally.
    pub fn apply_remote_clipboard(&mut self, payload: &ClipboardPayload) -> Result<(), RemoraError> {
        self.check_live()?;
        self.check_feature(SessionFeatures::CLIPBOARD_SYNC, "clipboard sync")?;
        self.clipboard.apply_remote(payload)
    }

    /// Pop the oldest outbound clipboard payload for the transport.
    pub fn dequeue_clipboard(&mut self) -> Option<ClipboardPayload> {
        self.clipboard.dequeue()
    }

    /// Payloads dropped to clipboard queue overflow.
    pub fn clipboard_drops(&self) -> u64 {
        self.clipboard.dropped_count()
    }

    // ── File streams ─────────────────────────────────────────────

    /// Open an inbound file stream; returns its id.
    pub async fn start_file_stream(
        &mut self,
        name: &str,
        total_size: u64,
    ) -> Result<u64, RemoraError> {
        self.check_live()?;
        self.check_feature(SessionFeatures::FILE_STREAMING, "file streaming")?;
        self.transfers.start_stream(name, total_size).await
    }

    /// Write one chunk of an inbound file stream.
    pub async fn write_file_chunk(
        &mut self,
        id: u64,
        data: &[u8],
        offset: u64,
    ) -> Result<(), RemoraError> {
        self.check_live()?;
        self.check_feature(SessionFeatures::FILE_STREAMING, "file streaming")?;
        self.transfers.write_chunk(id, data, offset).await
    }

    /// Finalize an inbound file stream into `destination`.
    pub async fn complete_file_stream(
        &mut self,
        id: u64,
        destination: &std::path::Path,
    ) -> Result<TransferReceipt, RemoraError> {
        self.check_live()?;
        self.check_feature(SessionFeatures::FILE_STREAMING, "file streaming")?;
        self.transfers.complete_stream(id, destination).await
    }

    /// Cancel an inbound file stream. Idempotent.
    pub async fn abort_file_stream(&mut self, id: u64) -> Result<(), RemoraError> {
        self.check_live()?;
        self.check_feature(SessionFeatures::FILE_STREAMING, "file streaming")?;
        self.transfers.abort_stream(id).await;
        Ok(())
    }

    /// Open inbound file streams.
    pub fn active_file_streams(&self) -> usize {
        self.transfers.active_count()
    }

    // ── Input ────────────────────────────────────────────────────

    /// Inject one remote input event, translated to the streamed
    /// monitor's desktop origin.
    pub fn dispatch_input(&mut self, event: &InputEvent) -> Result<(), RemoraError> {
        self.check_live()?;
        let origin = self
            .registry
            .get(self.current_monitor)
            .map(MonitorInfo::origin)
            .unwrap_or((0, 0));
        self.dispatcher.dispatch(event, origin)
    }

    // ── Audio ────────────────────────────────────────────────────

    /// Pull the next captured audio chunk, if any.
    pub fn capture_audio(&mut self) -> Result<Option<AudioChunk>, RemoraError> {
        self.check_live()?;
        self.check_feature(SessionFeatures::AUDIO, "audio")?;
        match &mut self.audio {
            Some(streamer) => streamer.capture_chunk(),
            None => Ok(None),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
