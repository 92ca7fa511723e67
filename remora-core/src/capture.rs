//! On-demand frame capture pipeline.
//!
//! Drives the external capture/encode collaborator for a chosen
//! monitor and quality tier. Pixel acquisition and encoding stay
//! behind the [`FrameGrabber`] trait; this module owns only the
//! session-level policy around them:
//!
//! - region defaulting to the monitor's full bounds,
//! - one immediate retry per failed capture,
//! - a consecutive-failure counter that trips the pipeline into a
//!   degraded state so a stalled capturer is not hammered.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RemoraError;
use crate::monitor::MonitorInfo;
use crate::quality::QualityTier;
use crate::unix_millis;

// ── CaptureRegion ────────────────────────────────────────────────

/// A rectangle within a monitor, in monitor-relative coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureRegion {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl CaptureRegion {
    /// The full bounds of `monitor`, origin at (0, 0).
    pub fn full(monitor: &MonitorInfo) -> Self {
        Self {
            x: 0,
            y: 0,
            width: monitor.width,
            height: monitor.height,
        }
    }
}

// ── PixelBuffer ──────────────────────────────────────────────────

/// A raw, uncompressed capture as returned by the grabber.
///
/// The `data` buffer holds `height` rows of `stride` bytes each;
/// `stride` may exceed `width * 4` due to row alignment.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    /// Row pitch in bytes.
    pub stride: u32,
    /// BGRA pixel data, `stride * height` bytes.
    pub data: Vec<u8>,
}

// ── Cursor ───────────────────────────────────────────────────────

/// Coarse cursor shape classification carried alongside frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CursorKind {
    #[default]
    Default,
    Hand,
    Text,
    Cross,
    Move,
    Wait,
}

/// Cursor position and visibility at capture time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CursorState {
    pub x: i32,
    pub y: i32,
    pub visible: bool,
    pub kind: CursorKind,
}

// ── FrameGrabber ─────────────────────────────────────────────────

/// External capture/encode collaborator.
///
/// Implementations wrap the platform screen-grab and image-encode
/// primitives; the pipeline never touches pixels directly.
#[async_trait]
pub trait FrameGrabber: Send {
    /// Acquire raw pixels for `region` of the display named `device`.
    async fn capture_region(
        &mut self,
        device: &str,
        region: CaptureRegion,
    ) -> Result<PixelBuffer, RemoraError>;

    /// Compress a raw buffer using a 0–100 quality parameter.
    async fn encode(&mut self, buffer: &PixelBuffer, quality: u8) -> Result<Vec<u8>, RemoraError>;

    /// Current cursor position and shape.
    async fn query_cursor(&mut self) -> Result<CursorState, RemoraError>;
}

// ── CompressedFrame ──────────────────────────────────────────────

/// A compressed frame ready to hand to the transport layer.
///
/// Immutable after creation; produced once per capture call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompressedFrame {
    /// Encoded image payload.
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Index of the monitor this frame was captured from.
    pub monitor_index: usize,
    /// Cursor snapshot at capture time.
    pub cursor: CursorState,
    /// Quality tier the encoder was driven with.
    pub tier: QualityTier,
    /// Capture timestamp, Unix milliseconds.
    pub captured_at_ms: u64,
}

impl CompressedFrame {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RemoraError> {
        bincode::serialize(self).map_err(|e| RemoraError::Encoding(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RemoraError> {
        bincode::deserialize(bytes).map_err(|e| RemoraError::Encoding(e.to_string()))
    }
}

// ── CapturePipeline ──────────────────────────────────────────────

/// Per-session capture driver with retry and degradation policy.
pub struct CapturePipeline {
    grabber: Box<dyn FrameGrabber>,
    consecutive_failures: u32,
    failure_threshold: u32,
    degraded: bool,
}

impl CapturePipeline {
    /// Create a pipeline over `grabber`.
    ///
    /// `failure_threshold` consecutive failed captures (each already
    /// retried once) trip the pipeline into the degraded state.
    pub fn new(grabber: Box<dyn FrameGrabber>, failure_threshold: u32) -> Self {
        Self {
            grabber,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
            degraded: false,
        }
    }

    /// Capture and encode one frame from `monitor`.
    ///
    /// `region` defaults to the monitor's full bounds. A single
    /// failure triggers one immediate retry; persistent failure
    /// returns [`RemoraError::CaptureFailure`] and counts toward the
    /// degradation threshold. While degraded, calls short-circuit with
    /// [`RemoraError::DegradedCapture`] until [`resume`](Self::resume).
    pub async fn capture(
        &mut self,
        monitor: &MonitorInfo,
        monitor_index: usize,
        region: Option<CaptureRegion>,
        tier: QualityTier,
    ) -> Result<CompressedFrame, RemoraError> {
        if self.degraded {
            return Err(RemoraError::DegradedCapture);
        }

        let region = region.unwrap_or_else(|| CaptureRegion::full(monitor));
        let quality = tier.compression_param();

        let data = match self.attempt(monitor, region, quality).await {
            Ok(data) => data,
            Err(first) => {
                warn!(error = %first, "capture attempt failed; retrying once");
                match self.attempt(monitor, region, quality).await {
                    Ok(data) => data,
                    Err(second) => {
                        self.consecutive_failures += 1;
                        if self.consecutive_failures >= self.failure_threshold {
                            self.degraded = true;
                            warn!(
                                failures = self.consecutive_failures,
                                "capture degraded; further calls short-circuit until resume"
                            );
                        }
                        return Err(RemoraError::CaptureFailure(second.to_string()));
                    }
                }
            }
        };

        self.consecutive_failures = 0;

        // A cursor query failure is not worth failing the frame over;
        // fall back to a hidden cursor.
        let cursor = match self.grabber.query_cursor().await {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "cursor query failed; reporting hidden cursor");
                CursorState::default()
            }
        };

        Ok(CompressedFrame {
            data,
            width: region.width,
            height: region.height,
            monitor_index,
            cursor,
            tier,
            captured_at_ms: unix_millis(),
        })
    }

    /// Clear the degraded state and failure counter.
    pub fn resume(&mut self) {
        self.degraded = false;
        self.consecutive_failures = 0;
    }

    /// Whether the pipeline is currently degraded.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Consecutive failed captures since the last success or resume.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    // ── Internal ─────────────────────────────────────────────────

    /// One acquire-and-encode attempt.
    async fn attempt(
        &mut self,
        monitor: &MonitorInfo,
        region: CaptureRegion,
        quality: u8,
    ) -> Result<Vec<u8>, RemoraError> {
        let raw = self
            .grabber
            .capture_region(&monitor.device_name, region)
            .await?;
        self.grabber.encode(&raw, quality).await
    }
}

// ── Tests ────────────────────────────────────────────────────────
