//! Adaptive stream quality control.
//!
//! Network-health samples feed a small hysteresis state machine: the
//! tier steps down one level the moment a sample crosses a degradation
//! threshold, but steps back up only after a run of consecutive
//! healthy samples. The asymmetric response keeps the stream from
//! oscillating between tiers on a flappy link.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RemoraError;

// ── QualityTier ──────────────────────────────────────────────────

/// Discrete compression-aggressiveness levels, lowest to highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum QualityTier {
    Low,
    Medium,
    #[default]
    High,
    Ultra,
}

impl QualityTier {
    /// Numeric compression parameter on a 0–100 scale, handed to the
    /// encode collaborator.
    pub const fn compression_param(self) -> u8 {
        match self {
            QualityTier::Low => 30,
            QualityTier::Medium => 60,
            QualityTier::High => 85,
            QualityTier::Ultra => 95,
        }
    }

    /// One tier down, saturating at `Low`.
    pub const fn step_down(self) -> QualityTier {
        match self {
            QualityTier::Low | QualityTier::Medium => QualityTier::Low,
            QualityTier::High => QualityTier::Medium,
            QualityTier::Ultra => QualityTier::High,
        }
    }

    /// One tier up, saturating at `Ultra`.
    pub const fn step_up(self) -> QualityTier {
        match self {
            QualityTier::Low => QualityTier::Medium,
            QualityTier::Medium => QualityTier::High,
            QualityTier::High | QualityTier::Ultra => QualityTier::Ultra,
        }
    }
}

// ── NetworkSample ────────────────────────────────────────────────

/// One periodic network-health observation from the transport layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct NetworkSample {
    /// Measured round-trip time in milliseconds.
    pub rtt_ms: u32,
    /// Observed loss percentage (0.0–100.0).
    pub loss_pct: f32,
}

impl NetworkSample {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RemoraError> {
        bincode::serialize(self).map_err(|e| RemoraError::Encoding(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RemoraError> {
        bincode::deserialize(bytes).map_err(|e| RemoraError::Encoding(e.to_string()))
    }
}

// ── QualityConfig ────────────────────────────────────────────────

/// Tunables for the hysteresis state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// A sample with RTT at or above this is unhealthy.
    pub degrade_rtt_ms: u32,
    /// A sample with loss at or above this is unhealthy.
    pub degrade_loss_pct: f32,
    /// Consecutive healthy samples required before stepping up.
    pub recover_samples: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            degrade_rtt_ms: 200,
            degrade_loss_pct: 5.0,
            recover_samples: 5,
        }
    }
}

// ── QualityAdapter ───────────────────────────────────────────────

/// Maps network feedback onto a [`QualityTier`] with hysteresis.
///
/// Automatic adjustment always moves a single step at a time; a
/// manual [`set_tier`](Self::set_tier) is unrestricted and becomes the
/// new baseline for subsequent automatic recomputes.
pub struct QualityAdapter {
    tier: QualityTier,
    healthy_streak: u32,
    adaptive: bool,
    config: QualityConfig,
}

impl QualityAdapter {
    /// Create an adapter starting at `initial` with the given tunables.
    pub fn new(initial: QualityTier, config: QualityConfig) -> Self {
        Self {
            tier: initial,
            healthy_streak: 0,
            adaptive: true,
            config,
        }
    }

    /// Record one feedback sample and return the (possibly adjusted)
    /// current tier.
    ///
    /// No-op while adaptive mode is disabled.
    pub fn record_feedback(&mut self, sample: &NetworkSample) -> QualityTier {
        if !self.adaptive {
            return self.tier;
        }

        let unhealthy = sample.rtt_ms >= self.config.degrade_rtt_ms
            || sample.loss_pct >= self.config.degrade_loss_pct;

        if unhealthy {
            self.healthy_streak = 0;
            let next = self.tier.step_down();
            if next != self.tier {
                debug!(
                    rtt_ms = sample.rtt_ms,
                    loss_pct = sample.loss_pct,
                    from = ?self.tier,
                    to = ?next,
                    "quality stepped down"
                );
                self.tier = next;
            }
        } else {
            self.healthy_streak += 1;
            if self.healthy_streak >= self.config.recover_samples {
                self.healthy_streak = 0;
                let next = self.tier.step_up();
                if next != self.tier {
                    debug!(from = ?self.tier, to = ?next, "quality stepped up");
                    self.tier = next;
                }
            }
        }

        self.tier
    }

    /// Current quality tier.
    pub fn current_tier(&self) -> QualityTier {
        self.tier
    }

    /// Manual override — takes effect immediately and is the new
    /// baseline for automatic adjustment.
    pub fn set_tier(&mut self, tier: QualityTier) {
        info!(?tier, "quality tier set manually");
        self.tier = tier;
        self.healthy_streak = 0;
    }

    /// Enable or disable automatic adjustment.
    pub fn set_adaptive(&mut self, enabled: bool) {
        self.adaptive = enabled;
        self.healthy_streak = 0;
    }

    /// Whether automatic adjustment is active.
    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }
}

// ── Tests ────────────────────────────────────────────────────────
