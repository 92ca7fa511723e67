//! Configuration for the remora host agent.

use std::path::Path;

use serde::{Deserialize, Serialize};

use remora_core::{QualityConfig, QualityTier, SessionConfig, SessionFeatures};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Per-session behaviour.
    pub session: SessionSettings,
    /// Quality adaptation tuning.
    pub quality: QualitySettings,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind the control listener on.
    pub bind_addr: String,
    /// TCP port for viewer connections.
    pub port: u16,
}

/// Session behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Mirror clipboard changes between the peers.
    pub clipboard_sync: bool,
    /// Accept inbound file transfers.
    pub file_streaming: bool,
    /// Stream desktop audio (44.1 kHz stereo PCM).
    pub audio: bool,
    /// Monitor index streamed first (0 = primary enumeration order).
    pub monitor_index: usize,
    /// Consecutive capture failures before the session degrades.
    pub capture_failure_threshold: u32,
    /// Bound on the outbound clipboard queue.
    pub clipboard_queue_capacity: usize,
    /// Directory inbound file streams are assembled in. Empty means
    /// the OS temp directory.
    pub stream_dir: String,
}

/// Quality adaptation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    /// Starting tier: "low", "medium", "high", "ultra".
    pub initial: String,
    /// Adjust the tier automatically from network feedback.
    pub adaptive: bool,
    /// RTT (ms) at or above which a sample counts as unhealthy.
    pub degrade_rtt_ms: u32,
    /// Loss (%) at or above which a sample counts as unhealthy.
    pub degrade_loss_pct: f32,
    /// Consecutive healthy samples required before stepping up.
    pub recover_samples: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            session: SessionSettings::default(),
            quality: QualitySettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: 7461,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            clipboard_sync: true,
            file_streaming: true,
            audio: false,
            monitor_index: 0,
            capture_failure_threshold: 3,
            clipboard_queue_capacity: 32,
            stream_dir: String::new(),
        }
    }
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            initial: "high".into(),
            adaptive: true,
            degrade_rtt_ms: 200,
            degrade_loss_pct: 5.0,
            recover_samples: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AgentConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let cfg = Self::default();
        let text = toml::to_string_pretty(&cfg).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Translate into the core session configuration.
    pub fn to_session_config(&self) -> SessionConfig {
        let mut features = SessionFeatures::empty();
        if self.session.clipboard_sync {
            features |= SessionFeatures::CLIPBOARD_SYNC;
        }
        if self.session.file_streaming {
            features |= SessionFeatures::FILE_STREAMING;
        }
        if self.session.audio {
            features |= SessionFeatures::AUDIO;
        }
        if self.quality.adaptive {
            features |= SessionFeatures::ADAPTIVE_QUALITY;
        }

        let initial_quality = match self.quality.initial.to_ascii_lowercase().as_str() {
            "low" => QualityTier::Low,
            "medium" => QualityTier::Medium,
            "ultra" => QualityTier::Ultra,
            _ => QualityTier::High,
        };

        SessionConfig {
            features,
            initial_quality,
            initial_monitor: self.session.monitor_index,
            capture_failure_threshold: self.session.capture_failure_threshold.max(1),
            clipboard_queue_capacity: self.session.clipboard_queue_capacity.max(1),
            quality: QualityConfig {
                degrade_rtt_ms: self.quality.degrade_rtt_ms,
                degrade_loss_pct: self.quality.degrade_loss_pct,
                recover_samples: self.quality.recover_samples.max(1),
            },
        }
    }

    /// Directory inbound streams are assembled in.
    pub fn stream_dir(&self) -> std::path::PathBuf {
        if self.session.stream_dir.is_empty() {
            std::env::temp_dir().join("remora-streams")
        } else {
            std::path::PathBuf::from(&self.session.stream_dir)
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
