//! Monitor enumeration and snapshots.
//!
//! The registry owns a [`MonitorSource`] collaborator and keeps an
//! immutable snapshot of the display list. The snapshot is replaced
//! wholesale on re-enumeration — readers holding an `Arc` never see a
//! partially updated list.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::RemoraError;

// ── MonitorInfo ──────────────────────────────────────────────────

/// An immutable snapshot of one display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorInfo {
    /// OS device identifier (e.g. `\\.\DISPLAY1`).
    pub device_name: String,
    /// Desktop-global X of the top-left corner.
    pub x: i32,
    /// Desktop-global Y of the top-left corner.
    pub y: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Whether the OS marks this display as primary.
    pub is_primary: bool,
}

impl MonitorInfo {
    /// Desktop-global origin of this monitor.
    pub fn origin(&self) -> (i32, i32) {
        (self.x, self.y)
    }
}

// ── MonitorSource ────────────────────────────────────────────────

/// Collaborator that enumerates the displays attached to the host.
pub trait MonitorSource: Send {
    /// Enumerate all displays currently attached.
    fn enumerate(&mut self) -> Result<Vec<MonitorInfo>, RemoraError>;
}

// ── MonitorRegistry ──────────────────────────────────────────────

/// Read-mostly registry of attached displays.
pub struct MonitorRegistry {
    source: Box<dyn MonitorSource>,
    monitors: Arc<[MonitorInfo]>,
}

impl MonitorRegistry {
    /// Create a registry and perform the initial enumeration.
    ///
    /// Fails with [`RemoraError::Startup`] if zero monitors are found —
    /// a session cannot start without at least one display.
    pub fn new(source: Box<dyn MonitorSource>) -> Result<Self, RemoraError> {
        let mut registry = Self {
            source,
            monitors: Arc::from(Vec::new()),
        };
        registry.refresh()?;
        Ok(registry)
    }

    /// Re-enumerate displays, replacing the snapshot wholesale.
    ///
    /// Returns the new monitor count. An enumeration that yields zero
    /// monitors is rejected and the previous snapshot is kept.
    pub fn refresh(&mut self) -> Result<usize, RemoraError> {
        let monitors = self.source.enumerate()?;
        if monitors.is_empty() {
            warn!("monitor enumeration returned zero displays");
            if self.monitors.is_empty() {
                return Err(RemoraError::Startup("no monitors detected".into()));
            }
            return Err(RemoraError::Other("no monitors detected".into()));
        }
        info!(count = monitors.len(), "monitor snapshot refreshed");
        self.monitors = Arc::from(monitors);
        Ok(self.monitors.len())
    }

    /// Cheap clone of the current snapshot.
    pub fn snapshot(&self) -> Arc<[MonitorInfo]> {
        Arc::clone(&self.monitors)
    }

    /// Number of monitors in the current snapshot.
    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    /// Whether the snapshot is empty (only before the first successful
    /// enumeration).
    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// Monitor at `index`, if in range.
    pub fn get(&self, index: usize) -> Option<&MonitorInfo> {
        self.monitors.get(index)
    }

    /// Validate that `index` falls inside the current snapshot.
    pub fn check_index(&self, index: usize) -> Result<(), RemoraError> {
        if index < self.monitors.len() {
            Ok(())
        } else {
            Err(RemoraError::InvalidMonitorIndex {
                index,
                count: self.monitors.len(),
            })
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSource {
        lists: Vec<Vec<MonitorInfo>>,
    }

    impl MonitorSource for FakeSource {
        fn enumerate(&mut self) -> Result<Vec<MonitorInfo>, RemoraError> {
            if self.lists.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(self.lists.remove(0))
            }
        }
    }

    fn monitor(name: &str, x: i32, primary: bool) -> MonitorInfo {
        MonitorInfo {
            device_name: name.to_string(),
            x,
            y: 0,
            width: 1920,
            height: 1080,
            is_primary: primary,
        }
    }

    #[test]
    fn zero_monitors_fails_startup() {
        let source = FakeSource { lists: vec![] };
        let err = MonitorRegistry::new(Box::new(source)).err().unwrap();
        assert!(matches!(err, RemoraError::Startup(_)));
    }

    #[test]
    fn snapshot_and_index_checks() {
        let source = FakeSource {
            lists: vec![vec![monitor("A", 0, true), monitor("B", 1920, false)]],
        };
        let registry = MonitorRegistry::new(Box::new(source)).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.check_index(1).is_ok());
        assert!(matches!(
            registry.check_index(2),
            Err(RemoraError::InvalidMonitorIndex { index: 2, count: 2 })
        ));
        assert_eq!(registry.get(0).unwrap().device_name, "A");
    }

    #[test]
    fn refresh_replaces_wholesale() {
        let source = FakeSource {
            lists: vec![
                vec![monitor("A", 0, true)],
                vec![monitor("A", 0, true), monitor("B", 1920, false)],
            ],
        };
        let mut registry = MonitorRegistry::new(Box::new(source)).unwrap();
        let before = registry.snapshot();
        assert_eq!(registry.refresh().unwrap(), 2);
        // The old snapshot is untouched; readers see either old or new.
        assert_eq!(before.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn empty_refresh_keeps_previous_snapshot() {
        let source = FakeSource {
            lists: vec![vec![monitor("A", 0, true)]],
        };
        let mut registry = MonitorRegistry::new(Box::new(source)).unwrap();
        assert!(registry.refresh().is_err());
        assert_eq!(registry.len(), 1);
    }
}
