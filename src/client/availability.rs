// Store availability tracking
// Remembers that the persistent layer failed so later calls skip it until a
// probe sees it healthy again.
// Author: kelexine (https://github.com/kelexine)

use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityStatus {
    Healthy,
    Failed,
}

impl AvailabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityStatus::Healthy => "healthy",
            AvailabilityStatus::Failed => "failed",
        }
    }
}

/// Durable "persistent layer previously failed" flag.
///
/// With a path the flag survives restarts as a small file holding `true` or
/// `false`; without one it lives in memory only. Write failures are logged
/// and the in-memory value stays authoritative.
///
/// The file write is a synchronous write of a few bytes, made only when the
/// status actually changes and never while the status lock is held.
#[derive(Debug, Clone)]
pub struct StickyFailureFlag {
    path: Option<PathBuf>,
    status: Arc<RwLock<AvailabilityStatus>>,
    file: Arc<Mutex<()>>,
}

impl StickyFailureFlag {
    /// Flag backed by `path`, initialized from its current content.
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let status = match std::fs::read_to_string(&path) {
            Ok(contents) if contents.trim() == "true" => AvailabilityStatus::Failed,
            _ => AvailabilityStatus::Healthy,
        };
        if status == AvailabilityStatus::Failed {
            debug!("Store failure flag restored from {}", path.display());
        }
        Self {
            path: Some(path),
            status: Arc::new(RwLock::new(status)),
            file: Arc::new(Mutex::new(())),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            status: Arc::new(RwLock::new(AvailabilityStatus::Healthy)),
            file: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_path(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::persistent(path),
            None => Self::in_memory(),
        }
    }

    pub fn is_set(&self) -> bool {
        *self.status.read() == AvailabilityStatus::Failed
    }

    pub fn status(&self) -> AvailabilityStatus {
        *self.status.read()
    }

    /// Mark the store as failed. Returns whether the flag changed.
    pub fn set(&self, reason: &str) -> bool {
        let changed = self.transition(AvailabilityStatus::Failed);
        if changed {
            warn!("Marking image store as FAILED: {}", reason);
        }
        changed
    }

    /// Mark the store as healthy. Returns whether the flag changed.
    pub fn clear(&self) -> bool {
        let changed = self.transition(AvailabilityStatus::Healthy);
        if changed {
            debug!("Marking image store as HEALTHY");
        }
        changed
    }

    fn transition(&self, next: AvailabilityStatus) -> bool {
        {
            let mut status = self.status.write();
            if *status == next {
                return false;
            }
            *status = next;
        }
        self.persist();
        true
    }

    /// Write the current status. Writers are serialized and each one reads
    /// the status under the file lock, so the last write is always current.
    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let _file = self.file.lock();
        let status = self.status();
        let value = if status == AvailabilityStatus::Failed { "true" } else { "false" };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, value) {
            warn!("Could not persist store failure flag to {}: {}", path.display(), e);
        }
    }
}
