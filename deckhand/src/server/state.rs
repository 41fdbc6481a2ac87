//! Server state

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::utils::{unix_now, version_info, VersionInfo};

/// Flipped once startup initialization has finished
#[derive(Debug, Default)]
pub struct Readiness {
    ready: AtomicBool,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Backend state shared across handlers
pub struct ServerState {
    pub readiness: Arc<Readiness>,
    pub greeting: String,
    pub version: VersionInfo,
    pub started_at: u64,
}

impl ServerState {
    pub fn new(readiness: Arc<Readiness>, greeting: impl Into<String>) -> Self {
        Self {
            readiness,
            greeting: greeting.into(),
            version: version_info(),
            started_at: unix_now(),
        }
    }
}
