//! Outcome of the most recent reload attempt

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The latest content was applied (or nothing has changed since startup)
    Applied { fingerprint: String },
    /// The latest content was rejected; the previous chains remain active
    Rejected { fingerprint: String, message: String },
}

/// Shared view of the watcher's progress, read by the liveness endpoint.
#[derive(Debug)]
pub struct ReloadStatus {
    outcome: RwLock<Option<(ReloadOutcome, DateTime<Utc>)>>,
    rebuilds: AtomicU64,
    rejections: AtomicU64,
}

impl Default for ReloadStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadStatus {
    pub fn new() -> Self {
        Self { outcome: RwLock::new(None), rebuilds: AtomicU64::new(0), rejections: AtomicU64::new(0) }
    }

    pub(crate) fn record_applied(&self, fingerprint: String) {
        self.rebuilds.fetch_add(1, Ordering::SeqCst);
        *self.outcome.write() = Some((ReloadOutcome::Applied { fingerprint }, Utc::now()));
    }

    pub(crate) fn record_rejected(&self, fingerprint: String, message: String) {
        self.rejections.fetch_add(1, Ordering::SeqCst);
        *self.outcome.write() =
            Some((ReloadOutcome::Rejected { fingerprint, message }, Utc::now()));
    }

    /// `Ok` unless the latest attempt was rejected.
    pub fn check(&self) -> Result<(), String> {
        match self.outcome.read().as_ref() {
            Some((ReloadOutcome::Rejected { message, .. }, _)) => Err(message.clone()),
            _ => Ok(()),
        }
    }

    pub fn last_outcome(&self) -> Option<(ReloadOutcome, DateTime<Utc>)> {
        self.outcome.read().clone()
    }

    /// Successful chain rebuilds since startup.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds.load(Ordering::SeqCst)
    }

    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::SeqCst)
    }
}
