//! Content-fingerprint config watcher
//!
//! Each tick re-reads the configuration path (following symlinks) and hashes
//! it. Any way of producing new content, in-place truncate, unlink and
//! recreate, rename over the path, or retargeting a symlink, shows up as a
//! different fingerprint. A new fingerprint must hold steady for the debounce
//! period before it is parsed and applied.

use super::status::ReloadStatus;
use crate::config::encryption::{self, ValidatedConfig};
use crate::config::ReloadConfig;
use crate::errors::{EncryptionError, Result};
use crate::observability::metrics;
use crate::registry::ProviderRegistry;
use futures::FutureExt;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// What one poll observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Content matches the last attempted fingerprint
    Unchanged,
    /// New content is waiting out the debounce period
    Pending,
    /// New content was applied as this registry generation
    Reloaded(u64),
    /// New content failed to parse or build; the previous chains stay active
    Rejected(String),
    /// The path could not be read this tick
    Unreadable,
}

#[derive(Debug)]
struct PendingChange {
    fingerprint: String,
    first_seen: Instant,
}

pub struct ConfigWatcher {
    path: PathBuf,
    registry: Arc<ProviderRegistry>,
    status: Arc<ReloadStatus>,
    poll_interval: Duration,
    debounce: Duration,
    last_attempted: Option<String>,
    pending: Option<PendingChange>,
}

impl ConfigWatcher {
    /// Watch `path`, treating the registry's current fingerprint as applied.
    pub fn new(path: impl Into<PathBuf>, registry: Arc<ProviderRegistry>, config: &ReloadConfig) -> Self {
        let last_attempted = registry.snapshot().fingerprint().map(str::to_string);
        Self {
            path: path.into(),
            registry,
            status: Arc::new(ReloadStatus::new()),
            poll_interval: config.poll_interval(),
            debounce: config.debounce(),
            last_attempted,
            pending: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Handle the liveness endpoint reads.
    pub fn status(&self) -> Arc<ReloadStatus> {
        Arc::clone(&self.status)
    }

    /// Check the file once.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) => {
                // Expected briefly between unlink and recreate.
                debug!(path = %self.path.display(), error = %e, "Encryption config unreadable");
                self.pending = None;
                return PollOutcome::Unreadable;
            }
        };

        let fingerprint = encryption::fingerprint(&data);
        if self.last_attempted.as_deref() == Some(fingerprint.as_str()) {
            self.pending = None;
            return PollOutcome::Unchanged;
        }

        let pending_since = self
            .pending
            .as_ref()
            .filter(|pending| pending.fingerprint == fingerprint)
            .map(|pending| pending.first_seen);
        let settled = match pending_since {
            Some(first_seen) => first_seen.elapsed() >= self.debounce,
            None => {
                debug!(path = %self.path.display(), fingerprint = %fingerprint, "Encryption config changed");
                self.pending =
                    Some(PendingChange { fingerprint: fingerprint.clone(), first_seen: Instant::now() });
                self.debounce.is_zero()
            }
        };
        if !settled {
            return PollOutcome::Pending;
        }

        self.pending = None;
        self.last_attempted = Some(fingerprint.clone());
        let span = crate::reload_span!(self.path.display(), fingerprint = %fingerprint);
        self.reload(&data, fingerprint).instrument(span).await
    }

    async fn reload(&self, data: &[u8], fingerprint: String) -> PollOutcome {
        match self.build(data) {
            Ok(generation) => {
                metrics::record_config_reload(true);
                self.status.record_applied(fingerprint);
                info!(generation, "Encryption config reloaded");
                PollOutcome::Reloaded(generation)
            }
            Err(e) => {
                metrics::record_config_reload(false);
                let message = e.to_string();
                warn!(error = %message, "Rejected encryption config, keeping previous providers");
                self.status.record_rejected(fingerprint, message.clone());
                PollOutcome::Rejected(message)
            }
        }
    }

    /// Parse and apply `data`. A panic anywhere in the rebuild is reported as
    /// an error so the watcher keeps running on the previous generation.
    fn build(&self, data: &[u8]) -> Result<u64> {
        catch_unwind(AssertUnwindSafe(|| {
            let config: ValidatedConfig = encryption::parse(data)?;
            self.registry.apply(&config)
        }))
        .unwrap_or_else(|panic| {
            Err(EncryptionError::internal(format!(
                "config rebuild panicked: {}",
                panic_message(panic.as_ref())
            )))
        })
    }

    /// Poll until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            path = %self.path.display(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            debounce_ms = self.debounce.as_millis() as u64,
            "Config watcher started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Config watcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }

    /// Run on a background task.
    ///
    /// If the task dies it is recorded as a rejection, so the liveness
    /// endpoint stops reporting a healthy reload loop.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        let status = self.status();
        tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(self.run(cancel)).catch_unwind().await {
                let message = format!("config watcher stopped: {}", panic_message(panic.as_ref()));
                error!(error = %message, "Config watcher task panicked");
                status.record_rejected(String::new(), message);
            }
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Load the initial configuration. Unlike reloads, failure here is fatal.
pub fn load_initial(path: &Path, registry: &ProviderRegistry) -> Result<u64> {
    let config = encryption::load(path)?;
    registry.apply(&config)
}
