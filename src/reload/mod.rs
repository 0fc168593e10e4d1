//! # Hot Reload
//!
//! Watches the encryption configuration file and swaps the registry to each
//! new valid version without restarting the process.

pub mod status;
pub mod watcher;

pub use status::{ReloadOutcome, ReloadStatus};
pub use watcher::{load_initial, ConfigWatcher, PollOutcome};
