//! # Storage
//!
//! The byte-oriented key-value seam the engine encrypts in front of, an
//! in-memory implementation, and the transforming wrapper that applies the
//! active provider chain to every record.

pub mod memory;
pub mod transforming;

pub use memory::MemoryStore;
pub use transforming::TransformingStore;

use crate::errors::Result;
use async_trait::async_trait;

/// Opaque byte store keyed by storage path.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Every record whose key starts with `prefix`, in key order.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}
