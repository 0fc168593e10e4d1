//! # kms-envelope
//!
//! Envelope encryption for records held in a key-value store. Each record is
//! sealed with a fresh data encryption key (DEK); the DEK itself is wrapped by
//! an external KMS plugin and stored alongside the ciphertext.
//!
//! ## Architecture
//!
//! ```text
//! EncryptionConfiguration file ─► ConfigWatcher ─► ProviderRegistry (snapshot)
//!                                                       │
//!   TransformingStore ◄── TransformerChain ◄── EnvelopeTransformer ─► KMS plugin (gRPC)
//!                                                       │
//!                                  KmsHealthAggregator ─► /healthz endpoints
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use kms_envelope::{config::encryption, kms::GrpcConnector, registry::ProviderRegistry};
//! use std::sync::Arc;
//!
//! # async fn run() -> kms_envelope::Result<()> {
//! let config = encryption::load(std::path::Path::new("/etc/kms/encryption.yaml"))?;
//! let registry = ProviderRegistry::with_config(Arc::new(GrpcConnector), &config)?;
//! let sealed = registry
//!     .active_chain("secrets")
//!     .transform_to_storage(b"hello", b"/registry/secrets/default/greeting")
//!     .await?;
//! # let _ = sealed;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod kms;
pub mod observability;
pub mod registry;
pub mod reload;
pub mod startup;
pub mod storage;
pub mod transform;

pub use config::AppConfig;
pub use errors::{EncryptionError, Result};
pub use registry::ProviderRegistry;
pub use startup::Engine;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
