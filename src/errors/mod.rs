//! # Error Handling
//!
//! Error taxonomy for the envelope transform engine, the provider registry
//! and the reload/health machinery. Every failure on the record read/write
//! path is classified into exactly one [`EncryptionError`] variant so callers
//! can decide on retry policy without inspecting message text.

pub mod kms;
pub mod types;

pub use kms::KmsError;
pub use types::{EncryptionError, Result};
