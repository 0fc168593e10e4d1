//! KMS service trait and connector seam

use crate::config::encryption::KmsProviderConfig;
use crate::errors::KmsError;
use async_trait::async_trait;
use std::sync::Arc;

/// API version carried in every request to a KMS plugin.
pub const KMS_API_VERSION: &str = "v1beta1";

/// Trait for KMS plugin operations
///
/// Implementations must be Send + Sync; one handle is shared by every
/// concurrent transform for its provider.
#[async_trait]
pub trait KmsService: Send + Sync + std::fmt::Debug {
    /// Wrap a plaintext DEK with the plugin's key encryption key.
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KmsError>;

    /// Unwrap a DEK previously returned by `encrypt`.
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KmsError>;
}

/// Builds a [`KmsService`] for a configured provider.
///
/// The registry calls this on every rebuild; tests substitute an in-process
/// connector for the gRPC one.
pub trait KmsConnector: Send + Sync {
    fn connect(&self, provider: &KmsProviderConfig) -> Result<Arc<dyn KmsService>, KmsError>;
}
