//! In-process KMS plugin stand-in
//!
//! Wraps by base64-encoding the DEK. NOT cryptographically secure; it only
//! exercises the envelope plumbing, the failure paths and the health probe.

use super::service::{KmsConnector, KmsService};
use crate::config::encryption::KmsProviderConfig;
use crate::errors::KmsError;
use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Mock KMS plugin with a switchable failed state.
#[derive(Debug, Default)]
pub struct Base64Kms {
    failed: AtomicBool,
    delay: Mutex<Option<Duration>>,
    last_encrypt_request: Mutex<Option<Vec<u8>>>,
    encrypt_calls: AtomicUsize,
    decrypt_calls: AtomicUsize,
}

impl Base64Kms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail the way a plugin with a disabled key does.
    pub fn enter_failed_state(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    pub fn exit_failed_state(&self) {
        self.failed.store(false, Ordering::SeqCst);
    }

    /// Delay every call, to exercise deadlines.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Plaintext of the most recent `encrypt` call, i.e. the last DEK wrapped.
    pub fn last_encrypt_request(&self) -> Option<Vec<u8>> {
        self.last_encrypt_request.lock().clone()
    }

    pub fn encrypt_calls(&self) -> usize {
        self.encrypt_calls.load(Ordering::SeqCst)
    }

    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    async fn before_call(&self) -> Result<(), KmsError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failed.load(Ordering::SeqCst) {
            return Err(KmsError::rpc("FailedPrecondition", "failed precondition - key disabled"));
        }
        Ok(())
    }
}

#[async_trait]
impl KmsService for Base64Kms {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        *self.last_encrypt_request.lock() = Some(plaintext.to_vec());
        Ok(base64::engine::general_purpose::STANDARD.encode(plaintext).into_bytes())
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KmsError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        base64::engine::general_purpose::STANDARD
            .decode(ciphertext)
            .map_err(|e| KmsError::rpc("InvalidArgument", format!("invalid base64 ciphertext: {}", e)))
    }
}

/// Connector handing out one [`Base64Kms`] per endpoint.
///
/// Providers configured with the same endpoint share a plugin, the same way
/// they would share a socket.
#[derive(Debug, Default)]
pub struct MockConnector {
    plugins: Mutex<HashMap<String, Arc<Base64Kms>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The plugin serving `endpoint`, created on first use.
    pub fn plugin(&self, endpoint: &str) -> Arc<Base64Kms> {
        Arc::clone(self.plugins.lock().entry(endpoint.to_string()).or_default())
    }
}

impl KmsConnector for MockConnector {
    fn connect(&self, provider: &KmsProviderConfig) -> Result<Arc<dyn KmsService>, KmsError> {
        Ok(self.plugin(&provider.endpoint))
    }
}
