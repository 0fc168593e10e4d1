//! Envelope transformer for one KMS provider
//!
//! Writes generate a fresh DEK, wrap it through the provider's KMS plugin and
//! seal the payload under it. Reads unwrap the stored DEK (through the cache
//! when possible) and open the payload. Every KMS call is bounded by the
//! provider's timeout and fails the operation instead of degrading to
//! plaintext.

use super::cache::{DekCache, PlainDek};
use super::cipher::{generate_dek, PayloadCipher};
use super::codec::{self, Envelope};
use crate::config::KmsProviderConfig;
use crate::errors::{EncryptionError, KmsError, Result};
use crate::kms::KmsService;
use crate::observability::metrics;
use ring::rand::SystemRandom;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

/// Encrypts and decrypts records for a single named KMS provider.
pub struct EnvelopeTransformer {
    config: KmsProviderConfig,
    kms: Arc<dyn KmsService>,
    cache: DekCache,
    rng: SystemRandom,
}

impl EnvelopeTransformer {
    pub fn new(config: KmsProviderConfig, kms: Arc<dyn KmsService>) -> Self {
        let cache = DekCache::new(config.cachesize);
        Self { config, kms, cache, rng: SystemRandom::new() }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &KmsProviderConfig {
        &self.config
    }

    pub fn kms(&self) -> &Arc<dyn KmsService> {
        &self.kms
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    pub fn cache(&self) -> &DekCache {
        &self.cache
    }

    /// Run one KMS call under the provider deadline, recording its latency.
    async fn call_kms<F>(&self, method: &'static str, call: F) -> Result<Vec<u8>>
    where
        F: Future<Output = std::result::Result<Vec<u8>, KmsError>>,
    {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.timeout, call).await;
        metrics::record_kms_rpc(self.name(), method, started.elapsed());

        match outcome {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => {
                warn!(provider = %self.name(), method, error = %e, "KMS call failed");
                Err(EncryptionError::key_service(self.name(), e))
            }
            Err(_) => {
                warn!(provider = %self.name(), method, timeout_ms = self.config.timeout.as_millis() as u64, "KMS call timed out");
                Err(EncryptionError::key_service(
                    self.name(),
                    KmsError::timeout(method, self.config.timeout),
                ))
            }
        }
    }

    /// Encrypt `plaintext` into an envelope bound to `key_path`.
    #[instrument(skip(self, plaintext, key_path), fields(provider = %self.config.name))]
    pub async fn transform_to_storage(&self, plaintext: &[u8], key_path: &[u8]) -> Result<Vec<u8>> {
        let dek = generate_dek(&self.rng)?;
        let wrapped = self.call_kms("encrypt", self.kms.encrypt(&dek)).await?;

        let sealed = PayloadCipher::new(&dek)?.seal(&self.rng, plaintext, key_path)?;
        let envelope = codec::encode(self.name(), &wrapped, &sealed)?;

        // A freshly wrapped DEK is exactly what the next read of this record needs.
        self.cache.put(&wrapped, Arc::new(dek));
        debug!(wrapped_len = wrapped.len(), envelope_len = envelope.len(), "Sealed record");
        Ok(envelope)
    }

    /// Decode and decrypt `data`, which must carry this provider's prefix.
    pub async fn transform_from_storage(&self, data: &[u8], key_path: &[u8]) -> Result<Vec<u8>> {
        let envelope = codec::decode(data)?;
        if envelope.provider != self.name() {
            return Err(EncryptionError::malformed(format!(
                "envelope was written by provider '{}', not '{}'",
                envelope.provider,
                self.name()
            )));
        }
        self.open_envelope(&envelope, key_path).await
    }

    /// Decrypt an already decoded envelope.
    #[instrument(skip(self, envelope, key_path), fields(provider = %self.config.name))]
    pub async fn open_envelope(&self, envelope: &Envelope<'_>, key_path: &[u8]) -> Result<Vec<u8>> {
        let dek = self.unwrap_dek(envelope.wrapped_dek).await?;
        PayloadCipher::new(&dek)?.open(envelope.payload, key_path)
    }

    /// Plaintext DEK for `wrapped`, from the cache or the KMS plugin.
    pub async fn unwrap_dek(&self, wrapped: &[u8]) -> Result<PlainDek> {
        if let Some(dek) = self.cache.get(wrapped) {
            metrics::record_dek_cache_lookup(self.name(), true);
            return Ok(dek);
        }
        metrics::record_dek_cache_lookup(self.name(), false);

        let plain = Zeroizing::new(self.call_kms("decrypt", self.kms.decrypt(wrapped)).await?);
        let dek: PlainDek = Arc::new(plain);
        self.cache.put(wrapped, Arc::clone(&dek));
        Ok(dek)
    }
}

impl std::fmt::Debug for EnvelopeTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeTransformer")
            .field("name", &self.config.name)
            .field("endpoint", &self.config.endpoint)
            .field("timeout", &self.config.timeout)
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::Base64Kms;

    fn provider(name: &str) -> KmsProviderConfig {
        KmsProviderConfig {
            name: name.to_string(),
            endpoint: format!("unix:///@{}.sock", name),
            cachesize: 10,
            timeout: Duration::from_millis(200),
            api_version: "v1".to_string(),
        }
    }

    fn transformer(name: &str) -> (EnvelopeTransformer, Arc<Base64Kms>) {
        let kms = Arc::new(Base64Kms::new());
        (EnvelopeTransformer::new(provider(name), kms.clone()), kms)
    }

    #[tokio::test]
    async fn test_roundtrip_and_prefix() {
        let (t, _) = transformer("kms-provider");
        let stored = t.transform_to_storage(b"secret-value", b"/registry/secrets/default/a").await.unwrap();
        assert!(stored.starts_with(b"k8s:enc:kms:v1:kms-provider:"));
        assert!(!stored.windows(12).any(|w| w == b"secret-value"));

        let plain = t.transform_from_storage(&stored, b"/registry/secrets/default/a").await.unwrap();
        assert_eq!(plain, b"secret-value");
    }

    #[tokio::test]
    async fn test_cached_dek_matches_kms_unwrap() {
        let (t, kms) = transformer("kms-provider");
        let stored = t.transform_to_storage(b"v", b"/k").await.unwrap();
        let envelope = codec::decode(&stored).unwrap();

        let cached = t.cache().get(envelope.wrapped_dek).unwrap();
        let unwrapped = kms.decrypt(envelope.wrapped_dek).await.unwrap();
        assert_eq!(cached.as_slice(), unwrapped.as_slice());
        assert_eq!(kms.last_encrypt_request().unwrap(), unwrapped);
    }

    #[tokio::test]
    async fn test_read_hits_cache_after_write() {
        let (t, kms) = transformer("p");
        let stored = t.transform_to_storage(b"v", b"/k").await.unwrap();
        t.transform_from_storage(&stored, b"/k").await.unwrap();
        assert_eq!(kms.decrypt_calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_miss_unwraps_once() {
        let (writer, kms) = transformer("p");
        let stored = writer.transform_to_storage(b"v", b"/k").await.unwrap();

        let reader = EnvelopeTransformer::new(provider("p"), kms.clone());
        reader.transform_from_storage(&stored, b"/k").await.unwrap();
        reader.transform_from_storage(&stored, b"/k").await.unwrap();
        assert_eq!(kms.decrypt_calls(), 1);
    }

    #[tokio::test]
    async fn test_wrong_key_path_fails_authentication() {
        let (t, _) = transformer("p");
        let stored = t.transform_to_storage(b"v", b"/registry/secrets/ns/a").await.unwrap();
        let err = t.transform_from_storage(&stored, b"/registry/secrets/ns/b").await.unwrap_err();
        assert!(matches!(err, EncryptionError::AuthenticationFailed { .. }));
    }

    #[tokio::test]
    async fn test_kms_failure_fails_write() {
        let (t, kms) = transformer("p");
        kms.enter_failed_state();
        let err = t.transform_to_storage(b"v", b"/k").await.unwrap_err();
        assert!(matches!(err, EncryptionError::KeyServiceUnavailable { .. }));
        assert!(err.to_string().contains("key disabled"));
        assert!(t.cache().is_empty());
    }

    #[tokio::test]
    async fn test_kms_failure_fails_uncached_read() {
        let (writer, kms) = transformer("p");
        let stored = writer.transform_to_storage(b"v", b"/k").await.unwrap();
        kms.enter_failed_state();

        let reader = EnvelopeTransformer::new(provider("p"), kms);
        let err = reader.transform_from_storage(&stored, b"/k").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_slow_kms_times_out() {
        let (t, kms) = transformer("p");
        kms.set_delay(Some(Duration::from_secs(5)));
        let err = t.transform_to_storage(b"v", b"/k").await.unwrap_err();
        match err {
            EncryptionError::KeyServiceUnavailable { source, .. } => assert!(source.is_timeout()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_foreign_prefix_rejected() {
        let (a, _) = transformer("a");
        let (b, _) = transformer("b");
        let stored = a.transform_to_storage(b"v", b"/k").await.unwrap();
        let err = b.transform_from_storage(&stored, b"/k").await.unwrap_err();
        assert!(matches!(err, EncryptionError::MalformedEnvelope { .. }));
    }

    #[tokio::test]
    async fn test_each_write_uses_fresh_dek() {
        let (t, _) = transformer("p");
        let first = t.transform_to_storage(b"v", b"/k").await.unwrap();
        let second = t.transform_to_storage(b"v", b"/k").await.unwrap();
        assert_ne!(
            codec::decode(&first).unwrap().wrapped_dek,
            codec::decode(&second).unwrap().wrapped_dek
        );
        assert_eq!(t.cache().len(), 2);
    }
}
