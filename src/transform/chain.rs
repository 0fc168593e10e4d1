//! Ordered provider chain for one resource
//!
//! The head entry encrypts every write. Reads are dispatched by the provider
//! name in the envelope prefix; only unprefixed data falls to the identity
//! entry.

use super::codec::{self, ENCRYPTED_MARKER, KMS_V1_PREFIX};
use super::envelope::EnvelopeTransformer;
use crate::errors::{EncryptionError, Result};
use crate::observability::metrics::{self, Operation};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, Instrument};

/// Name reported for the identity entry
pub const IDENTITY_PROVIDER: &str = "identity";

/// One provider in a chain
#[derive(Debug, Clone)]
pub enum ChainEntry {
    Kms(Arc<EnvelopeTransformer>),
    Identity,
}

impl ChainEntry {
    pub fn name(&self) -> &str {
        match self {
            Self::Kms(transformer) => transformer.name(),
            Self::Identity => IDENTITY_PROVIDER,
        }
    }
}

/// Immutable, ordered set of transformers for one resource.
#[derive(Debug)]
pub struct TransformerChain {
    resource: String,
    entries: Vec<ChainEntry>,
    by_name: HashMap<String, usize>,
}

impl TransformerChain {
    /// Build a chain. It must be non-empty and its provider names unique.
    pub fn new(resource: impl Into<String>, entries: Vec<ChainEntry>) -> Result<Self> {
        let resource = resource.into();
        if entries.is_empty() {
            return Err(EncryptionError::config(format!(
                "chain for '{}' has no providers",
                resource
            )));
        }

        let mut by_name = HashMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if by_name.insert(entry.name().to_string(), index).is_some() {
                return Err(EncryptionError::config(format!(
                    "chain for '{}' lists provider '{}' twice",
                    resource,
                    entry.name()
                )));
            }
        }

        Ok(Self { resource, entries, by_name })
    }

    /// Chain that stores records unencrypted.
    pub fn identity(resource: impl Into<String>) -> Self {
        let mut by_name = HashMap::with_capacity(1);
        by_name.insert(IDENTITY_PROVIDER.to_string(), 0);
        Self { resource: resource.into(), entries: vec![ChainEntry::Identity], by_name }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    /// The entry every write goes through.
    pub fn write_head(&self) -> &ChainEntry {
        &self.entries[0]
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.entries.iter().map(ChainEntry::name).collect()
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.by_name.contains_key(provider)
    }

    /// Encrypt with the head entry.
    pub async fn transform_to_storage(&self, plaintext: &[u8], key_path: &[u8]) -> Result<Vec<u8>> {
        let head = self.write_head();
        let span = crate::transform_span!("to_storage", self.resource, head.name());

        let result = match head {
            ChainEntry::Kms(transformer) => {
                transformer.transform_to_storage(plaintext, key_path).instrument(span).await
            }
            ChainEntry::Identity => Ok(plaintext.to_vec()),
        };

        let status = result.as_ref().map_or_else(|e| e.kind(), |_| "success");
        metrics::record_transformation(Operation::ToStorage, head.name(), status);
        result
    }

    /// Decrypt stored bytes. Returns the plaintext and whether the record was
    /// written by an entry other than the current head.
    pub async fn transform_from_storage(
        &self,
        data: &[u8],
        key_path: &[u8],
    ) -> Result<(Vec<u8>, bool)> {
        let (provider, result) = self.dispatch_read(data, key_path).await;
        let status = result.as_ref().map_or_else(|e| e.kind(), |_| "success");
        metrics::record_transformation(Operation::FromStorage, &provider, status);
        result
    }

    async fn dispatch_read(&self, data: &[u8], key_path: &[u8]) -> (String, Result<(Vec<u8>, bool)>) {
        if !codec::is_encrypted(data) {
            let result = match self.by_name.get(IDENTITY_PROVIDER) {
                Some(&index) => Ok((data.to_vec(), index != 0)),
                None => Err(EncryptionError::unknown_provider(IDENTITY_PROVIDER, &self.resource)),
            };
            return (IDENTITY_PROVIDER.to_string(), result);
        }

        if !data.starts_with(KMS_V1_PREFIX) {
            let scheme = scheme_of(data);
            let err = EncryptionError::unknown_provider(scheme.clone(), &self.resource);
            return (scheme, Err(err));
        }

        let envelope = match codec::decode(data) {
            Ok(envelope) => envelope,
            Err(e) => return ("unknown".to_string(), Err(e)),
        };
        let provider = envelope.provider.to_string();

        let index = match self.by_name.get(envelope.provider) {
            Some(&index) => index,
            None => {
                let err = EncryptionError::unknown_provider(envelope.provider, &self.resource);
                return (provider, Err(err));
            }
        };
        let ChainEntry::Kms(transformer) = &self.entries[index] else {
            let err = EncryptionError::unknown_provider(envelope.provider, &self.resource);
            return (provider, Err(err));
        };

        let stale = index != 0;
        let span = crate::transform_span!("from_storage", self.resource, provider, stale = stale);
        let result = transformer.open_envelope(&envelope, key_path).instrument(span).await;
        if stale && result.is_ok() {
            debug!(resource = %self.resource, provider = %provider, "Read record written by a non-head provider");
        }
        (provider, result.map(|plain| (plain, stale)))
    }
}

/// Scheme name after the `k8s:enc:` marker, for error reporting.
fn scheme_of(data: &[u8]) -> String {
    let rest = &data[ENCRYPTED_MARKER.len()..];
    let end = rest.iter().position(|&b| b == b':').unwrap_or(rest.len()).min(32);
    String::from_utf8_lossy(&rest[..end]).into_owned()
}
