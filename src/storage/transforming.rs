//! Store wrapper that encrypts on put and decrypts on get
//!
//! Records live at `/<prefix>/<resource>/<namespace>/<name>` (or
//! `/<prefix>/<resource>/<name>` when cluster scoped), and that path is the
//! authenticated context of the record's payload.

use super::KeyValueStore;
use crate::errors::Result;
use crate::registry::ProviderRegistry;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const DEFAULT_PREFIX: &str = "registry";

pub struct TransformingStore {
    inner: Arc<dyn KeyValueStore>,
    registry: Arc<ProviderRegistry>,
    prefix: String,
}

impl TransformingStore {
    pub fn new(inner: Arc<dyn KeyValueStore>, registry: Arc<ProviderRegistry>) -> Self {
        Self::with_prefix(inner, registry, DEFAULT_PREFIX)
    }

    pub fn with_prefix(
        inner: Arc<dyn KeyValueStore>,
        registry: Arc<ProviderRegistry>,
        prefix: impl Into<String>,
    ) -> Self {
        Self { inner, registry, prefix: prefix.into().trim_matches('/').to_string() }
    }

    /// Storage path of one record.
    pub fn key_path(&self, resource: &str, namespace: &str, name: &str) -> String {
        if namespace.is_empty() {
            format!("/{}/{}/{}", self.prefix, resource, name)
        } else {
            format!("/{}/{}/{}/{}", self.prefix, resource, namespace, name)
        }
    }

    fn resource_prefix(&self, resource: &str) -> String {
        format!("/{}/{}/", self.prefix, resource)
    }

    /// Encrypt `plaintext` with the resource's write head and store it.
    pub async fn put(&self, resource: &str, namespace: &str, name: &str, plaintext: &[u8]) -> Result<()> {
        let key = self.key_path(resource, namespace, name);
        let chain = self.registry.active_chain(resource);
        let stored = chain.transform_to_storage(plaintext, key.as_bytes()).await?;
        self.inner.put(&key, stored).await
    }

    /// Read and decrypt one record.
    pub async fn get(&self, resource: &str, namespace: &str, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get_with_staleness(resource, namespace, name).await?.map(|(plain, _)| plain))
    }

    /// Read one record, also reporting whether it predates the current write head.
    pub async fn get_with_staleness(
        &self,
        resource: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<(Vec<u8>, bool)>> {
        let key = self.key_path(resource, namespace, name);
        let Some(stored) = self.inner.get(&key).await? else {
            return Ok(None);
        };
        let chain = self.registry.active_chain(resource);
        Ok(Some(chain.transform_from_storage(&stored, key.as_bytes()).await?))
    }

    /// Stored bytes of one record, without decryption.
    pub async fn get_raw(&self, resource: &str, namespace: &str, name: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(&self.key_path(resource, namespace, name)).await
    }

    /// Rewrite every record of `resource` not written by the current head.
    ///
    /// The whole pass uses one registry generation. Returns the number of
    /// records rewritten; the first failing record aborts the pass.
    #[instrument(skip(self))]
    pub async fn migrate(&self, resource: &str) -> Result<usize> {
        let chain = self.registry.snapshot().chain_for(resource);
        let records = self.inner.list(&self.resource_prefix(resource)).await?;

        let mut rewritten = 0;
        for (key, stored) in &records {
            let (plaintext, stale) = chain.transform_from_storage(stored, key.as_bytes()).await?;
            if !stale {
                continue;
            }
            let fresh = chain.transform_to_storage(&plaintext, key.as_bytes()).await?;
            self.inner.put(key, fresh).await?;
            debug!(key = %key, "Rewrote record with current write provider");
            rewritten += 1;
        }

        info!(
            resource = %resource,
            total = records.len(),
            rewritten,
            write_provider = %chain.write_head().name(),
            "Storage migration completed"
        );
        Ok(rewritten)
    }
}
