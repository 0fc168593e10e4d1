//! # Provider Registry
//!
//! Process-wide holder of the active transformer chains.
//!
//! The current [`RegistrySnapshot`] sits behind an [`ArcSwap`]: readers load
//! it without locking and keep their `Arc` for the whole operation, writers
//! replace it in one atomic store. Writers are serialized among themselves so
//! concurrent rebuilds cannot lose each other's updates.

pub mod builder;
pub mod snapshot;

pub use snapshot::RegistrySnapshot;

use crate::config::ValidatedConfig;
use crate::errors::Result;
use crate::kms::KmsConnector;
use crate::transform::TransformerChain;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

pub struct ProviderRegistry {
    current: ArcSwap<RegistrySnapshot>,
    connector: Arc<dyn KmsConnector>,
    write_lock: Mutex<()>,
}

impl ProviderRegistry {
    /// Registry with no configured resources, building KMS clients through
    /// `connector` on every apply.
    pub fn new(connector: Arc<dyn KmsConnector>) -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistrySnapshot::empty()),
            connector,
            write_lock: Mutex::new(()),
        }
    }

    /// Build a registry and apply `config` as generation 1.
    pub fn with_config(connector: Arc<dyn KmsConnector>, config: &ValidatedConfig) -> Result<Self> {
        let registry = Self::new(connector);
        registry.apply(config)?;
        Ok(registry)
    }

    /// Current generation. Hold the returned `Arc` for the whole operation.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Chain currently serving `resource`.
    pub fn active_chain(&self, resource: &str) -> Arc<TransformerChain> {
        self.current.load().chain_for(resource)
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation()
    }

    /// Replace the chain of one resource pattern, leaving the rest untouched.
    pub fn swap(&self, resource: &str, chain: Arc<TransformerChain>) -> u64 {
        let _guard = self.write_lock.lock();
        let current = self.current.load_full();

        let mut chains: Vec<_> = current
            .chains()
            .map(|(name, existing)| (name.clone(), Arc::clone(existing)))
            .collect();
        match chains.iter_mut().find(|(name, _)| name == resource) {
            Some(slot) => slot.1 = chain,
            None => chains.push((resource.to_string(), chain)),
        }

        let generation = current.generation() + 1;
        self.current.store(Arc::new(RegistrySnapshot::new(generation, None, chains)));
        info!(resource = %resource, generation, "Swapped transformer chain");
        generation
    }

    /// Build every chain for `config` and install them as one new generation.
    ///
    /// Nothing is installed if any chain fails to build.
    pub fn apply(&self, config: &ValidatedConfig) -> Result<u64> {
        let _guard = self.write_lock.lock();
        let current = self.current.load_full();

        let chains = builder::build_chains(config, self.connector.as_ref(), &current)?;
        let generation = current.generation() + 1;
        let snapshot = RegistrySnapshot::new(generation, Some(config.fingerprint.clone()), chains);
        let providers = snapshot.providers().len();
        let resources = snapshot.resources().len();
        self.current.store(Arc::new(snapshot));

        info!(
            generation,
            providers,
            resources,
            fingerprint = %config.fingerprint,
            "Installed encryption configuration"
        );
        Ok(generation)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.current.load();
        f.debug_struct("ProviderRegistry")
            .field("generation", &snapshot.generation())
            .field("resources", &snapshot.resources())
            .finish()
    }
}
