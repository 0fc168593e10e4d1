//! Immutable registry generation

use crate::transform::{ChainEntry, EnvelopeTransformer, TransformerChain};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Every chain of one configuration generation.
///
/// Readers hold an `Arc` to a snapshot for the length of one operation, so
/// they never see chains from two generations.
#[derive(Debug)]
pub struct RegistrySnapshot {
    generation: u64,
    fingerprint: Option<String>,
    order: Vec<String>,
    chains: HashMap<String, Arc<TransformerChain>>,
    providers: Vec<Arc<EnvelopeTransformer>>,
}

impl RegistrySnapshot {
    /// Snapshot with no configured resources; everything is stored as-is.
    pub fn empty() -> Self {
        Self::new(0, None, Vec::new())
    }

    /// Build a snapshot from `(resource pattern, chain)` pairs in config order.
    pub fn new(
        generation: u64,
        fingerprint: Option<String>,
        chains: Vec<(String, Arc<TransformerChain>)>,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut providers = Vec::new();
        for (_, chain) in &chains {
            for entry in chain.entries() {
                if let ChainEntry::Kms(transformer) = entry {
                    if seen.insert(transformer.name().to_string()) {
                        providers.push(Arc::clone(transformer));
                    }
                }
            }
        }

        let order = chains.iter().map(|(resource, _)| resource.clone()).collect();
        Self { generation, fingerprint, order, chains: chains.into_iter().collect(), providers }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// SHA-256 of the config file this generation was built from.
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Distinct KMS transformers, first-seen order across all chains.
    pub fn providers(&self) -> &[Arc<EnvelopeTransformer>] {
        &self.providers
    }

    pub fn provider(&self, name: &str) -> Option<&Arc<EnvelopeTransformer>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Configured resource patterns in config order.
    pub fn resources(&self) -> &[String] {
        &self.order
    }

    /// Chain for `resource` (`name` or `name.group`): exact match, then
    /// `*.<group>`, then `*.*`. Unconfigured resources get an identity chain.
    pub fn chain_for(&self, resource: &str) -> Arc<TransformerChain> {
        if let Some(chain) = self.chains.get(resource) {
            return Arc::clone(chain);
        }
        let group = resource.split_once('.').map_or("", |(_, group)| group);
        if let Some(chain) = self.chains.get(&format!("*.{}", group)) {
            return Arc::clone(chain);
        }
        if let Some(chain) = self.chains.get("*.*") {
            return Arc::clone(chain);
        }
        Arc::new(TransformerChain::identity(resource))
    }

    pub(super) fn chains(&self) -> impl Iterator<Item = (&String, &Arc<TransformerChain>)> {
        self.order.iter().filter_map(move |resource| self.chains.get_key_value(resource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::ChainEntry;

    fn identity_headed(resource: &str) -> Arc<TransformerChain> {
        Arc::new(TransformerChain::new(resource, vec![ChainEntry::Identity]).unwrap())
    }

    #[test]
    fn test_wildcard_resolution_order() {
        let snapshot = RegistrySnapshot::new(
            1,
            None,
            vec![
                ("deployments.apps".to_string(), identity_headed("deployments.apps")),
                ("*.apps".to_string(), identity_headed("*.apps")),
                ("*.*".to_string(), identity_headed("*.*")),
            ],
        );

        assert_eq!(snapshot.chain_for("deployments.apps").resource(), "deployments.apps");
        assert_eq!(snapshot.chain_for("statefulsets.apps").resource(), "*.apps");
        assert_eq!(snapshot.chain_for("secrets").resource(), "*.*");
    }

    #[test]
    fn test_core_group_wildcard() {
        let snapshot =
            RegistrySnapshot::new(1, None, vec![("*.".to_string(), identity_headed("*."))]);
        assert_eq!(snapshot.chain_for("secrets").resource(), "*.");
        assert_eq!(snapshot.chain_for("deployments.apps").resource(), "deployments.apps");
    }

    #[test]
    fn test_unconfigured_resource_is_identity() {
        let snapshot = RegistrySnapshot::empty();
        let chain = snapshot.chain_for("secrets");
        assert_eq!(chain.provider_names(), vec!["identity"]);
        assert!(snapshot.providers().is_empty());
        assert_eq!(snapshot.generation(), 0);
    }
}
