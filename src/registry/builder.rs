//! Builds chains from a validated configuration

use super::snapshot::RegistrySnapshot;
use crate::config::{KmsProviderConfig, Provider, ValidatedConfig};
use crate::errors::{EncryptionError, Result};
use crate::kms::KmsConnector;
use crate::transform::{ChainEntry, EnvelopeTransformer, TransformerChain};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Build one chain per configured resource.
///
/// One transformer is built per distinct provider name and shared by every
/// chain that lists it. A transformer from `previous` whose provider settings
/// are unchanged is carried over with its warm DEK cache.
pub fn build_chains(
    config: &ValidatedConfig,
    connector: &dyn KmsConnector,
    previous: &RegistrySnapshot,
) -> Result<Vec<(String, Arc<TransformerChain>)>> {
    let mut transformers: HashMap<String, Arc<EnvelopeTransformer>> = HashMap::new();
    for provider in config.kms_providers() {
        let transformer = match previous.provider(&provider.name) {
            Some(existing) if existing.config() == provider => {
                debug!(provider = %provider.name, "Reusing transformer from previous generation");
                Arc::clone(existing)
            }
            _ => Arc::new(connect(connector, provider)?),
        };
        transformers.insert(provider.name.clone(), transformer);
    }

    let mut chains = Vec::new();
    for group in &config.groups {
        let mut entries = Vec::with_capacity(group.providers.len());
        for provider in &group.providers {
            let entry = match provider {
                Provider::Kms(kms) => {
                    let transformer = transformers.get(&kms.name).ok_or_else(|| {
                        EncryptionError::internal(format!("no transformer built for '{}'", kms.name))
                    })?;
                    ChainEntry::Kms(Arc::clone(transformer))
                }
                Provider::Identity => ChainEntry::Identity,
            };
            entries.push(entry);
        }

        for resource in &group.resources {
            let chain = TransformerChain::new(resource.clone(), entries.clone())?;
            chains.push((resource.clone(), Arc::new(chain)));
        }
    }

    Ok(chains)
}

fn connect(connector: &dyn KmsConnector, provider: &KmsProviderConfig) -> Result<EnvelopeTransformer> {
    let kms = connector.connect(provider).map_err(|e| {
        EncryptionError::config(format!("provider '{}': {}", provider.name, e))
    })?;
    Ok(EnvelopeTransformer::new(provider.clone(), kms))
}
