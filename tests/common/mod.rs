//! Common test utilities for all integration tests.
//!
//! Configuration builders, a registry backed by the in-process mock KMS and
//! temporary configuration files.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use kms_envelope::config::encryption;
use kms_envelope::kms::{Base64Kms, MockConnector};
use kms_envelope::ProviderRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const HEADER: &str = "kind: EncryptionConfiguration\napiVersion: apiserver.config.k8s.io/v1\nresources:\n";

/// One provider entry of a resource group.
pub enum P<'a> {
    Kms(&'a str),
    Identity,
}

pub fn endpoint(name: &str) -> String {
    format!("unix:///@{}.sock", name)
}

/// Configuration with one group per `(resources, providers)` pair. KMS
/// providers listen on `unix:///@<name>.sock`.
pub fn config_yaml(groups: &[(&[&str], &[P<'_>])]) -> String {
    let mut yaml = HEADER.to_string();
    for (resources, providers) in groups {
        let resources: Vec<String> = resources.iter().map(|r| format!("\"{}\"", r)).collect();
        yaml.push_str(&format!("  - resources: [{}]\n    providers:\n", resources.join(", ")));
        for provider in providers.iter() {
            match provider {
                P::Kms(name) => yaml.push_str(&format!(
                    "    - kms:\n        name: {}\n        endpoint: \"{}\"\n        timeout: 1s\n",
                    name,
                    endpoint(name)
                )),
                P::Identity => yaml.push_str("    - identity: {}\n"),
            }
        }
    }
    yaml
}

/// Registry and the connector whose plugins back it.
pub fn registry_for(yaml: &str) -> (Arc<ProviderRegistry>, Arc<MockConnector>) {
    let connector = Arc::new(MockConnector::new());
    let config = encryption::parse(yaml.as_bytes()).expect("test config should validate");
    let registry = ProviderRegistry::with_config(connector.clone(), &config)
        .expect("test registry should build");
    (Arc::new(registry), connector)
}

/// Apply a new configuration to an existing registry.
pub fn reconfigure(registry: &ProviderRegistry, yaml: &str) -> u64 {
    let config = encryption::parse(yaml.as_bytes()).expect("test config should validate");
    registry.apply(&config).expect("test config should apply")
}

pub fn plugin(connector: &MockConnector, name: &str) -> Arc<Base64Kms> {
    connector.plugin(&endpoint(name))
}

/// Temporary directory holding one configuration file.
pub struct ConfigDir {
    pub dir: tempfile::TempDir,
    pub path: PathBuf,
}

impl ConfigDir {
    pub fn new(yaml: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("encryption.yaml");
        std::fs::write(&path, yaml).expect("write config");
        Self { dir, path }
    }

    pub fn sibling(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, path: &Path, yaml: &str) {
        std::fs::write(path, yaml).expect("write config");
    }
}
