//! Startup sequence for the envelope engine
//!
//! Loads the initial configuration (fatal if invalid), then runs the config
//! watcher and the liveness server until shutdown.

use crate::api::{start_liveness_server, LivenessState};
use crate::config::AppConfig;
use crate::errors::Result;
use crate::kms::KmsConnector;
use crate::observability::KmsHealthAggregator;
use crate::registry::ProviderRegistry;
use crate::reload::{load_initial, ConfigWatcher, ReloadStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Long-lived components shared by the engine's tasks.
pub struct Engine {
    pub registry: Arc<ProviderRegistry>,
    pub health: Arc<KmsHealthAggregator>,
    pub reload: Option<Arc<ReloadStatus>>,
    watcher: Option<ConfigWatcher>,
}

impl Engine {
    /// Build the registry from the configured file and prepare the watcher.
    pub fn bootstrap(config: &AppConfig, connector: Arc<dyn KmsConnector>) -> Result<Self> {
        let registry = Arc::new(ProviderRegistry::new(connector));
        let generation = load_initial(&config.encryption_config_path, &registry)?;
        let snapshot = registry.snapshot();
        info!(
            generation,
            path = %config.encryption_config_path.display(),
            providers = snapshot.providers().len(),
            "Loaded encryption configuration"
        );

        let health = Arc::new(KmsHealthAggregator::new(Arc::clone(&registry), &config.health));
        let watcher = config.reload.enabled.then(|| {
            ConfigWatcher::new(&config.encryption_config_path, Arc::clone(&registry), &config.reload)
        });
        let reload = watcher.as_ref().map(ConfigWatcher::status);
        if watcher.is_none() {
            warn!("Encryption config hot reload is disabled");
        }

        Ok(Self { registry, health, reload, watcher })
    }

    /// Run until `shutdown` fires.
    pub async fn run(mut self, config: &AppConfig, shutdown: CancellationToken) -> Result<()> {
        let watcher_task = self.watcher.take().map(|watcher| watcher.spawn(shutdown.clone()));

        let state = LivenessState { health: Arc::clone(&self.health), reload: self.reload.clone() };
        let served = start_liveness_server(&config.server, state, shutdown.clone()).await;

        // The server only returns on shutdown or error; stop the watcher either way.
        shutdown.cancel();
        if let Some(task) = watcher_task {
            if let Err(e) = task.await {
                warn!(error = %e, "Config watcher task ended abnormally");
            }
        }
        served
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::MockConnector;

    #[test]
    fn test_bootstrap_requires_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enc.yaml");
        std::fs::write(&path, "kind: EncryptionConfiguration\n").unwrap();
        let config = AppConfig { encryption_config_path: path, ..Default::default() };
        assert!(Engine::bootstrap(&config, Arc::new(MockConnector::new())).is_err());
    }

    #[test]
    fn test_bootstrap_without_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enc.yaml");
        std::fs::write(
            &path,
            "kind: EncryptionConfiguration\napiVersion: apiserver.config.k8s.io/v1\nresources:\n  - resources: [secrets]\n    providers:\n    - identity: {}\n",
        )
        .unwrap();
        let mut config = AppConfig { encryption_config_path: path, ..Default::default() };
        config.reload.enabled = false;

        let engine = Engine::bootstrap(&config, Arc::new(MockConnector::new())).unwrap();
        assert!(engine.reload.is_none());
        assert_eq!(engine.registry.generation(), 1);
    }
}
