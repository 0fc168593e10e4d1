//! # Health Checking
//!
//! Probes every configured KMS provider with an encrypt/decrypt round trip.
//! Providers are probed concurrently under one deadline, and each result is
//! independent of the others.

use crate::config::HealthConfig;
use crate::observability::metrics;
use crate::registry::ProviderRegistry;
use crate::transform::EnvelopeTransformer;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Plaintext sent through each provider on every probe
pub const PROBE_PLAINTEXT: &[u8] = b"ping";

/// Health status for a component
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    /// Component is healthy and operational
    Healthy,
    /// Component is unhealthy and not functional
    Unhealthy { message: String },
}

impl HealthStatus {
    /// Check if the status is healthy
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Get the status message
    pub fn message(&self) -> Option<&str> {
        match self {
            HealthStatus::Healthy => None,
            HealthStatus::Unhealthy { message } => Some(message),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Component name, e.g. `kms-provider-0`
    pub component: String,
    /// Health status
    pub status: HealthStatus,
    /// Last check timestamp
    pub last_check: chrono::DateTime<chrono::Utc>,
    /// Additional metadata
    pub metadata: HashMap<String, String>,
}

impl HealthCheck {
    /// Create a new health check result
    pub fn new(component: String, status: HealthStatus) -> Self {
        Self { component, status, last_check: chrono::Utc::now(), metadata: HashMap::new() }
    }

    /// Create a healthy health check
    pub fn healthy(component: String) -> Self {
        Self::new(component, HealthStatus::Healthy)
    }

    /// Create an unhealthy health check
    pub fn unhealthy<S: Into<String>>(component: String, message: S) -> Self {
        Self::new(component, HealthStatus::Unhealthy { message: message.into() })
    }

    /// Add metadata to the health check
    pub fn with_metadata<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// `ok`, or the failure detail.
    pub fn text(&self) -> String {
        self.status.message().map_or_else(|| "ok".to_string(), str::to_string)
    }
}

/// Result of probing every provider
#[derive(Debug, Clone)]
pub struct KmsHealthReport {
    /// One check per distinct provider, in `kms-provider-<i>` order
    pub checks: Vec<HealthCheck>,
}

impl KmsHealthReport {
    /// Healthy iff every provider is healthy.
    pub fn is_healthy(&self) -> bool {
        self.checks.iter().all(|check| check.status.is_healthy())
    }

    /// `ok`, or `kms-provider-<i>: <detail>` for the first failing provider.
    pub fn text(&self) -> String {
        match self.checks.iter().find(|check| !check.status.is_healthy()) {
            Some(check) => format!("{}: {}", check.component, check.text()),
            None => "ok".to_string(),
        }
    }
}

/// Name under which the provider at `index` is reported
pub fn component_name(index: usize) -> String {
    format!("kms-provider-{}", index)
}

struct CachedCheck {
    transformer: Arc<EnvelopeTransformer>,
    check: HealthCheck,
    checked_at: Instant,
}

/// Probes the providers of the registry's current generation.
pub struct KmsHealthAggregator {
    registry: Arc<ProviderRegistry>,
    probe_timeout: Duration,
    positive_ttl: Duration,
    negative_ttl: Duration,
    cache: Mutex<HashMap<String, CachedCheck>>,
}

impl KmsHealthAggregator {
    pub fn new(registry: Arc<ProviderRegistry>, config: &HealthConfig) -> Self {
        Self {
            registry,
            probe_timeout: config.probe_timeout(),
            positive_ttl: config.positive_ttl(),
            negative_ttl: config.negative_ttl(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Number of distinct providers currently configured.
    pub fn provider_count(&self) -> usize {
        self.registry.snapshot().providers().len()
    }

    /// Probe every provider concurrently.
    #[instrument(skip(self))]
    pub async fn check_all(&self) -> KmsHealthReport {
        let snapshot = self.registry.snapshot();
        self.cache
            .lock()
            .retain(|name, _| snapshot.providers().iter().any(|p| p.name() == name.as_str()));
        let probes = snapshot
            .providers()
            .iter()
            .enumerate()
            .map(|(index, transformer)| self.check_transformer(index, Arc::clone(transformer)));
        let checks = join_all(probes).await;

        let report = KmsHealthReport { checks };
        if !report.is_healthy() {
            warn!(detail = %report.text(), "KMS providers unhealthy");
        }
        report
    }

    /// Probe the provider reported as `kms-provider-<index>`.
    pub async fn check_index(&self, index: usize) -> Option<HealthCheck> {
        let transformer = Arc::clone(self.registry.snapshot().providers().get(index)?);
        Some(self.check_transformer(index, transformer).await)
    }

    /// Probe a provider by its configured name.
    pub async fn check_one(&self, name: &str) -> Option<HealthCheck> {
        let snapshot = self.registry.snapshot();
        let index = snapshot.providers().iter().position(|p| p.name() == name)?;
        let transformer = Arc::clone(&snapshot.providers()[index]);
        Some(self.check_transformer(index, transformer).await)
    }

    async fn check_transformer(&self, index: usize, transformer: Arc<EnvelopeTransformer>) -> HealthCheck {
        let component = component_name(index);
        if let Some(mut cached) = self.cached(&transformer) {
            cached.component = component;
            return cached;
        }

        let status = probe(&transformer, self.probe_timeout).await;
        metrics::record_health_check(transformer.name(), status.is_healthy());
        debug!(provider = %transformer.name(), healthy = status.is_healthy(), "Probed KMS provider");

        let check = HealthCheck::new(component, status)
            .with_metadata("provider", transformer.name())
            .with_metadata("endpoint", transformer.config().endpoint.as_str());
        self.cache.lock().insert(
            transformer.name().to_string(),
            CachedCheck { transformer, check: check.clone(), checked_at: Instant::now() },
        );
        check
    }

    /// Provider names holding a cached result.
    pub fn cached_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cache.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn cached(&self, transformer: &Arc<EnvelopeTransformer>) -> Option<HealthCheck> {
        let cache = self.cache.lock();
        let entry = cache.get(transformer.name())?;
        if !Arc::ptr_eq(&entry.transformer, transformer) {
            return None;
        }
        let ttl = if entry.check.status.is_healthy() { self.positive_ttl } else { self.negative_ttl };
        (entry.checked_at.elapsed() < ttl).then(|| entry.check.clone())
    }
}

/// One encrypt/decrypt round trip under `timeout`.
async fn probe(transformer: &EnvelopeTransformer, timeout: Duration) -> HealthStatus {
    let name = transformer.name();
    let kms = transformer.kms();
    let round_trip = async {
        let wrapped = kms.encrypt(PROBE_PLAINTEXT).await.map_err(|e| {
            format!(
                "failed to perform encrypt section of the healthz check for KMS Provider {}, error: {}",
                name, e
            )
        })?;
        let plain = kms.decrypt(&wrapped).await.map_err(|e| {
            format!(
                "failed to perform decrypt section of the healthz check for KMS Provider {}, error: {}",
                name, e
            )
        })?;
        if plain != PROBE_PLAINTEXT {
            return Err(format!(
                "failed to perform decrypt section of the healthz check for KMS Provider {}, error: response from decrypt operation did not match the probe plaintext",
                name
            ));
        }
        Ok(())
    };

    match tokio::time::timeout(timeout, round_trip).await {
        Ok(Ok(())) => HealthStatus::Healthy,
        Ok(Err(message)) => HealthStatus::Unhealthy { message },
        Err(_) => HealthStatus::Unhealthy {
            message: format!(
                "failed to perform healthz check for KMS Provider {}, error: timed out after {}ms",
                name,
                timeout.as_millis()
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(HealthStatus::Healthy.message().is_none());

        let unhealthy = HealthStatus::Unhealthy { message: "down".to_string() };
        assert!(!unhealthy.is_healthy());
        assert_eq!(unhealthy.message(), Some("down"));
    }

    #[test]
    fn test_health_check_creation() {
        let check = HealthCheck::healthy("kms-provider-0".to_string());
        assert_eq!(check.component, "kms-provider-0");
        assert_eq!(check.text(), "ok");

        let check = HealthCheck::unhealthy("kms-provider-1".to_string(), "connection failed");
        assert!(!check.status.is_healthy());
        assert_eq!(check.text(), "connection failed");
    }

    #[test]
    fn test_health_check_metadata() {
        let check = HealthCheck::healthy("kms-provider-0".to_string())
            .with_metadata("provider", "kms-provider")
            .with_metadata("endpoint", "unix:///@kms.sock");

        assert_eq!(check.metadata.get("provider"), Some(&"kms-provider".to_string()));
        assert_eq!(check.metadata.get("endpoint"), Some(&"unix:///@kms.sock".to_string()));
    }

    #[test]
    fn test_report_text_names_first_failure() {
        let report = KmsHealthReport {
            checks: vec![
                HealthCheck::healthy(component_name(0)),
                HealthCheck::unhealthy(component_name(1), "first"),
                HealthCheck::unhealthy(component_name(2), "second"),
            ],
        };
        assert!(!report.is_healthy());
        assert_eq!(report.text(), "kms-provider-1: first");

        let empty = KmsHealthReport { checks: vec![] };
        assert!(empty.is_healthy());
        assert_eq!(empty.text(), "ok");
    }
}
