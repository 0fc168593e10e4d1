//! # Metrics Collection
//!
//! Prometheus metrics for the envelope engine. Recording goes through the
//! `metrics` facade, which is a no-op until [`init_metrics`] installs the
//! exporter, so library code records unconditionally.

use crate::config::ObservabilityConfig;
use crate::errors::{EncryptionError, Result};
use ::tracing::{info, warn};
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Direction of a transformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ToStorage,
    FromStorage,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToStorage => "to_storage",
            Self::FromStorage => "from_storage",
        }
    }
}

/// Record the outcome of one transformation. `status` is `success` or an
/// error kind tag.
pub fn record_transformation(operation: Operation, provider: &str, status: &str) {
    let labels = [
        ("operation", operation.as_str().to_string()),
        ("provider", provider.to_string()),
        ("status", status.to_string()),
    ];
    counter!("kms_transformations_total", &labels).increment(1);
}

/// Record a DEK cache lookup.
pub fn record_dek_cache_lookup(provider: &str, hit: bool) {
    let labels = [
        ("provider", provider.to_string()),
        ("result", if hit { "hit" } else { "miss" }.to_string()),
    ];
    counter!("kms_dek_cache_lookups_total", &labels).increment(1);
}

/// Record the latency of one KMS RPC.
pub fn record_kms_rpc(provider: &str, method: &'static str, elapsed: Duration) {
    let labels = [("provider", provider.to_string()), ("method", method.to_string())];
    histogram!("kms_rpc_duration_seconds", &labels).record(elapsed.as_secs_f64());
}

/// Record a config reload attempt.
pub fn record_config_reload(success: bool) {
    let labels = [("status", if success { "success" } else { "error" }.to_string())];
    counter!("kms_config_reloads_total", &labels).increment(1);
}

/// Record a provider health probe.
pub fn record_health_check(provider: &str, healthy: bool) {
    let labels = [
        ("provider", provider.to_string()),
        ("status", if healthy { "healthy" } else { "unhealthy" }.to_string()),
    ];
    counter!("kms_health_checks_total", &labels).increment(1);
}

fn describe_metrics() {
    describe_counter!(
        "kms_transformations_total",
        Unit::Count,
        "Envelope transformations by operation, provider and status"
    );
    describe_counter!(
        "kms_dek_cache_lookups_total",
        Unit::Count,
        "DEK cache lookups by provider and hit/miss"
    );
    describe_counter!(
        "kms_config_reloads_total",
        Unit::Count,
        "Encryption config reload attempts by status"
    );
    describe_counter!(
        "kms_health_checks_total",
        Unit::Count,
        "KMS provider health probes by provider and status"
    );
    describe_histogram!(
        "kms_rpc_duration_seconds",
        Unit::Seconds,
        "Latency of KMS plugin RPCs by provider and method"
    );
}

/// Install the Prometheus exporter.
pub async fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        EncryptionError::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| {
            EncryptionError::config(format!("Failed to initialize metrics exporter: {}", e))
        })?;

    describe_metrics();

    info!(
        metrics_addr = %metrics_addr,
        service_name = %config.service_name,
        "Metrics collection initialized"
    );

    Ok(())
}
