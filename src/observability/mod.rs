//! # Observability Infrastructure
//!
//! Structured logging, Prometheus metrics and KMS health checking.

pub mod health;
pub mod http_tracing;
pub mod logging;
pub mod metrics;

pub use health::{HealthCheck, HealthStatus, KmsHealthAggregator, KmsHealthReport};
pub use http_tracing::trace_http_requests;
pub use logging::{init_tracing, log_config_info};
pub use metrics::init_metrics;

use crate::config::ObservabilityConfig;
use crate::errors::Result;
use ::tracing::info;

/// Initialize logging and, if enabled, the metrics exporter.
pub async fn init_observability(config: &ObservabilityConfig) -> Result<()> {
    init_tracing(config)?;

    if config.enable_metrics {
        init_metrics(config).await?;
    }

    info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        metrics_enabled = %config.enable_metrics,
        json_logging = %config.json_logging,
        "Observability initialized successfully"
    );

    Ok(())
}
