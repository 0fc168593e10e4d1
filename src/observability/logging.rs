//! # Structured Logging
//!
//! Subscriber setup and span helpers built on the tracing ecosystem.

use crate::config::{AppConfig, ObservabilityConfig};
use crate::errors::{EncryptionError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Create a tracing span for one envelope transformation.
///
/// ```rust,ignore
/// let span = transform_span!("to_storage", "secrets", "kms-provider");
/// ```
#[macro_export]
macro_rules! transform_span {
    ($operation:expr, $resource:expr, $provider:expr) => {
        tracing::debug_span!(
            "envelope_transform",
            operation = %$operation,
            resource = %$resource,
            provider = %$provider
        )
    };
    ($operation:expr, $resource:expr, $provider:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "envelope_transform",
            operation = %$operation,
            resource = %$resource,
            provider = %$provider,
            $($field)*
        )
    };
}

/// Create a tracing span for a configuration reload.
#[macro_export]
macro_rules! reload_span {
    ($path:expr) => {
        tracing::info_span!("config_reload", path = %$path)
    };
    ($path:expr, $($field:tt)*) => {
        tracing::info_span!("config_reload", path = %$path, $($field)*)
    };
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            EncryptionError::config(format!("Invalid log level '{}': {}", config.log_level, e))
        })?;

    let installed = if config.json_logging {
        fmt().with_env_filter(filter).json().with_current_span(true).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(true).try_init()
    };

    installed.map_err(|e| EncryptionError::internal(format!("Failed to install subscriber: {}", e)))
}

/// Log configuration at startup
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        encryption_config = %config.encryption_config_path.display(),
        server_address = %config.server.bind_address(),
        reload_enabled = %config.reload.enabled,
        poll_interval_ms = config.reload.poll_interval_ms,
        metrics_enabled = %config.observability.enable_metrics,
        service_name = %config.observability.service_name,
        "KMS envelope engine configuration"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macros_compile() {
        let _span = transform_span!("to_storage", "secrets", "kms-provider");
        let _span = transform_span!("from_storage", "secrets", "kms-provider", stale = true);
        let _span = reload_span!("/etc/enc.yaml");
        let _span = reload_span!("/etc/enc.yaml", generation = 3u64);
    }

    #[test]
    fn test_log_config_info() {
        log_config_info(&AppConfig::default());
    }

    #[test]
    fn test_invalid_level_is_config_error() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = ObservabilityConfig { log_level: "[".to_string(), ..Default::default() };
        let err = init_tracing(&config).unwrap_err();
        assert!(matches!(err, EncryptionError::ConfigInvalid { .. }));
    }
}
