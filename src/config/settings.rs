//! # Configuration Settings
//!
//! Process-level settings for the envelope engine. Everything here comes from
//! `KMS_ENVELOPE_*` environment variables; the provider layout itself lives in
//! the encryption configuration file.

use crate::errors::{EncryptionError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    /// Path of the encryption configuration file
    pub encryption_config_path: PathBuf,

    /// Liveness server configuration
    #[validate(nested)]
    pub server: ServerConfig,

    /// Config file watching
    #[validate(nested)]
    pub reload: ReloadConfig,

    /// KMS health probing
    #[validate(nested)]
    pub health: HealthConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            encryption_config_path: PathBuf::from("/etc/kms-envelope/encryption-config.yaml"),
            server: ServerConfig::default(),
            reload: ReloadConfig::default(),
            health: HealthConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(&format!("KMS_ENVELOPE_{}", name));

        let config = Self {
            encryption_config_path: var("ENCRYPTION_CONFIG")
                .map(PathBuf::from)
                .unwrap_or(defaults.encryption_config_path),
            server: ServerConfig {
                host: var("HOST").unwrap_or(defaults.server.host),
                port: parse_var(&var, "PORT", defaults.server.port)?,
            },
            reload: ReloadConfig {
                enabled: parse_bool(&var, "RELOAD_ENABLED", defaults.reload.enabled),
                poll_interval_ms: parse_var(
                    &var,
                    "RELOAD_POLL_INTERVAL_MS",
                    defaults.reload.poll_interval_ms,
                )?,
                debounce_ms: parse_var(&var, "RELOAD_DEBOUNCE_MS", defaults.reload.debounce_ms)?,
            },
            health: HealthConfig {
                probe_timeout_ms: parse_var(
                    &var,
                    "HEALTH_PROBE_TIMEOUT_MS",
                    defaults.health.probe_timeout_ms,
                )?,
                positive_ttl_ms: parse_var(
                    &var,
                    "HEALTH_POSITIVE_TTL_MS",
                    defaults.health.positive_ttl_ms,
                )?,
                negative_ttl_ms: parse_var(
                    &var,
                    "HEALTH_NEGATIVE_TTL_MS",
                    defaults.health.negative_ttl_ms,
                )?,
            },
            observability: ObservabilityConfig {
                log_level: var("LOG_LEVEL").unwrap_or(defaults.observability.log_level),
                json_logging: parse_bool(
                    &var,
                    "JSON_LOGGING",
                    defaults.observability.json_logging,
                ),
                enable_metrics: parse_bool(
                    &var,
                    "ENABLE_METRICS",
                    defaults.observability.enable_metrics,
                ),
                metrics_port: parse_var(&var, "METRICS_PORT", defaults.observability.metrics_port)?,
                service_name: var("SERVICE_NAME").unwrap_or(defaults.observability.service_name),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(EncryptionError::from)?;

        if self.observability.enable_metrics
            && self.observability.metrics_port != 0
            && self.observability.metrics_port == self.server.port
        {
            return Err(EncryptionError::config(
                "Liveness and metrics ports cannot be the same",
            ));
        }
        if self.encryption_config_path.as_os_str().is_empty() {
            return Err(EncryptionError::config("Encryption config path cannot be empty"));
        }

        Ok(())
    }
}

fn parse_var<F, T>(var: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            EncryptionError::config(format!("Invalid KMS_ENVELOPE_{} '{}': {}", name, raw, e))
        }),
        None => Ok(default),
    }
}

fn parse_bool<F>(var: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    var(name).map(|s| s.eq_ignore_ascii_case("true") || s == "1").unwrap_or(default)
}

/// Liveness HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    /// Server bind address
    #[validate(length(min = 1, message = "Host cannot be empty"))]
    pub host: String,

    /// Server port
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8081 }
    }
}

impl ServerConfig {
    /// Get the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Encryption config file watching
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReloadConfig {
    /// Watch the file and hot-reload on change
    pub enabled: bool,

    /// How often the file is fingerprinted
    #[validate(range(
        min = 10,
        max = 60000,
        message = "Poll interval must be between 10ms and 60s"
    ))]
    pub poll_interval_ms: u64,

    /// Quiet period a changed file must hold before it is applied
    #[validate(range(max = 60000, message = "Debounce must be at most 60s"))]
    pub debounce_ms: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self { enabled: true, poll_interval_ms: 1000, debounce_ms: 250 }
    }
}

impl ReloadConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// KMS health probe configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HealthConfig {
    /// Deadline for one provider's encrypt+decrypt probe
    #[validate(range(
        min = 1,
        max = 60000,
        message = "Probe timeout must be between 1ms and 60s"
    ))]
    pub probe_timeout_ms: u64,

    /// How long a healthy result is reused (0 = never)
    pub positive_ttl_ms: u64,

    /// How long an unhealthy result is reused (0 = never)
    pub negative_ttl_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { probe_timeout_ms: 3000, positive_ttl_ms: 20_000, negative_ttl_ms: 3000 }
    }
}

impl HealthConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn positive_ttl(&self) -> Duration {
        Duration::from_millis(self.positive_ttl_ms)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_millis(self.negative_ttl_ms)
    }
}

/// Observability configuration for logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,

    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Metrics server port (0 = disabled)
    pub metrics_port: u16,

    /// Service name attached to log output
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
            enable_metrics: true,
            metrics_port: 9090,
            service_name: "kms-envelope".to_string(),
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if !self.enable_metrics || self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }
}
