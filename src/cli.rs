//! # Command Line Interface
//!
//! Flags override the `KMS_ENVELOPE_*` environment; subcommands other than
//! `serve` run once and exit.

use crate::config::{encryption, AppConfig, KmsProviderConfig, Provider};
use crate::errors::{KmsError, Result};
use crate::kms::grpc::VersionResponse;
use crate::kms::{GrpcConnector, GrpcKmsService};
use crate::observability::KmsHealthAggregator;
use crate::registry::ProviderRegistry;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "kms-envelope")]
#[command(about = "KMS envelope encryption engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Encryption configuration file
    #[arg(long, global = true)]
    pub encryption_config: Option<PathBuf>,

    /// Liveness server bind address
    #[arg(long, global = true)]
    pub bind_address: Option<String>,

    /// Liveness server port
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the engine: hot reload plus liveness endpoints (default)
    Serve,

    /// Validate the encryption configuration and print its layout
    CheckConfig,

    /// Probe every configured KMS provider once
    Probe,
}

impl Cli {
    /// Environment configuration with command-line overrides applied.
    pub fn app_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::from_env()?;
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(path) = &self.encryption_config {
            config.encryption_config_path = path.clone();
        }
        if let Some(host) = &self.bind_address {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.verbose {
            config.observability.log_level = "debug".to_string();
        }
    }

    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }
}

/// `check-config`: parse, validate and summarize.
pub fn check_config(config: &AppConfig) -> Result<()> {
    let validated = encryption::load(&config.encryption_config_path)?;

    println!("Configuration: {}", config.encryption_config_path.display());
    println!("Fingerprint:   {}", validated.fingerprint);
    for group in &validated.groups {
        let providers: Vec<String> = group
            .providers
            .iter()
            .map(|provider| match provider {
                Provider::Kms(kms) => format!("kms:{} ({})", kms.name, kms.endpoint),
                Provider::Identity => "identity".to_string(),
            })
            .collect();
        println!("  {} -> {}", group.resources.join(", "), providers.join(" > "));
    }
    Ok(())
}

/// `probe`: one health round against the real plugins. Returns whether all
/// providers were healthy.
pub async fn probe(config: &AppConfig) -> Result<bool> {
    let validated = encryption::load(&config.encryption_config_path)?;
    let registry = Arc::new(ProviderRegistry::with_config(Arc::new(GrpcConnector), &validated)?);
    let health = KmsHealthAggregator::new(registry, &config.health);

    let mut versions_ok = true;
    for provider in validated.kms_providers() {
        match check_plugin_version(provider, config.health.probe_timeout()).await {
            Ok(version) => println!(
                "{}: {} {} (API {})",
                provider.name, version.runtime_name, version.runtime_version, version.version
            ),
            Err(e) => {
                versions_ok = false;
                println!("{}: version check failed: {}", provider.name, e);
            }
        }
    }

    let report = health.check_all().await;
    for check in &report.checks {
        let provider = check.metadata.get("provider").map(String::as_str).unwrap_or("?");
        println!("{} ({}): {}", check.component, provider, check.text());
    }
    Ok(versions_ok && report.is_healthy())
}

async fn check_plugin_version(
    provider: &KmsProviderConfig,
    timeout: Duration,
) -> std::result::Result<VersionResponse, KmsError> {
    let service = GrpcKmsService::connect_lazy(&provider.endpoint)?;
    tokio::time::timeout(timeout, service.version())
        .await
        .map_err(|_| KmsError::timeout("version", timeout))?
}
