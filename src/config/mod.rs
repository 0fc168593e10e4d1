//! # Configuration Management
//!
//! Two layers: [`settings`] holds process settings read from the environment,
//! [`encryption`] holds the hot-reloadable provider layout read from YAML.

pub mod encryption;
pub mod settings;

pub use encryption::{
    EncryptionConfiguration, KmsProviderConfig, Provider, ResourceGroup, ValidatedConfig,
};
pub use settings::{
    AppConfig, HealthConfig, ObservabilityConfig, ReloadConfig, ServerConfig,
};
