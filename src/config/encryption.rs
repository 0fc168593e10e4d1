//! # Encryption Configuration
//!
//! Parses and validates the declarative provider configuration:
//!
//! ```yaml
//! kind: EncryptionConfiguration
//! apiVersion: apiserver.config.k8s.io/v1
//! resources:
//!   - resources:
//!     - secrets
//!     providers:
//!     - kms:
//!        name: kms-provider
//!        cachesize: 1000
//!        endpoint: unix:///@kms-provider.sock
//!     - identity: {}
//! ```
//!
//! A configuration is either entirely valid or rejected; nothing is applied
//! from a document that fails any check.

use crate::errors::{EncryptionError, Result};
use crate::kms::grpc::parse_endpoint;
use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_KIND: &str = "EncryptionConfiguration";
pub const CONFIG_API_VERSION: &str = "apiserver.config.k8s.io/v1";

/// DEK cache size when `cachesize` is omitted
pub const DEFAULT_CACHE_SIZE: usize = 1000;

/// KMS call deadline when `timeout` is omitted
pub const DEFAULT_KMS_TIMEOUT: Duration = Duration::from_secs(3);

/// Root of the encryption configuration document
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EncryptionConfiguration {
    pub kind: String,
    pub api_version: String,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// One group of resource kinds sharing a provider chain
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    pub resources: Vec<String>,
    pub providers: Vec<ProviderConfig>,
}

/// A provider entry; exactly one field must be set
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kms: Option<KmsProviderConfig>,
    #[serde(default)]
    pub identity: Option<IdentityConfig>,
}

/// The no-op provider; it has no settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {}

/// A remote KMS plugin binding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KmsProviderConfig {
    pub name: String,
    pub endpoint: String,
    #[serde(default = "default_cache_size")]
    pub cachesize: usize,
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    #[serde(default = "default_kms_api_version", rename = "apiVersion")]
    pub api_version: String,
}

fn default_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}

fn default_timeout() -> Duration {
    DEFAULT_KMS_TIMEOUT
}

fn default_kms_api_version() -> String {
    "v1".to_string()
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Parse durations such as `3s`, `500ms`, `1m30s` or `2h`.
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("invalid duration '{}'", raw));
        }
        let value: u64 =
            rest[..digits].parse().map_err(|_| format!("invalid duration '{}'", raw))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "h" => value.checked_mul(3600).map(Duration::from_secs),
            unit => return Err(format!("unknown unit '{}' in duration '{}'", unit, raw)),
        };
        total = part
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| format!("duration '{}' out of range", raw))?;
        rest = &rest[unit_len..];
    }
    Ok(total)
}

/// A validated provider entry
#[derive(Debug, Clone, PartialEq)]
pub enum Provider {
    Kms(KmsProviderConfig),
    Identity,
}

impl Provider {
    pub fn name(&self) -> &str {
        match self {
            Self::Kms(kms) => &kms.name,
            Self::Identity => "identity",
        }
    }
}

/// A validated resource group
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceGroup {
    pub resources: Vec<String>,
    pub providers: Vec<Provider>,
}

/// A configuration that passed every check, with its content fingerprint
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    pub groups: Vec<ResourceGroup>,
    pub fingerprint: String,
}

impl ValidatedConfig {
    /// Distinct KMS providers in first-seen order.
    pub fn kms_providers(&self) -> Vec<&KmsProviderConfig> {
        let mut seen = HashSet::new();
        self.groups
            .iter()
            .flat_map(|group| group.providers.iter())
            .filter_map(|provider| match provider {
                Provider::Kms(kms) if seen.insert(kms.name.as_str()) => Some(kms),
                _ => None,
            })
            .collect()
    }
}

/// SHA-256 of the raw configuration bytes, hex encoded.
pub fn fingerprint(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Parse and validate configuration bytes.
pub fn parse(data: &[u8]) -> Result<ValidatedConfig> {
    let config: EncryptionConfiguration = serde_yaml::from_slice(data)?;
    let groups = config.validate()?;
    Ok(ValidatedConfig { groups, fingerprint: fingerprint(data) })
}

/// Read, parse and validate the configuration file at `path`.
pub fn load(path: &Path) -> Result<ValidatedConfig> {
    let data = std::fs::read(path).map_err(|e| {
        EncryptionError::io(format!("failed to read encryption config {}", path.display()), e)
    })?;
    parse(&data)
}

impl EncryptionConfiguration {
    /// Check every structural rule and return the validated groups.
    pub fn validate(&self) -> Result<Vec<ResourceGroup>> {
        if self.kind != CONFIG_KIND {
            return Err(EncryptionError::config(format!(
                "kind must be {}, got '{}'",
                CONFIG_KIND, self.kind
            )));
        }
        if self.api_version != CONFIG_API_VERSION {
            return Err(EncryptionError::config(format!(
                "apiVersion must be {}, got '{}'",
                CONFIG_API_VERSION, self.api_version
            )));
        }
        if self.resources.is_empty() {
            return Err(EncryptionError::config("resources must contain at least one entry"));
        }

        let mut seen_resources: HashSet<&str> = HashSet::new();
        let mut kms_by_name: HashMap<&str, &KmsProviderConfig> = HashMap::new();
        let mut groups = Vec::with_capacity(self.resources.len());

        for (index, group) in self.resources.iter().enumerate() {
            let field = format!("resources[{}]", index);
            if group.resources.is_empty() {
                return Err(EncryptionError::config(format!(
                    "{}.resources must contain at least one resource",
                    field
                )));
            }
            for resource in &group.resources {
                validate_resource_name(resource)
                    .map_err(|reason| EncryptionError::config(format!("{}: {}", field, reason)))?;
                if !seen_resources.insert(resource.as_str()) {
                    return Err(EncryptionError::config(format!(
                        "{}: resource '{}' is listed in more than one group",
                        field, resource
                    )));
                }
            }
            if group.providers.is_empty() {
                return Err(EncryptionError::config(format!(
                    "{}.providers must contain at least one provider",
                    field
                )));
            }

            let mut names_in_group: HashSet<String> = HashSet::new();
            let mut providers = Vec::with_capacity(group.providers.len());
            for (p_index, provider) in group.providers.iter().enumerate() {
                let p_field = format!("{}.providers[{}]", field, p_index);
                let validated = match (&provider.kms, &provider.identity) {
                    (Some(kms), None) => {
                        validate_kms(kms).map_err(|reason| {
                            EncryptionError::config(format!("{}.kms: {}", p_field, reason))
                        })?;
                        if let Some(existing) = kms_by_name.insert(kms.name.as_str(), kms) {
                            if existing != kms {
                                return Err(EncryptionError::config(format!(
                                    "{}.kms: provider '{}' is configured differently in another group",
                                    p_field, kms.name
                                )));
                            }
                        }
                        Provider::Kms(kms.clone())
                    }
                    (None, Some(_)) => Provider::Identity,
                    (None, None) => {
                        return Err(EncryptionError::config(format!(
                            "{}: exactly one provider type must be set",
                            p_field
                        )))
                    }
                    (Some(_), Some(_)) => {
                        return Err(EncryptionError::config(format!(
                            "{}: kms and identity cannot be combined in one entry",
                            p_field
                        )))
                    }
                };
                if !names_in_group.insert(validated.name().to_string()) {
                    return Err(EncryptionError::config(format!(
                        "{}: provider name '{}' is not unique in this group",
                        p_field,
                        validated.name()
                    )));
                }
                providers.push(validated);
            }

            groups.push(ResourceGroup { resources: group.resources.clone(), providers });
        }

        Ok(groups)
    }
}

fn validate_kms(kms: &KmsProviderConfig) -> std::result::Result<(), String> {
    if kms.name.trim().is_empty() {
        return Err("name is required".to_string());
    }
    if !kms.name.chars().all(|c| c.is_ascii_graphic()) {
        return Err(format!(
            "name '{}' must be printable ASCII without spaces",
            kms.name.escape_default()
        ));
    }
    if kms.name.contains(':') {
        return Err(format!("name '{}' must not contain ':'", kms.name));
    }
    if kms.name == "identity" {
        return Err("name 'identity' is reserved".to_string());
    }
    if kms.cachesize == 0 {
        return Err("cachesize must be a positive integer".to_string());
    }
    if kms.timeout.is_zero() {
        return Err("timeout must be greater than zero".to_string());
    }
    if kms.api_version != "v1" {
        return Err(format!("unsupported apiVersion '{}', only v1 is supported", kms.api_version));
    }
    parse_endpoint(&kms.endpoint).map_err(|e| e.to_string())?;
    Ok(())
}

fn validate_resource_name(resource: &str) -> std::result::Result<(), String> {
    if resource.is_empty() {
        return Err("resource names must not be empty".to_string());
    }
    if resource == "*" {
        return Err("use '*.*' to match all resources".to_string());
    }
    if resource != resource.to_lowercase() {
        return Err(format!("resource '{}' must be lowercase", resource));
    }
    if resource.starts_with('*') && !resource.starts_with("*.") {
        return Err(format!("resource '{}' has an invalid wildcard", resource));
    }
    if resource.chars().skip(1).any(|c| c == '*') {
        return Err(format!("resource '{}' may only use a leading wildcard", resource));
    }
    Ok(())
}
