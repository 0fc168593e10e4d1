//! # Error Types
//!
//! Error types for the KMS envelope engine using `thiserror`.

use super::kms::KmsError;

/// Custom result type for envelope operations
pub type Result<T> = std::result::Result<T, EncryptionError>;

/// Main error type for the envelope transform engine
#[derive(thiserror::Error, Debug)]
pub enum EncryptionError {
    /// Envelope framing is corrupt or truncated
    #[error("malformed envelope: {message}")]
    MalformedEnvelope { message: String },

    /// The envelope names a provider the active chain does not contain
    #[error("no configured provider named '{provider}' for resource '{resource}'")]
    UnknownProvider { provider: String, resource: String },

    /// Wrong key, wrong authenticated context, or tampered payload
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// The KMS plugin could not wrap or unwrap a DEK
    #[error("key service '{provider}' unavailable: {source}")]
    KeyServiceUnavailable {
        provider: String,
        #[source]
        source: KmsError,
    },

    /// Encryption configuration could not be parsed or validated
    #[error("invalid encryption configuration: {message}")]
    ConfigInvalid { message: String },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Internal errors (RNG failure, lock poisoning, ...)
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl EncryptionError {
    /// Create a malformed envelope error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedEnvelope { message: message.into() }
    }

    /// Create an unknown provider error
    pub fn unknown_provider<P: Into<String>, R: Into<String>>(provider: P, resource: R) -> Self {
        Self::UnknownProvider { provider: provider.into(), resource: resource.into() }
    }

    /// Create an authentication failure
    pub fn authentication<S: Into<String>>(message: S) -> Self {
        Self::AuthenticationFailed { message: message.into() }
    }

    /// Create a key service failure for the named provider
    pub fn key_service<S: Into<String>>(provider: S, source: KmsError) -> Self {
        Self::KeyServiceUnavailable { provider: provider.into(), source }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::ConfigInvalid { message: message.into() }
    }

    /// Create an I/O error with context
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Io { source, context: context.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Stable tag for this error class, used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope { .. } => "malformed_envelope",
            Self::UnknownProvider { .. } => "unknown_provider",
            Self::AuthenticationFailed { .. } => "authentication_failed",
            Self::KeyServiceUnavailable { .. } => "key_service_unavailable",
            Self::ConfigInvalid { .. } => "config_invalid",
            Self::Io { .. } => "io",
            Self::Internal { .. } => "internal",
        }
    }

    /// Check if the caller may retry the operation.
    ///
    /// Only KMS unavailability is transient. Framing, provider and
    /// authentication failures stay failures no matter how often they are
    /// retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::KeyServiceUnavailable { .. })
    }
}

impl From<std::io::Error> for EncryptionError {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_yaml::Error> for EncryptionError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::config(format!("failed to parse YAML: {}", error))
    }
}

impl From<validator::ValidationErrors> for EncryptionError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::config(format!("Validation failed: {}", message))
    }
}
