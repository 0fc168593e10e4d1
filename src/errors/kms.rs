use std::time::Duration;

use thiserror::Error;

/// Errors raised while talking to a remote KMS plugin.
///
/// These never escape the transform path directly; they are folded into
/// [`EncryptionError::KeyServiceUnavailable`](super::EncryptionError) or an
/// unhealthy probe result, keeping the plugin's own message as detail.
#[derive(Debug, Error)]
pub enum KmsError {
    /// The endpoint string is not a usable KMS address.
    #[error("invalid KMS endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The plugin socket could not be reached.
    #[error("failed to connect to KMS plugin at {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    /// The plugin answered with a gRPC error status.
    #[error("rpc error: code = {code} desc = {message}")]
    Rpc { code: String, message: String },

    /// The call did not complete within its deadline.
    #[error("{operation} timed out after {}ms", .timeout.as_millis())]
    Timeout { operation: String, timeout: Duration },

    /// The plugin answered but the response was unusable.
    #[error("invalid response from KMS plugin: {0}")]
    InvalidResponse(String),
}

impl KmsError {
    pub fn rpc(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rpc { code: code.into(), message: message.into() }
    }

    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout { operation: operation.into(), timeout }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<tonic::Status> for KmsError {
    fn from(status: tonic::Status) -> Self {
        Self::Rpc { code: format!("{:?}", status.code()), message: status.message().to_string() }
    }
}
