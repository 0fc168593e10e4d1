//! Envelope record framing
//!
//! ```text
//! k8s:enc:kms:v1:<provider-name>:<dek-len u16 BE><wrapped DEK><ciphertext payload>
//! ```
//!
//! This layer only frames bytes. It does not know whether the provider
//! exists or whether the payload decrypts.

use crate::errors::{EncryptionError, Result};

/// Marker shared by every encrypted record, whatever the scheme.
pub const ENCRYPTED_MARKER: &[u8] = b"k8s:enc:";

/// Scheme prefix for KMS v1 envelopes, before the provider name.
pub const KMS_V1_PREFIX: &[u8] = b"k8s:enc:kms:v1:";

/// Size of the big-endian DEK length field.
pub const DEK_LEN_FIELD: usize = 2;

/// A decoded envelope borrowing from the stored bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub provider: &'a str,
    pub wrapped_dek: &'a [u8],
    pub payload: &'a [u8],
}

/// Full prefix written for the given provider.
pub fn prefix_for(provider: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(KMS_V1_PREFIX.len() + provider.len() + 1);
    prefix.extend_from_slice(KMS_V1_PREFIX);
    prefix.extend_from_slice(provider.as_bytes());
    prefix.push(b':');
    prefix
}

/// Whether the bytes carry any `k8s:enc:` scheme marker.
pub fn is_encrypted(data: &[u8]) -> bool {
    data.starts_with(ENCRYPTED_MARKER)
}

/// Frame a wrapped DEK and payload under the provider's prefix.
pub fn encode(provider: &str, wrapped_dek: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    if provider.is_empty() || provider.contains(':') {
        return Err(EncryptionError::malformed(format!(
            "provider name '{}' cannot be framed",
            provider
        )));
    }
    let dek_len = u16::try_from(wrapped_dek.len()).map_err(|_| {
        EncryptionError::malformed(format!(
            "wrapped DEK is {} bytes, the envelope allows at most {}",
            wrapped_dek.len(),
            u16::MAX
        ))
    })?;

    let prefix = prefix_for(provider);
    let mut out =
        Vec::with_capacity(prefix.len() + DEK_LEN_FIELD + wrapped_dek.len() + payload.len());
    out.extend_from_slice(&prefix);
    out.extend_from_slice(&dek_len.to_be_bytes());
    out.extend_from_slice(wrapped_dek);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Split stored bytes into provider name, wrapped DEK and payload.
pub fn decode(data: &[u8]) -> Result<Envelope<'_>> {
    // Smallest valid envelope: scheme prefix, one-byte name, ':' and the length field.
    let minimum = KMS_V1_PREFIX.len() + 2 + DEK_LEN_FIELD;
    if data.len() < minimum {
        return Err(EncryptionError::malformed(format!(
            "envelope is {} bytes, shorter than the minimum {}",
            data.len(),
            minimum
        )));
    }
    let rest = data
        .strip_prefix(KMS_V1_PREFIX)
        .ok_or_else(|| EncryptionError::malformed("missing k8s:enc:kms:v1: prefix"))?;

    let name_end = rest
        .iter()
        .position(|b| *b == b':')
        .filter(|pos| *pos > 0)
        .ok_or_else(|| EncryptionError::malformed("no provider name in envelope prefix"))?;
    let provider = std::str::from_utf8(&rest[..name_end])
        .map_err(|_| EncryptionError::malformed("provider name is not valid UTF-8"))?;

    let rest = &rest[name_end + 1..];
    if rest.len() < DEK_LEN_FIELD {
        return Err(EncryptionError::malformed("envelope truncated before DEK length"));
    }
    let dek_len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
    let rest = &rest[DEK_LEN_FIELD..];
    if dek_len > rest.len() {
        return Err(EncryptionError::malformed(format!(
            "declared DEK length {} exceeds remaining {} bytes",
            dek_len,
            rest.len()
        )));
    }

    Ok(Envelope { provider, wrapped_dek: &rest[..dek_len], payload: &rest[dek_len..] })
}
