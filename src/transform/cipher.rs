//! AES-GCM payload sealing bound to the record's storage path
//!
//! Sealed layout is `nonce (12) || ciphertext || tag (16)`. The storage key
//! path is passed as additional authenticated data, so a payload copied to a
//! different key fails to open.

use crate::errors::{EncryptionError, Result};
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

/// Size of AES-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of AES-GCM tag in bytes
pub const TAG_SIZE: usize = 16;

/// Size of freshly generated DEKs (AES-256)
pub const DEK_SIZE: usize = 32;

/// Generate a fresh random data encryption key.
pub fn generate_dek(rng: &SystemRandom) -> Result<Zeroizing<Vec<u8>>> {
    let mut dek = Zeroizing::new(vec![0u8; DEK_SIZE]);
    rng.fill(dek.as_mut_slice())
        .map_err(|_| EncryptionError::internal("failed to generate random DEK"))?;
    Ok(dek)
}

/// An AES-GCM key ready to seal and open payloads.
pub struct PayloadCipher {
    key: LessSafeKey,
}

impl PayloadCipher {
    /// Build a cipher from raw DEK bytes (16 or 32 bytes).
    pub fn new(dek: &[u8]) -> Result<Self> {
        let algorithm: &'static aead::Algorithm = match dek.len() {
            16 => &AES_128_GCM,
            32 => &AES_256_GCM,
            other => {
                return Err(EncryptionError::authentication(format!(
                    "DEK of {} bytes is not a valid AES-GCM key",
                    other
                )))
            }
        };
        let unbound = UnboundKey::new(algorithm, dek)
            .map_err(|_| EncryptionError::internal("failed to create AES-GCM key"))?;
        Ok(Self { key: LessSafeKey::new(unbound) })
    }

    /// Encrypt `plaintext` with `context` as associated data.
    pub fn seal(&self, rng: &SystemRandom, plaintext: &[u8], context: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rng.fill(&mut nonce_bytes)
            .map_err(|_| EncryptionError::internal("failed to generate random nonce"))?;

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(context),
                &mut in_out,
            )
            .map_err(|_| EncryptionError::internal("failed to seal payload"))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(sealed)
    }

    /// Decrypt a sealed payload. Any mismatch of key, context or bytes is
    /// `AuthenticationFailed`; partial plaintext is never returned.
    pub fn open(&self, sealed: &[u8], context: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(EncryptionError::authentication(format!(
                "sealed payload is {} bytes, shorter than nonce and tag",
                sealed.len()
            )));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| EncryptionError::authentication("invalid nonce"))?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(context), &mut in_out)
            .map_err(|_| {
                EncryptionError::authentication(
                    "payload did not authenticate under this DEK and storage path",
                )
            })?;
        Ok(plaintext.to_vec())
    }
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCipher").field("key", &"[REDACTED]").finish()
    }
}
