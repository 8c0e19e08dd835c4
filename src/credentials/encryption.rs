//! AES-256-GCM encryption for credential tokens.
//!
//! Each token is sealed separately under a fresh random nonce. The GCM tag is
//! split off the AEAD output so a token is stored as three base64 fields:
//! ciphertext, IV and authentication tag.

use super::EncryptedToken;
use crate::error::{DecryptionError, EncryptionError};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt;

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const IV_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// Validates that the master key is exactly 32 bytes when base64 decoded.
///
/// # Arguments
/// * `key_base64` - Base64-encoded master key
///
/// # Returns
/// * `Ok(Vec<u8>)` - Decoded key bytes (32 bytes)
/// * `Err` - If key is invalid length or invalid base64
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .context("Failed to decode base64 encryption key")?;

    if key_bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        ));
    }

    Ok(key_bytes)
}

/// Symmetric cipher for token plaintexts.
///
/// The nonce is generated inside [`TokenCipher::encrypt`] and never accepted
/// from the caller, so a nonce cannot be reused under the same key.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Creates a cipher from raw key bytes (must be 32 bytes).
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        Ok(Self { cipher })
    }

    /// Creates a cipher from a base64-encoded 32-byte key.
    pub fn from_base64_key(key_base64: &str) -> Result<Self> {
        let key = validate_key(key_base64)?;
        Self::new(&key)
    }

    /// Encrypts plaintext under a freshly generated random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedToken, EncryptionError> {
        let iv = Aes256Gcm::generate_nonce(&mut OsRng);

        let sealed = self
            .cipher
            .encrypt(&iv, plaintext.as_bytes())
            .map_err(|_| EncryptionError)?;

        // aes-gcm appends the tag to the ciphertext
        let (ciphertext, auth_tag) = sealed.split_at(sealed.len() - TAG_SIZE);

        Ok(EncryptedToken {
            ciphertext: BASE64.encode(ciphertext),
            iv: BASE64.encode(iv),
            auth_tag: BASE64.encode(auth_tag),
        })
    }

    /// Decrypts a token, verifying its authentication tag.
    ///
    /// Fails if any field is malformed, the tag does not verify (wrong key,
    /// tampered ciphertext, IV or tag), or the plaintext is not UTF-8.
    pub fn decrypt(&self, token: &EncryptedToken) -> Result<String, DecryptionError> {
        let ciphertext = decode_field("ciphertext", &token.ciphertext)?;
        let iv = decode_field("iv", &token.iv)?;
        let auth_tag = decode_field("auth_tag", &token.auth_tag)?;

        if iv.len() != IV_SIZE {
            return Err(DecryptionError::Malformed {
                field: "iv",
                reason: format!("expected {} bytes, got {}", IV_SIZE, iv.len()),
            });
        }
        if auth_tag.len() != TAG_SIZE {
            return Err(DecryptionError::Malformed {
                field: "auth_tag",
                reason: format!("expected {} bytes, got {}", TAG_SIZE, auth_tag.len()),
            });
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&auth_tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
            .map_err(|_| DecryptionError::Authentication)?;

        String::from_utf8(plaintext).map_err(|_| DecryptionError::InvalidUtf8)
    }
}

impl fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>, DecryptionError> {
    BASE64.decode(value).map_err(|e| DecryptionError::Malformed {
        field,
        reason: e.to_string(),
    })
}
