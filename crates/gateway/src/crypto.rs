// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! AEAD encryption of config values at rest (AES-256-GCM).
//!
//! Encoded form is `<iv_hex>:<tag_hex>:<ciphertext_hex>`; the ciphertext
//! segment is empty for empty plaintext.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::Rng;
use std::fmt;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Typed failures from [`encrypt`] / [`decrypt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Key is not exactly 32 bytes.
    InvalidKey,
    /// Encoded value does not have three hex segments of the right shape.
    InvalidFormat,
    /// The ciphertext or tag failed authentication.
    AuthenticationFailed,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => f.write_str("encryption key must be 32 bytes"),
            Self::InvalidFormat => f.write_str("malformed encrypted value"),
            Self::AuthenticationFailed => f.write_str("decryption failed authentication"),
        }
    }
}

impl std::error::Error for CryptoError {}

fn cipher(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)
}

/// Encrypt a UTF-8 string. Each call draws a fresh nonce, so encrypting the
/// same plaintext twice yields different encodings.
pub fn encrypt(key: &[u8], plain: &str) -> Result<String, CryptoError> {
    let cipher = cipher(key)?;
    let mut iv = [0u8; NONCE_LEN];
    rand::rng().fill(&mut iv);

    let sealed = cipher
        .encrypt(Nonce::from_slice(&iv), Payload::from(plain.as_bytes()))
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    // aes-gcm appends the 16-byte tag to the ciphertext.
    let split = sealed.len() - TAG_LEN;
    let (ct, tag) = sealed.split_at(split);
    Ok(format!("{}:{}:{}", hex::encode(iv), hex::encode(tag), hex::encode(ct)))
}

/// Decrypt a value produced by [`encrypt`].
pub fn decrypt(key: &[u8], encoded: &str) -> Result<String, CryptoError> {
    let cipher = cipher(key)?;

    let mut parts = encoded.splitn(3, ':');
    let (iv_hex, tag_hex, ct_hex) = match (parts.next(), parts.next(), parts.next()) {
        (Some(iv), Some(tag), Some(ct)) => (iv, tag, ct),
        _ => return Err(CryptoError::InvalidFormat),
    };

    let iv = hex::decode(iv_hex).map_err(|_| CryptoError::InvalidFormat)?;
    let tag = hex::decode(tag_hex).map_err(|_| CryptoError::InvalidFormat)?;
    let ct = hex::decode(ct_hex).map_err(|_| CryptoError::InvalidFormat)?;
    if iv.len() != NONCE_LEN || tag.len() != TAG_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let mut sealed = ct;
    sealed.extend_from_slice(&tag);
    let plain = cipher
        .decrypt(Nonce::from_slice(&iv), Payload::from(sealed.as_slice()))
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    String::from_utf8(plain).map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
#[path = "crypto_tests.rs"]
mod tests;
