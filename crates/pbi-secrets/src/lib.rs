// SPDX-License-Identifier: MIT OR Apache-2.0
//! pbi-secrets
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Two cross-cutting guards (distilled spec §4 C13): re-verifying a receipt
//! by id+hash for `POST /v1/pbi/receipts/verify`, and AES-GCM at-rest
//! encryption for webhook endpoint secrets.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use pbi_core::{EncryptedSecret, Receipt};
use rand::RngCore;

/// Failures encrypting or decrypting a webhook secret.
#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    /// `key` was not exactly 32 bytes.
    #[error("AES-256-GCM key must be exactly 32 bytes")]
    InvalidKeyLength,
    /// The stored ciphertext or IV was not valid base64.
    #[error("invalid base64 in encrypted secret")]
    InvalidEncoding,
    /// Decryption failed (wrong key, or tampered ciphertext/tag).
    #[error("AES-GCM decryption failed")]
    DecryptionFailed,
}

/// Re-verify a receipt by id+hash: `candidate_hash_hex` must match the
/// receipt's stored [`Receipt::receipt_hash_hex`], and that stored value
/// must itself still check out under `secret`. Used by
/// `POST /v1/pbi/receipts/verify`.
pub fn verify_receipt(receipt: &Receipt, candidate_hash_hex: &str, secret: &[u8]) -> bool {
    candidate_hash_hex == receipt.receipt_hash_hex && pbi_receipt::verify_hash(receipt, secret)
}

/// Encrypt `raw_secret` under the 32-byte AES-256-GCM `key`, returning the
/// at-rest record. A fresh 96-bit nonce is drawn for every call.
pub fn encrypt_secret(key: &[u8], raw_secret: &[u8]) -> Result<EncryptedSecret, SecretsError> {
    let cipher = cipher_for(key)?;
    let mut iv_bytes = [0u8; 12];
    rand::rngs::OsRng.fill_bytes(&mut iv_bytes);
    let nonce = Nonce::from_slice(&iv_bytes);

    let ciphertext = cipher
        .encrypt(nonce, raw_secret)
        .map_err(|_| SecretsError::DecryptionFailed)?;

    Ok(EncryptedSecret {
        ciphertext_b64: pbi_crypto::base64url_encode(&ciphertext),
        iv_b64: pbi_crypto::base64url_encode(&iv_bytes),
        secret_hash_hex: pbi_crypto::sha256_hex(raw_secret),
    })
}

/// Decrypt a webhook secret previously produced by [`encrypt_secret`].
pub fn decrypt_secret(key: &[u8], encrypted: &EncryptedSecret) -> Result<Vec<u8>, SecretsError> {
    let cipher = cipher_for(key)?;
    let ciphertext = pbi_crypto::base64url_decode(&encrypted.ciphertext_b64)
        .map_err(|_| SecretsError::InvalidEncoding)?;
    let iv = pbi_crypto::base64url_decode(&encrypted.iv_b64)
        .map_err(|_| SecretsError::InvalidEncoding)?;
    let nonce = Nonce::from_slice(&iv);

    cipher
        .decrypt(nonce, ciphertext.as_slice())
        .map_err(|_| SecretsError::DecryptionFailed)
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm, SecretsError> {
    if key.len() != 32 {
        return Err(SecretsError::InvalidKeyLength);
    }
    Ok(Aes256Gcm::new_from_slice(key).expect("length checked above"))
}
