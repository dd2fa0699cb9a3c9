//! ES256 (P-256 ECDSA) signature verification over the WebAuthn signed byte
//! string.

use p256::ecdsa::signature::Verifier as _;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;

/// Failure verifying an ES256 signature.
#[derive(Debug, thiserror::Error)]
pub enum Es256Error {
    /// `pubKeyPem` was not a valid SPKI PEM-encoded P-256 public key.
    #[error("invalid P-256 SPKI PEM public key: {0}")]
    InvalidPublicKey(String),
    /// `signature` was not a valid DER-encoded ECDSA signature.
    #[error("invalid DER-encoded signature")]
    InvalidSignature,
}

/// Verify `signature` (DER-encoded ECDSA) over `signed_bytes` using the
/// SPKI PEM-encoded P-256 public key `pub_key_pem`.
///
/// Returns `Ok(true)`/`Ok(false)` for a structurally valid key and
/// signature that cryptographically succeeds or fails; returns `Err` only
/// when the inputs themselves are malformed (wrong curve, bad PEM, bad DER).
/// Non-P-256 curves are rejected by construction: [`VerifyingKey`] only
/// parses P-256 keys.
pub fn verify_es256(
    pub_key_pem: &str,
    signed_bytes: &[u8],
    der_signature: &[u8],
) -> Result<bool, Es256Error> {
    let key = VerifyingKey::from_public_key_pem(pub_key_pem)
        .map_err(|e| Es256Error::InvalidPublicKey(e.to_string()))?;
    let sig = Signature::from_der(der_signature).map_err(|_| Es256Error::InvalidSignature)?;
    Ok(key.verify(signed_bytes, &sig).is_ok())
}
