//! Ed25519 signing/verification, used only for export-pack manifests.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Failure signing or verifying with Ed25519.
#[derive(Debug, thiserror::Error)]
pub enum Ed25519Error {
    /// The signing key bytes were not a valid 32-byte Ed25519 seed.
    #[error("invalid Ed25519 signing key")]
    InvalidSigningKey,
    /// The public key bytes were not a valid 32-byte Ed25519 public key.
    #[error("invalid Ed25519 public key")]
    InvalidPublicKey,
    /// The signature bytes were not a valid 64-byte Ed25519 signature.
    #[error("invalid Ed25519 signature encoding")]
    InvalidSignature,
}

/// Sign `message` with the 32-byte Ed25519 seed `signing_key_bytes`,
/// returning the 64-byte signature.
pub fn ed25519_sign(
    signing_key_bytes: &[u8; 32],
    message: &[u8],
) -> Result<[u8; 64], Ed25519Error> {
    let key = SigningKey::from_bytes(signing_key_bytes);
    let sig: Signature = key.sign(message);
    Ok(sig.to_bytes())
}

/// Verify a 64-byte Ed25519 `signature` over `message` against the 32-byte
/// public key `public_key_bytes`.
pub fn ed25519_verify(
    public_key_bytes: &[u8; 32],
    message: &[u8],
    signature: &[u8],
) -> Result<bool, Ed25519Error> {
    let key = VerifyingKey::from_bytes(public_key_bytes)
        .map_err(|_| Ed25519Error::InvalidPublicKey)?;
    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| Ed25519Error::InvalidSignature)?;
    let sig = Signature::from_bytes(&sig_bytes);
    Ok(key.verify(message, &sig).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey as DalekSigningKey;
    use rand::rngs::OsRng;

    fn keypair() -> ([u8; 32], [u8; 32]) {
        let sk = DalekSigningKey::generate(&mut OsRng);
        (sk.to_bytes(), sk.verifying_key().to_bytes())
    }

    #[test]
    fn signs_and_verifies() {
        let (sk_bytes, pk_bytes) = keypair();
        let sig = ed25519_sign(&sk_bytes, b"manifest bytes").unwrap();
        assert!(ed25519_verify(&pk_bytes, b"manifest bytes", &sig).unwrap());
    }

    #[test]
    fn rejects_tampered_message() {
        let (sk_bytes, pk_bytes) = keypair();
        let sig = ed25519_sign(&sk_bytes, b"original").unwrap();
        assert!(!ed25519_verify(&pk_bytes, b"tampered", &sig).unwrap());
    }

    #[test]
    fn rejects_malformed_signature_length() {
        let (_, pk_bytes) = keypair();
        let err = ed25519_verify(&pk_bytes, b"msg", b"too-short").unwrap_err();
        assert!(matches!(err, Ed25519Error::InvalidSignature));
    }
}
