// SPDX-License-Identifier: MIT OR Apache-2.0
//! pbi-webauthn
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Stateless WebAuthn assertion verifier (distilled spec §4.4, C5). Reads
//! and writes nothing; every failure reason is one of [`pbi_error::ErrorCode`]'s
//! six cryptographic variants.

use pbi_error::ErrorCode;
use serde::Deserialize;
use std::collections::BTreeSet;

/// User-presence flag bit in `authenticatorData[32]`.
pub const FLAG_USER_PRESENT: u8 = 0x01;
/// User-verification flag bit in `authenticatorData[32]`.
pub const FLAG_USER_VERIFIED: u8 = 0x04;

/// The bundle a caller submits to `/v1/pbi/verify`, decoded from the wire.
#[derive(Debug, Clone)]
pub struct AssertionBundle {
    /// Base64url-encoded authenticator data.
    pub authenticator_data_b64url: String,
    /// Base64url-encoded `clientDataJSON`.
    pub client_data_json_b64url: String,
    /// Base64url-encoded DER ECDSA signature.
    pub signature_b64url: String,
    /// Base64url-encoded credential id (opaque; not interpreted here).
    pub cred_id_b64url: String,
    /// SPKI PEM-encoded P-256 public key bound to the credential.
    pub pub_key_pem: String,
}

#[derive(Deserialize)]
struct ClientData {
    #[serde(rename = "type")]
    type_: String,
    challenge: String,
    origin: String,
}

/// Run the eight-step verification procedure against `expected_challenge_b64url`
/// and `allowed_origins`. Returns `Ok(())` on success; on the first failing
/// check, returns the matching [`ErrorCode`] (one of the six cryptographic
/// reasons).
pub fn verify_assertion(
    expected_challenge_b64url: &str,
    bundle: &AssertionBundle,
    allowed_origins: &BTreeSet<String>,
) -> Result<(), ErrorCode> {
    let authenticator_data = pbi_crypto::base64url_decode(&bundle.authenticator_data_b64url)
        .map_err(|_| ErrorCode::BadClientData)?;
    let client_data_json_bytes = pbi_crypto::base64url_decode(&bundle.client_data_json_b64url)
        .map_err(|_| ErrorCode::BadClientData)?;
    let signature = pbi_crypto::base64url_decode(&bundle.signature_b64url)
        .map_err(|_| ErrorCode::BadSignature)?;

    let client_data: ClientData = serde_json::from_slice(&client_data_json_bytes)
        .map_err(|_| ErrorCode::BadClientData)?;

    if client_data.type_ != "webauthn.get" {
        return Err(ErrorCode::BadClientData);
    }
    if client_data.challenge != expected_challenge_b64url {
        return Err(ErrorCode::BadChallenge);
    }
    if !allowed_origins.contains(&client_data.origin) {
        return Err(ErrorCode::BadOrigin);
    }

    if authenticator_data.len() <= 32 {
        return Err(ErrorCode::MissingUp);
    }
    let flags = authenticator_data[32];
    if flags & FLAG_USER_PRESENT == 0 {
        return Err(ErrorCode::MissingUp);
    }
    if flags & FLAG_USER_VERIFIED == 0 {
        return Err(ErrorCode::MissingUv);
    }

    let client_data_hash_hex = pbi_crypto::sha256_hex(&client_data_json_bytes);
    let client_data_hash =
        hex::decode(&client_data_hash_hex).expect("sha256_hex always returns valid hex");
    let mut signed_bytes = authenticator_data;
    signed_bytes.extend_from_slice(&client_data_hash);

    let verified = pbi_crypto::verify_es256(&bundle.pub_key_pem, &signed_bytes, &signature)
        .map_err(|_| ErrorCode::BadSignature)?;
    if !verified {
        return Err(ErrorCode::BadSignature);
    }

    Ok(())
}
