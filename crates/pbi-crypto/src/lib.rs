// SPDX-License-Identifier: MIT OR Apache-2.0
//! pbi-crypto
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Canonical JSON serialization, SHA-256/HMAC-SHA-256 hashing, base64url
//! codecs, ES256 (P-256 ECDSA) signature verification, and Ed25519 signing.
//! This is the primitive layer every other component in the attestation
//! pipeline builds on; it has no knowledge of tenants, challenges, or
//! receipts.

/// Deterministic JSON serialization used for export-pack manifests and
/// trust-bundle key identifiers.
pub mod canonical;
/// ES256 (P-256 ECDSA) signature verification over the WebAuthn signed byte
/// string.
pub mod es256;
/// Ed25519 signing/verification, used for export-pack manifests.
pub mod ed25519;
/// SHA-256 and HMAC-SHA-256 primitives plus the base64url/hex codecs shared
/// across components.
pub mod hash;

pub use canonical::{canonicalize, CanonicalJsonError};
pub use ed25519::{ed25519_sign, ed25519_verify, Ed25519Error};
pub use es256::{verify_es256, Es256Error};
pub use hash::{base64url_decode, base64url_encode, hmac_sha256_hex, sha256_hex};
