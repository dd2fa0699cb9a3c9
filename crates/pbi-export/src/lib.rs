// SPDX-License-Identifier: MIT OR Apache-2.0
//! pbi-export
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Signed export packs (distilled spec §4.8, C10): a filtered receipt set,
//! a policy snapshot, and an optional trust snapshot bundled with a
//! canonical, Ed25519-signed manifest so a consumer can verify the pack
//! offline without talking back to this service.

use chrono::{DateTime, Utc};
use pbi_core::{Challenge, Receipt};
use pbi_policy::PolicyDocument;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Failure building or verifying an export pack.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// A receipt or the manifest could not be serialized.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
    /// The manifest could not be canonicalized.
    #[error(transparent)]
    Canonical(#[from] pbi_crypto::CanonicalJsonError),
    /// Signing or verifying the manifest failed.
    #[error(transparent)]
    Ed25519(#[from] pbi_crypto::Ed25519Error),
    /// The signing key was not a 32-byte Ed25519 seed once decoded.
    #[error("export signing key must decode to 32 bytes, got {0}")]
    BadSigningKeyLength(usize),
    /// The public key was not a 32-byte Ed25519 key once decoded.
    #[error("export public key must decode to 32 bytes, got {0}")]
    BadPublicKeyLength(usize),
    /// A file's recomputed SHA-256 did not match the manifest entry.
    #[error("file {name} hash mismatch: manifest says {expected}, recomputed {actual}")]
    HashMismatch {
        /// The file name.
        name: String,
        /// The hash recorded in the manifest.
        expected: String,
        /// The hash recomputed from the file's bytes.
        actual: String,
    },
    /// A file named in the manifest was not present in the pack.
    #[error("file {0} named in manifest is missing from the pack")]
    MissingFile(String),
    /// The Ed25519 signature did not verify against the embedded public key.
    #[error("export pack signature is invalid")]
    BadSignature,
}

/// The criteria used to select the receipts bundled into this pack, echoed
/// verbatim into the manifest for audit purposes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExportFilter {
    /// Tenant the export was scoped to.
    pub tenant_id: uuid::Uuid,
    /// `actionHashHex` filter, if any was applied.
    pub action_hash_hex: Option<String>,
    /// `purpose` filter, if any was applied.
    pub purpose: Option<String>,
    /// `decision` filter, if any was applied.
    pub decision: Option<String>,
    /// Lower bound on `createdAt`, if any.
    pub created_after: Option<DateTime<Utc>>,
    /// Upper bound on `createdAt`, if any.
    pub created_before: Option<DateTime<Utc>>,
}

/// One receipt plus the challenge it attests to, the unit of
/// `receipts.ndjson`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptRecord {
    /// The persisted receipt.
    pub receipt: Receipt,
    /// The challenge the receipt attests to.
    pub challenge: Challenge,
}

/// A named file's hash and size, as recorded in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FileDigest {
    /// Lowercase hex SHA-256 of the file's bytes.
    pub sha256: String,
    /// File size in bytes.
    pub bytes: u64,
}

/// The `{version, generatedAt, filters, totalCount, files}` manifest,
/// canonicalized and signed to produce a [`SignatureRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Manifest {
    /// Manifest schema version; always `"1.0"`.
    pub version: String,
    /// When this pack was assembled.
    pub generated_at: DateTime<Utc>,
    /// The selection criteria used to build `receipts.ndjson`.
    pub filters: ExportFilter,
    /// Number of receipts in `receipts.ndjson`.
    pub total_count: usize,
    /// File name to digest, for every file in the pack.
    pub files: BTreeMap<String, FileDigest>,
}

/// The detached Ed25519 signature over the canonical manifest bytes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SignatureRecord {
    /// Always `"Ed25519"`.
    pub algorithm: String,
    /// PEM-encoded Ed25519 public key the signature can be checked against.
    pub public_key_pem: String,
    /// Base64url-encoded 64-byte signature.
    pub signature_b64_url: String,
    /// SHA-256 of the canonical manifest bytes that were signed.
    pub manifest_sha256: String,
    /// When the signature was produced.
    pub signed_at: DateTime<Utc>,
}

/// A complete export pack: the manifest, its signature, and every file it
/// describes, keyed by name.
#[derive(Debug, Clone)]
pub struct ExportPack {
    /// The manifest.
    pub manifest: Manifest,
    /// The manifest's detached signature.
    pub signature: SignatureRecord,
    /// File name to raw bytes, covering every entry in `manifest.files`.
    pub files: BTreeMap<String, Vec<u8>>,
}

const RECEIPTS_FILE: &str = "receipts.ndjson";
const POLICY_FILE: &str = "policy.snapshot.json";
const TRUST_FILE: &str = "trust.snapshot.json";

fn digest(bytes: &[u8]) -> FileDigest {
    FileDigest {
        sha256: pbi_crypto::sha256_hex(bytes),
        bytes: bytes.len() as u64,
    }
}

/// Assemble a signed export pack from a filtered receipt set, a policy
/// snapshot, an optional trust snapshot, and the Ed25519 keypair (32-byte
/// seed plus PEM-encoded public key) that will sign the manifest.
pub fn build_pack(
    filters: ExportFilter,
    receipts: &[ReceiptRecord],
    policy: &PolicyDocument,
    trust_snapshot: Option<&serde_json::Value>,
    signing_key_bytes: &[u8],
    public_key_pem: &str,
) -> Result<ExportPack, ExportError> {
    let signing_key: [u8; 32] = signing_key_bytes
        .try_into()
        .map_err(|_| ExportError::BadSigningKeyLength(signing_key_bytes.len()))?;

    let mut ndjson = String::new();
    for record in receipts {
        ndjson.push_str(&serde_json::to_string(record)?);
        ndjson.push('\n');
    }
    let policy_json = serde_json::to_string_pretty(policy)?;

    let mut files = BTreeMap::new();
    let mut digests = BTreeMap::new();
    digests.insert(RECEIPTS_FILE.to_string(), digest(ndjson.as_bytes()));
    files.insert(RECEIPTS_FILE.to_string(), ndjson.into_bytes());
    digests.insert(POLICY_FILE.to_string(), digest(policy_json.as_bytes()));
    files.insert(POLICY_FILE.to_string(), policy_json.into_bytes());
    if let Some(trust) = trust_snapshot {
        let trust_json = serde_json::to_string_pretty(trust)?;
        digests.insert(TRUST_FILE.to_string(), digest(trust_json.as_bytes()));
        files.insert(TRUST_FILE.to_string(), trust_json.into_bytes());
    }

    let generated_at = Utc::now();
    let manifest = Manifest {
        version: "1.0".to_string(),
        generated_at,
        filters,
        total_count: receipts.len(),
        files: digests,
    };

    let canonical = pbi_crypto::canonicalize(&manifest)?;
    let signature_bytes = pbi_crypto::ed25519_sign(&signing_key, canonical.as_bytes())?;
    let signature = SignatureRecord {
        algorithm: "Ed25519".to_string(),
        public_key_pem: public_key_pem.to_string(),
        signature_b64_url: pbi_crypto::base64url_encode(&signature_bytes),
        manifest_sha256: pbi_crypto::sha256_hex(canonical.as_bytes()),
        signed_at: generated_at,
    };

    Ok(ExportPack { manifest, signature, files })
}

/// Offline verification of a previously built pack: canonicalize the
/// manifest, recompute every file's SHA-256, and Ed25519-verify the
/// signature against its own embedded `publicKeyPem`.
pub fn verify_pack(pack: &ExportPack) -> Result<(), ExportError> {
    let canonical = pbi_crypto::canonicalize(&pack.manifest)?;
    let recomputed_manifest_hash = pbi_crypto::sha256_hex(canonical.as_bytes());
    if recomputed_manifest_hash != pack.signature.manifest_sha256 {
        return Err(ExportError::HashMismatch {
            name: "manifest".to_string(),
            expected: pack.signature.manifest_sha256.clone(),
            actual: recomputed_manifest_hash,
        });
    }

    for (name, entry) in &pack.manifest.files {
        let bytes = pack.files.get(name).ok_or_else(|| ExportError::MissingFile(name.clone()))?;
        let actual = pbi_crypto::sha256_hex(bytes);
        if actual != entry.sha256 {
            return Err(ExportError::HashMismatch {
                name: name.clone(),
                expected: entry.sha256.clone(),
                actual,
            });
        }
    }

    let public_key_bytes = public_key_from_pem(&pack.signature.public_key_pem)?;
    let signature_bytes = pbi_crypto::base64url_decode(&pack.signature.signature_b64_url)
        .map_err(|_| ExportError::BadSignature)?;
    let ok = pbi_crypto::ed25519_verify(&public_key_bytes, canonical.as_bytes(), &signature_bytes)?;
    if !ok {
        return Err(ExportError::BadSignature);
    }
    Ok(())
}

/// Decode a PEM-wrapped raw 32-byte Ed25519 public key. Export keys are
/// stamped as plain PEM (not SPKI DER) so the public key can be embedded
/// and round-tripped without a dependency on an ASN.1 parser.
fn public_key_from_pem(pem: &str) -> Result<[u8; 32], ExportError> {
    let body: String = pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    let bytes = pbi_crypto::base64url_decode(&body)
        .or_else(|_| base64_standard_decode(&body))
        .map_err(|_| ExportError::BadPublicKeyLength(0))?;
    bytes
        .as_slice()
        .try_into()
        .map(|arr: [u8; 32]| arr)
        .map_err(|_| ExportError::BadPublicKeyLength(bytes.len()))
}

fn base64_standard_decode(s: &str) -> Result<Vec<u8>, ()> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s).map_err(|_| ())
}

/// PEM-wrap a raw 32-byte Ed25519 public key in the format
/// [`public_key_from_pem`] expects.
pub fn public_key_to_pem(public_key_bytes: &[u8; 32]) -> String {
    use base64::Engine;
    let body = base64::engine::general_purpose::STANDARD.encode(public_key_bytes);
    format!("-----BEGIN PBI EXPORT PUBLIC KEY-----\n{body}\n-----END PBI EXPORT PUBLIC KEY-----\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn keypair() -> ([u8; 32], String) {
        let sk = SigningKey::generate(&mut OsRng);
        (sk.to_bytes(), public_key_to_pem(&sk.verifying_key().to_bytes()))
    }

    fn sample_filter() -> ExportFilter {
        ExportFilter {
            tenant_id: uuid::Uuid::new_v4(),
            action_hash_hex: None,
            purpose: None,
            decision: None,
            created_after: None,
            created_before: None,
        }
    }

    #[test]
    fn builds_and_verifies_a_round_trip_pack() {
        let (sk, pk_pem) = keypair();
        let policy = PolicyDocument::new(Utc::now(), Some("test-suite".to_string()));
        let pack = build_pack(sample_filter(), &[], &policy, None, &sk, &pk_pem).unwrap();
        assert!(pack.manifest.files.contains_key(RECEIPTS_FILE));
        assert!(pack.manifest.files.contains_key(POLICY_FILE));
        assert!(!pack.manifest.files.contains_key(TRUST_FILE));
        verify_pack(&pack).unwrap();
    }

    #[test]
    fn trust_snapshot_is_optional_but_included_when_given() {
        let (sk, pk_pem) = keypair();
        let policy = PolicyDocument::new(Utc::now(), None);
        let trust = serde_json::json!({"attestors": []});
        let pack = build_pack(sample_filter(), &[], &policy, Some(&trust), &sk, &pk_pem).unwrap();
        assert!(pack.manifest.files.contains_key(TRUST_FILE));
        verify_pack(&pack).unwrap();
    }

    #[test]
    fn tampered_file_fails_verification() {
        let (sk, pk_pem) = keypair();
        let policy = PolicyDocument::new(Utc::now(), None);
        let mut pack = build_pack(sample_filter(), &[], &policy, None, &sk, &pk_pem).unwrap();
        pack.files.insert(POLICY_FILE.to_string(), b"tampered".to_vec());
        assert!(matches!(verify_pack(&pack), Err(ExportError::HashMismatch { .. })));
    }

    #[test]
    fn wrong_public_key_fails_signature_check() {
        let (sk, _) = keypair();
        let (_, other_pk_pem) = keypair();
        let policy = PolicyDocument::new(Utc::now(), None);
        let mut pack = build_pack(sample_filter(), &[], &policy, None, &sk, &other_pk_pem).unwrap();
        pack.signature.public_key_pem = other_pk_pem;
        assert!(matches!(verify_pack(&pack), Err(ExportError::BadSignature)));
    }
}
