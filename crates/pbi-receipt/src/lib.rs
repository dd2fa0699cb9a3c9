// SPDX-License-Identifier: MIT OR Apache-2.0
//! pbi-receipt
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Receipt minting and HMAC fingerprint verification (distilled spec §3,
//! §4.1, C6). A receipt's `receipt_hash_hex` is an HMAC-SHA-256 over a fixed
//! string built from its own id, challenge id, and decision — so a receipt
//! is self-verifying without a round-trip to the store.

mod builder;

pub use builder::ReceiptBuilder;
pub use pbi_core::{Decision, Receipt};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Format the HMAC signing input for a receipt: `"receipt:<id>:challenge:<challengeId>:decision:<decision>"`.
pub fn signing_input(id: Uuid, challenge_id: Uuid, decision: Decision) -> String {
    format!(
        "receipt:{id}:challenge:{challenge_id}:decision:{}",
        decision_wire_str(decision)
    )
}

/// Mint a receipt: generates a fresh id, stamps `created_at = now`, and
/// computes `receipt_hash_hex` under `secret`.
pub fn mint(tenant_id: Uuid, challenge_id: Uuid, decision: Decision, secret: &[u8]) -> Receipt {
    let id = Uuid::new_v4();
    let receipt_hash_hex = pbi_crypto::hmac_sha256_hex(secret, signing_input(id, challenge_id, decision).as_bytes());
    Receipt {
        id,
        tenant_id,
        challenge_id,
        decision,
        receipt_hash_hex,
        created_at: Utc::now(),
    }
}

/// Re-verify a receipt's `receipt_hash_hex` under `secret`, recomputing the
/// HMAC from its own id/challenge id/decision. Used both at mint time (as a
/// self-check) and by `POST /v1/pbi/receipts/verify`.
pub fn verify_hash(receipt: &Receipt, secret: &[u8]) -> bool {
    let expected = pbi_crypto::hmac_sha256_hex(
        secret,
        signing_input(receipt.id, receipt.challenge_id, receipt.decision).as_bytes(),
    );
    expected == receipt.receipt_hash_hex
}

fn decision_wire_str(decision: Decision) -> &'static str {
    match decision {
        Decision::PbiVerified => "PBI_VERIFIED",
        Decision::Failed => "FAILED",
        Decision::Expired => "EXPIRED",
        Decision::Replayed => "REPLAYED",
    }
}

/// Stamp an explicit `created_at` rather than `Utc::now()`; used by stores
/// reconstructing a [`Receipt`] read back from persistence.
pub fn from_parts(
    id: Uuid,
    tenant_id: Uuid,
    challenge_id: Uuid,
    decision: Decision,
    receipt_hash_hex: String,
    created_at: DateTime<Utc>,
) -> Receipt {
    Receipt {
        id,
        tenant_id,
        challenge_id,
        decision,
        receipt_hash_hex,
        created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"at-least-32-bytes-of-receipt-secret!!";

    #[test]
    fn minted_receipt_self_verifies() {
        let r = mint(Uuid::new_v4(), Uuid::new_v4(), Decision::PbiVerified, SECRET);
        assert!(verify_hash(&r, SECRET));
    }

    #[test]
    fn tampered_decision_fails_verification() {
        let mut r = mint(Uuid::new_v4(), Uuid::new_v4(), Decision::PbiVerified, SECRET);
        r.decision = Decision::Failed;
        assert!(!verify_hash(&r, SECRET));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let r = mint(Uuid::new_v4(), Uuid::new_v4(), Decision::PbiVerified, SECRET);
        assert!(!verify_hash(&r, b"a-completely-different-secret!!"));
    }

    #[test]
    fn decision_wire_strings_match_glossary() {
        assert_eq!(decision_wire_str(Decision::PbiVerified), "PBI_VERIFIED");
        assert_eq!(decision_wire_str(Decision::Failed), "FAILED");
        assert_eq!(decision_wire_str(Decision::Expired), "EXPIRED");
        assert_eq!(decision_wire_str(Decision::Replayed), "REPLAYED");
    }
}
