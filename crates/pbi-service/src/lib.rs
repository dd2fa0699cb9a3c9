// SPDX-License-Identifier: MIT OR Apache-2.0
//! pbi-service
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The attestation orchestrator (distilled spec §4.5, C9): sequences
//! auth (C3), quota (C8), challenge (C4), WebAuthn verification (C5),
//! receipt minting (C6/C7), and webhook enqueue (C11) into the
//! challenge/verify state machine. Everything here is policy and
//! sequencing; the cryptography and storage live in the crates it calls.

use chrono::Utc;
use pbi_core::{Challenge, Decision, Purpose, Scope, Tenant, UsageKind, WebhookEventType};
use pbi_error::{ErrorCode, PbiError};
use pbi_policy::PolicyEngine;
use pbi_quota::DebitOutcome;
use pbi_receipt::Receipt;
use pbi_webauthn::AssertionBundle;
use sqlx::PgPool;
use uuid::Uuid;

/// Result of a successful `POST /v1/pbi/challenge`.
#[derive(Debug, Clone)]
pub struct MintOutcome {
    /// The minted challenge.
    pub challenge: Challenge,
    /// Metering state after the mint-time debit.
    pub metering: DebitOutcome,
}

/// `POST /v1/pbi/challenge`: auth scope check → debit one `challenge` unit
/// → mint. Quota is charged at mint time regardless of whether the
/// challenge is ever answered (distilled spec §4.5's charge-on-success
/// policy only governs `verify` units).
pub async fn mint_challenge(
    pool: &PgPool,
    tenant: &Tenant,
    purpose: Purpose,
    action_hash_hex: &str,
    ttl_seconds: i64,
) -> Result<MintOutcome, PbiError> {
    pbi_auth::require_scope(tenant, Scope::Verify)?;

    let metering = pbi_quota::debit(pool, tenant.id, UsageKind::Challenge, tenant.monthly_quota)
        .await
        .map_err(|e| PbiError::internal(e).with_context("stage", "debit_challenge"))?;
    if !metering.ok {
        return Err(PbiError::new(ErrorCode::QuotaExceeded, "monthly challenge quota exceeded")
            .with_context("monthKey", metering.month_key.clone()));
    }

    let challenge = pbi_challenge::mint(pool, tenant.id, purpose, action_hash_hex, ttl_seconds)
        .await
        .map_err(map_challenge_error)?;

    Ok(MintOutcome { challenge, metering })
}

/// Result of a `POST /v1/pbi/verify` call. `decision` mirrors the wire
/// `decision` field; only `PbiVerified` carries a persisted [`Receipt`],
/// per the state machine's "no receipt" branches.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    /// The verify outcome.
    pub decision: Decision,
    /// Present on `Failed`, carrying the specific reason code (a
    /// cryptographic [`ErrorCode::wire_str`] or `"purpose_mismatch"`).
    pub reason: Option<String>,
    /// Present only when `decision == PbiVerified`.
    pub receipt: Option<Receipt>,
    /// Present once the verify-quota debit has run (success or
    /// cryptographic failure both reach that stage; expiry/replay do not).
    pub metering: Option<DebitOutcome>,
}

/// `POST /v1/pbi/verify`: the six-step contract from the distilled spec's
/// orchestrator state machine. Quota exhaustion at step 5 is a hard error
/// (402), not a `VerifyOutcome`, since no decision can be reported without
/// having paid for the attempt.
pub async fn verify(
    pool: &PgPool,
    tenant: &Tenant,
    policy: &PolicyEngine,
    receipt_secret: &[u8],
    challenge_id: Uuid,
    assertion: &AssertionBundle,
) -> Result<VerifyOutcome, PbiError> {
    pbi_auth::require_scope(tenant, Scope::Verify)?;

    let challenge = pbi_challenge::load(pool, challenge_id)
        .await
        .map_err(|e| PbiError::internal(e).with_context("stage", "load_challenge"))?;
    let challenge = match challenge {
        Some(c) if c.tenant_id == tenant.id => c,
        _ => return Err(PbiError::new(ErrorCode::UnknownChallenge, "unknown challenge")),
    };

    let now = Utc::now();
    if challenge.is_expired(now) {
        return Ok(no_receipt_outcome(Decision::Expired, None));
    }
    if challenge.is_used() {
        return Ok(no_receipt_outcome(Decision::Replayed, None));
    }

    let governs = policy.governs(challenge.purpose);
    if !governs.allowed {
        return Ok(no_receipt_outcome(Decision::Failed, governs.reason));
    }
    let allowed_origins = policy.allowed_origins(challenge.purpose);

    if let Err(code) = pbi_webauthn::verify_assertion(&challenge.nonce, assertion, &allowed_origins) {
        return Ok(no_receipt_outcome(Decision::Failed, Some(code.wire_str().to_string())));
    }

    let metering = pbi_quota::debit(pool, tenant.id, UsageKind::Verify, tenant.monthly_quota)
        .await
        .map_err(|e| PbiError::internal(e).with_context("stage", "debit_verify"))?;
    if !metering.ok {
        return Err(PbiError::new(ErrorCode::QuotaExceeded, "monthly verify quota exceeded")
            .with_context("monthKey", metering.month_key.clone()));
    }

    let transitioned = pbi_challenge::mark_used(pool, challenge.id)
        .await
        .map_err(|e| PbiError::internal(e).with_context("stage", "mark_used"))?;
    if !transitioned {
        // Lost the race to a concurrent verify on the same challenge.
        return Ok(VerifyOutcome {
            decision: Decision::Replayed,
            reason: None,
            receipt: None,
            metering: Some(metering),
        });
    }

    let receipt = pbi_receipt::mint(tenant.id, challenge.id, Decision::PbiVerified, receipt_secret);
    pbi_receipt_store::insert(pool, &receipt)
        .await
        .map_err(|e| PbiError::internal(e).with_context("stage", "persist_receipt"))?;

    enqueue_receipt_webhook(pool, tenant.id, &receipt, &challenge).await;

    Ok(VerifyOutcome {
        decision: Decision::PbiVerified,
        reason: None,
        receipt: Some(receipt),
        metering: Some(metering),
    })
}

fn no_receipt_outcome(decision: Decision, reason: Option<String>) -> VerifyOutcome {
    VerifyOutcome { decision, reason, receipt: None, metering: None }
}

/// Best-effort: a webhook enqueue failure must not roll back the already
/// persisted receipt or fail the caller's verify request.
async fn enqueue_receipt_webhook(pool: &PgPool, tenant_id: Uuid, receipt: &Receipt, challenge: &Challenge) {
    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            tracing::warn!(error = %e, "failed to open transaction for webhook enqueue");
            return;
        }
    };

    let data = serde_json::json!({ "receipt": receipt, "challenge": challenge });
    match pbi_webhook::enqueue(&mut tx, tenant_id, WebhookEventType::ReceiptCreated, receipt.id, data).await {
        Ok(delivery_ids) => {
            if let Err(e) = tx.commit().await {
                tracing::warn!(error = %e, "failed to commit webhook enqueue");
            } else {
                tracing::debug!(count = delivery_ids.len(), receipt_id = %receipt.id, "enqueued webhook deliveries");
            }
        }
        Err(e) => tracing::warn!(error = %e, receipt_id = %receipt.id, "failed to enqueue webhook deliveries"),
    }
}

fn map_challenge_error(e: pbi_challenge::ChallengeError) -> PbiError {
    use pbi_challenge::ChallengeError;
    match &e {
        ChallengeError::InvalidActionHash | ChallengeError::InvalidTtl => {
            PbiError::new(ErrorCode::SchemaInvalid, e.to_string())
        }
        _ => PbiError::internal(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_receipt_outcome_carries_reason_through() {
        let outcome = no_receipt_outcome(Decision::Expired, None);
        assert_eq!(outcome.decision, Decision::Expired);
        assert!(outcome.receipt.is_none());
        assert!(outcome.metering.is_none());

        let outcome = no_receipt_outcome(Decision::Failed, Some("purpose_mismatch".into()));
        assert_eq!(outcome.reason.as_deref(), Some("purpose_mismatch"));
    }
}
