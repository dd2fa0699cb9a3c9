// SPDX-License-Identifier: MIT OR Apache-2.0
//! pbi-challenge
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Mint, load, and mark-used operations over the append-only
//! `pbi_challenges` table (distilled spec §4.3, C4).

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use pbi_core::Challenge;
use pbi_core::Purpose;
use rand::RngCore;
use sqlx::PgPool;
use uuid::Uuid;

/// Failures minting, loading, or consuming a challenge.
#[derive(Debug, thiserror::Error)]
pub enum ChallengeError {
    /// `actionHashHex` did not match `^[0-9a-f]{64}$`.
    #[error("action hash must be 64 lowercase hex characters")]
    InvalidActionHash,
    /// `ttlSeconds` fell outside `[10, 600]`.
    #[error("ttlSeconds must be between 10 and 600")]
    InvalidTtl,
    /// The persisted `purpose` column held a value outside the known enum.
    #[error("unrecognized purpose: {0}")]
    UnknownPurpose(String),
    /// The store returned an error.
    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

/// Mint a fresh challenge: validates `action_hash_hex` and `ttl_seconds`,
/// generates a random 256-bit nonce, and persists the record.
pub async fn mint(
    pool: &PgPool,
    tenant_id: Uuid,
    purpose: Purpose,
    action_hash_hex: &str,
    ttl_seconds: i64,
) -> Result<Challenge, ChallengeError> {
    if !Challenge::is_valid_action_hash(action_hash_hex) {
        return Err(ChallengeError::InvalidActionHash);
    }
    if !Challenge::is_valid_ttl(ttl_seconds) {
        return Err(ChallengeError::InvalidTtl);
    }

    let id = Uuid::new_v4();
    let nonce = generate_nonce();
    let now = Utc::now();
    let expires_at = now + chrono::Duration::seconds(ttl_seconds);

    sqlx::query(
        "INSERT INTO pbi_challenges \
         (id, tenant_id, nonce, purpose, action_hash_hex, expires_at, used_at, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, NULL, $7)",
    )
    .bind(id)
    .bind(tenant_id)
    .bind(&nonce)
    .bind(purpose.wire_str())
    .bind(action_hash_hex)
    .bind(expires_at)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Challenge {
        id,
        tenant_id,
        nonce,
        purpose,
        action_hash_hex: action_hash_hex.to_string(),
        expires_at,
        used_at: None,
        created_at: now,
    })
}

/// Load a challenge by id, returning `None` if it does not exist.
pub async fn load(pool: &PgPool, id: Uuid) -> Result<Option<Challenge>, ChallengeError> {
    let row = sqlx::query_as::<_, ChallengeRow>(
        "SELECT id, tenant_id, nonce, purpose, action_hash_hex, expires_at, used_at, created_at \
         FROM pbi_challenges WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(TryInto::try_into).transpose()
}

/// Mark a challenge used, idempotently and race-safely: the single
/// conditional `UPDATE ... WHERE used_at IS NULL` is the source of truth,
/// not a prior `load`. Returns `true` if this call was the one that
/// transitioned the challenge (first use); `false` if it was already used.
pub async fn mark_used(pool: &PgPool, id: Uuid) -> Result<bool, ChallengeError> {
    let result = sqlx::query(
        "UPDATE pbi_challenges SET used_at = now() WHERE id = $1 AND used_at IS NULL",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(sqlx::FromRow)]
struct ChallengeRow {
    id: Uuid,
    tenant_id: Uuid,
    nonce: String,
    purpose: String,
    action_hash_hex: String,
    expires_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ChallengeRow> for Challenge {
    type Error = ChallengeError;

    fn try_from(row: ChallengeRow) -> Result<Self, Self::Error> {
        let purpose = Purpose::parse_wire(&row.purpose)
            .ok_or_else(|| ChallengeError::UnknownPurpose(row.purpose))?;
        Ok(Challenge {
            id: row.id,
            tenant_id: row.tenant_id,
            nonce: row.nonce,
            purpose,
            action_hash_hex: row.action_hash_hex,
            expires_at: row.expires_at,
            used_at: row.used_at,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_is_32_bytes_base64url() {
        let nonce = generate_nonce();
        let decoded = URL_SAFE_NO_PAD.decode(&nonce).unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn two_nonces_are_distinct() {
        assert_ne!(generate_nonce(), generate_nonce());
    }

    #[test]
    fn purpose_wire_strings_round_trip() {
        for p in [
            Purpose::ActionCommit,
            Purpose::ArtifactAuthorship,
            Purpose::EvidenceSubmit,
            Purpose::AdminDangerousOp,
        ] {
            let s = p.wire_str();
            assert_eq!(Purpose::parse_wire(s), Some(p));
        }
    }

    #[test]
    fn parse_purpose_rejects_unknown() {
        assert_eq!(Purpose::parse_wire("NOT_A_PURPOSE"), None);
    }
}
