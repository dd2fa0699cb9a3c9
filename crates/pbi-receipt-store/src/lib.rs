// SPDX-License-Identifier: MIT OR Apache-2.0
//! pbi-receipt-store
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Append-only persistence for minted receipts (C6's write side) and the
//! cursor-paginated query planner over that log (C7).

use chrono::{DateTime, Utc};
use pbi_core::{Cursor, Decision, Purpose, Receipt, SortOrder};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

/// Failures reading or writing the receipt log.
#[derive(Debug, thiserror::Error)]
pub enum ReceiptStoreError {
    /// The underlying query failed.
    #[error(transparent)]
    Query(#[from] sqlx::Error),
    /// A client-supplied cursor did not decode.
    #[error(transparent)]
    Cursor(#[from] pbi_core::CursorError),
    /// A persisted `decision` column held a value outside the known enum.
    /// Surfaced rather than silently coerced, since a row that doesn't
    /// parse is data corruption, not a routine `FAILED` verify.
    #[error("unrecognized persisted decision: {0}")]
    UnknownDecision(String),
}

/// Append `receipt` to the log. Receipts are never updated or deleted.
pub async fn insert(pool: &PgPool, receipt: &Receipt) -> Result<(), ReceiptStoreError> {
    sqlx::query(
        "INSERT INTO pbi_receipts (id, tenant_id, challenge_id, decision, receipt_hash_hex, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(receipt.id)
    .bind(receipt.tenant_id)
    .bind(receipt.challenge_id)
    .bind(decision_wire_str(receipt.decision))
    .bind(&receipt.receipt_hash_hex)
    .bind(receipt.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Load a single receipt by id, scoped to `tenant_id`. Used by
/// `POST /v1/pbi/receipts/verify`.
pub async fn load_by_id(
    pool: &PgPool,
    tenant_id: Uuid,
    id: Uuid,
) -> Result<Option<Receipt>, ReceiptStoreError> {
    let row = sqlx::query_as::<_, ReceiptRow>(
        "SELECT id, tenant_id, challenge_id, decision, receipt_hash_hex, created_at \
         FROM pbi_receipts WHERE id = $1 AND tenant_id = $2",
    )
    .bind(id)
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?;
    row.map(ReceiptRow::into_receipt).transpose()
}

/// Inputs to the cursor-paginated receipt query (distilled spec §4.6).
#[derive(Debug, Clone)]
pub struct ReceiptFilter {
    /// Owning tenant; every query is tenant-scoped.
    pub tenant_id: Uuid,
    /// Page size, already clamped by the caller.
    pub limit: i64,
    /// Sort direction; also governs the cursor predicate's comparison.
    pub order: SortOrder,
    /// Opaque pagination cursor from a prior page's `nextCursor`.
    pub cursor: Option<Cursor>,
    /// Filter by the challenge's bound action hash.
    pub action_hash_hex: Option<String>,
    /// Filter to a single challenge.
    pub challenge_id: Option<Uuid>,
    /// Filter by the challenge's purpose.
    pub purpose: Option<Purpose>,
    /// Filter by verify outcome.
    pub decision: Option<Decision>,
    /// Inclusive lower bound on `created_at`.
    pub created_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub created_before: Option<DateTime<Utc>>,
}

/// One page of the receipt log, plus the cursor for the next page (`None`
/// once the log is exhausted in the requested direction).
#[derive(Debug, Clone)]
pub struct ReceiptPage {
    /// The page's receipts, in `(created_at, id)` order per `order`.
    pub receipts: Vec<Receipt>,
    /// Cursor to pass as `cursor` on the next call, if any.
    pub next_cursor: Option<Cursor>,
}

/// Run the composed, stably paginated query described in the distilled
/// spec's receipt query planner section.
pub async fn query(pool: &PgPool, filter: &ReceiptFilter) -> Result<ReceiptPage, ReceiptStoreError> {
    let (cmp, order_sql) = match filter.order {
        SortOrder::Desc => ("<", "DESC"),
        SortOrder::Asc => (">", "ASC"),
    };

    let mut qb = QueryBuilder::<Postgres>::new(
        "SELECT r.id, r.tenant_id, r.challenge_id, r.decision, r.receipt_hash_hex, r.created_at \
         FROM pbi_receipts r JOIN pbi_challenges c ON c.id = r.challenge_id WHERE r.tenant_id = ",
    );
    qb.push_bind(filter.tenant_id);

    if let Some(action_hash_hex) = &filter.action_hash_hex {
        qb.push(" AND c.action_hash_hex = ").push_bind(action_hash_hex.clone());
    }
    if let Some(challenge_id) = filter.challenge_id {
        qb.push(" AND r.challenge_id = ").push_bind(challenge_id);
    }
    if let Some(purpose) = filter.purpose {
        qb.push(" AND c.purpose = ").push_bind(purpose.wire_str());
    }
    if let Some(decision) = filter.decision {
        qb.push(" AND r.decision = ").push_bind(decision_wire_str(decision));
    }
    if let Some(created_after) = filter.created_after {
        qb.push(" AND r.created_at >= ").push_bind(created_after);
    }
    if let Some(created_before) = filter.created_before {
        qb.push(" AND r.created_at < ").push_bind(created_before);
    }
    if let Some(cursor) = filter.cursor {
        qb.push(" AND (r.created_at ")
            .push(cmp)
            .push(" ")
            .push_bind(cursor.created_at)
            .push(" OR (r.created_at = ")
            .push_bind(cursor.created_at)
            .push(" AND r.id ")
            .push(cmp)
            .push(" ")
            .push_bind(cursor.id)
            .push("))");
    }

    qb.push(" ORDER BY r.created_at ")
        .push(order_sql)
        .push(", r.id ")
        .push(order_sql)
        .push(" LIMIT ")
        .push_bind(filter.limit + 1);

    let mut rows = qb.build_query_as::<ReceiptRow>().fetch_all(pool).await?;

    let has_more = rows.len() as i64 > filter.limit;
    if has_more {
        rows.truncate(filter.limit as usize);
    }
    let next_cursor = if has_more {
        rows.last().map(|r| Cursor { created_at: r.created_at, id: r.id })
    } else {
        None
    };

    let receipts = rows
        .into_iter()
        .map(ReceiptRow::into_receipt)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ReceiptPage { receipts, next_cursor })
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ReceiptRow {
    id: Uuid,
    tenant_id: Uuid,
    challenge_id: Uuid,
    decision: String,
    receipt_hash_hex: String,
    created_at: DateTime<Utc>,
}

impl ReceiptRow {
    fn into_receipt(self) -> Result<Receipt, ReceiptStoreError> {
        let decision = parse_decision(&self.decision)
            .ok_or_else(|| ReceiptStoreError::UnknownDecision(self.decision.clone()))?;
        Ok(pbi_receipt::from_parts(
            self.id,
            self.tenant_id,
            self.challenge_id,
            decision,
            self.receipt_hash_hex,
            self.created_at,
        ))
    }
}

fn decision_wire_str(decision: Decision) -> &'static str {
    match decision {
        Decision::PbiVerified => "PBI_VERIFIED",
        Decision::Failed => "FAILED",
        Decision::Expired => "EXPIRED",
        Decision::Replayed => "REPLAYED",
    }
}

fn parse_decision(s: &str) -> Option<Decision> {
    match s {
        "PBI_VERIFIED" => Some(Decision::PbiVerified),
        "FAILED" => Some(Decision::Failed),
        "EXPIRED" => Some(Decision::Expired),
        "REPLAYED" => Some(Decision::Replayed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_wire_strings_round_trip() {
        for decision in [Decision::PbiVerified, Decision::Failed, Decision::Expired, Decision::Replayed] {
            let s = decision_wire_str(decision);
            assert_eq!(parse_decision(s), Some(decision));
        }
    }

    #[test]
    fn into_receipt_round_trips_through_pbi_receipt_from_parts() {
        let row = ReceiptRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            challenge_id: Uuid::new_v4(),
            decision: "PBI_VERIFIED".to_string(),
            receipt_hash_hex: "deadbeef".to_string(),
            created_at: Utc::now(),
        };
        let receipt = row.clone().into_receipt().expect("known decision parses");
        assert_eq!(receipt.id, row.id);
        assert_eq!(receipt.decision, Decision::PbiVerified);
        assert_eq!(receipt.receipt_hash_hex, row.receipt_hash_hex);
    }

    #[test]
    fn into_receipt_rejects_an_unrecognized_persisted_decision() {
        let row = ReceiptRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            challenge_id: Uuid::new_v4(),
            decision: "SOMETHING_CORRUPTED".to_string(),
            receipt_hash_hex: "deadbeef".to_string(),
            created_at: Utc::now(),
        };
        match row.into_receipt() {
            Err(ReceiptStoreError::UnknownDecision(s)) => assert_eq!(s, "SOMETHING_CORRUPTED"),
            other => panic!("expected UnknownDecision, got {other:?}"),
        }
    }

    #[test]
    fn cursor_comparison_operator_matches_order() {
        let (cmp_desc, _) = match SortOrder::Desc {
            SortOrder::Desc => ("<", "DESC"),
            SortOrder::Asc => (">", "ASC"),
        };
        let (cmp_asc, _) = match SortOrder::Asc {
            SortOrder::Desc => ("<", "DESC"),
            SortOrder::Asc => (">", "ASC"),
        };
        assert_eq!(cmp_desc, "<");
        assert_eq!(cmp_asc, ">");
    }
}
