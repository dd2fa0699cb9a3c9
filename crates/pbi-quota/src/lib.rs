// SPDX-License-Identifier: MIT OR Apache-2.0
//! pbi-quota
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Per-tenant per-month serialized usage debit (distilled spec §4.7, C8).
//! Challenge units are debited at mint time; verify units are debited only
//! after cryptographic success — the charge-on-success policy lives in the
//! orchestrator, not here; this crate only enforces serialization and the
//! quota ceiling.

use pbi_core::UsageEvent;
use pbi_core::UsageKind;
use sqlx::PgPool;
use uuid::Uuid;

/// Failures debiting a tenant's usage.
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// A query or transaction against the pool failed.
    #[error(transparent)]
    Query(#[from] sqlx::Error),
    /// Acquiring the per-tenant advisory lock failed.
    #[error(transparent)]
    Lock(#[from] pbi_store::StoreError),
}

/// Result of a [`debit`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebitOutcome {
    /// Whether the unit was charged.
    pub ok: bool,
    /// UTC `YYYY-MM` bucket the debit applies to.
    pub month_key: String,
    /// Units used in `month_key` for this kind, including this debit if `ok`.
    pub used: i64,
    /// The tenant's monthly quota ceiling that was checked against.
    pub quota: i64,
}

fn usage_kind_wire_str(kind: UsageKind) -> &'static str {
    match kind {
        UsageKind::Challenge => "challenge",
        UsageKind::Verify => "verify",
    }
}

/// Debit one usage unit of `kind` for `tenant_id`, serialized per-tenant via
/// a transaction-scoped Postgres advisory lock so no two concurrent debits
/// (in this process or another) can observe the same `used` value.
pub async fn debit(
    pool: &PgPool,
    tenant_id: Uuid,
    kind: UsageKind,
    quota_per_month: i64,
) -> Result<DebitOutcome, QuotaError> {
    let now = chrono::Utc::now();
    let month_key = UsageEvent::month_key_for(now);
    let kind_str = usage_kind_wire_str(kind);

    let mut tx = pool.begin().await?;
    pbi_store::advisory_lock_tenant(&mut tx, tenant_id).await?;

    let used: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(units), 0) FROM usage_events \
         WHERE tenant_id = $1 AND month_key = $2 AND kind = $3",
    )
    .bind(tenant_id)
    .bind(&month_key)
    .bind(kind_str)
    .fetch_one(&mut *tx)
    .await?;

    if used + 1 > quota_per_month {
        tx.rollback().await?;
        return Ok(DebitOutcome {
            ok: false,
            month_key,
            used,
            quota: quota_per_month,
        });
    }

    sqlx::query(
        "INSERT INTO usage_events (id, tenant_id, month_key, kind, units) \
         VALUES ($1, $2, $3, $4, 1)",
    )
    .bind(Uuid::new_v4())
    .bind(tenant_id)
    .bind(&month_key)
    .bind(kind_str)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(DebitOutcome {
        ok: true,
        month_key,
        used: used + 1,
        quota: quota_per_month,
    })
}

/// Monthly usage summary for `GET /v1/billing/usage`: units consumed per
/// kind, summed for `month_key` (defaults to the current UTC month when
/// `month_key` is `None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthlyUsage {
    /// UTC `YYYY-MM` bucket this summary covers.
    pub month_key: String,
    /// Units consumed against the `challenge` kind.
    pub challenge: i64,
    /// Units consumed against the `verify` kind.
    pub verify: i64,
}

/// Sum `usage_events` for `tenant_id` in `month_key`, one row per
/// [`UsageKind`]. Read-only; does not touch the advisory lock since no
/// write follows.
pub async fn monthly_usage(
    pool: &PgPool,
    tenant_id: Uuid,
    month_key: &str,
) -> Result<MonthlyUsage, QuotaError> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT kind, COALESCE(SUM(units), 0) FROM usage_events \
         WHERE tenant_id = $1 AND month_key = $2 GROUP BY kind",
    )
    .bind(tenant_id)
    .bind(month_key)
    .fetch_all(pool)
    .await?;

    let mut usage = MonthlyUsage {
        month_key: month_key.to_string(),
        challenge: 0,
        verify: 0,
    };
    for (kind, units) in rows {
        match kind.as_str() {
            "challenge" => usage.challenge = units,
            "verify" => usage.verify = units,
            _ => {}
        }
    }
    Ok(usage)
}
