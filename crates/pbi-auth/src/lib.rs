// SPDX-License-Identifier: MIT OR Apache-2.0
//! pbi-auth
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Bearer-token authentication against the `api_keys` table and the scope
//! guard applied to each authenticated route.

use pbi_core::{Plan, Scope, Tenant};
use pbi_error::{ErrorCode, PbiError};
use sqlx::PgPool;
use std::collections::BTreeSet;
use uuid::Uuid;

fn parse_plan(s: &str) -> Plan {
    match s {
        "starter" => Plan::Starter,
        "pro" => Plan::Pro,
        "enterprise" => Plan::Enterprise,
        _ => Plan::Pending,
    }
}

fn parse_scope(s: &str) -> Option<Scope> {
    match s {
        "verify" => Some(Scope::Verify),
        "read-receipts" => Some(Scope::ReadReceipts),
        "export" => Some(Scope::Export),
        _ => None,
    }
}

/// Look up the tenant owning `raw_token` by its SHA-256 hash.
///
/// Fails `missing_api_key` if `raw_token` is empty (callers should prefer
/// [`authenticate_header`] which distinguishes an absent header from an
/// empty one), `invalid_api_key` if no active tenant matches the hash.
pub async fn authenticate(pool: &PgPool, raw_token: &str) -> Result<Tenant, PbiError> {
    if raw_token.is_empty() {
        return Err(PbiError::new(ErrorCode::MissingApiKey, "missing API key"));
    }
    let key_hash = pbi_crypto::sha256_hex(raw_token.as_bytes());
    let row = sqlx::query_as::<_, ApiKeyRow>(
        "SELECT id, label, key_hash, plan, monthly_quota, active, scopes \
         FROM api_keys WHERE key_hash = $1",
    )
    .bind(&key_hash)
    .fetch_optional(pool)
    .await
    .map_err(|e| PbiError::internal(e).with_context("stage", "authenticate"))?;

    match row {
        Some(row) if row.active => Ok(row.into_tenant()),
        _ => Err(PbiError::new(ErrorCode::InvalidApiKey, "invalid API key")),
    }
}

/// Authenticate from the raw value of an `Authorization` header, which must
/// be present and of the form `Bearer <token>`. OPTIONS preflight requests
/// bypass auth entirely and never reach this function.
pub async fn authenticate_header(
    pool: &PgPool,
    authorization_header: Option<&str>,
) -> Result<Tenant, PbiError> {
    let header = authorization_header
        .ok_or_else(|| PbiError::new(ErrorCode::MissingApiKey, "missing API key"))?;
    let raw = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| PbiError::new(ErrorCode::MissingApiKey, "missing API key"))?;
    authenticate(pool, raw).await
}

/// Fails `insufficient_scope` if `tenant` does not carry `required`.
pub fn require_scope(tenant: &Tenant, required: Scope) -> Result<(), PbiError> {
    if tenant.has_scope(required) {
        Ok(())
    } else {
        Err(PbiError::new(ErrorCode::InsufficientScope, "insufficient scope")
            .with_context("required", format!("{required:?}")))
    }
}

#[derive(sqlx::FromRow)]
struct ApiKeyRow {
    id: Uuid,
    label: String,
    key_hash: String,
    plan: String,
    monthly_quota: i64,
    active: bool,
    scopes: Option<Vec<String>>,
}

impl ApiKeyRow {
    fn into_tenant(self) -> Tenant {
        let plan = parse_plan(&self.plan);
        let scopes = self
            .scopes
            .map(|raw| raw.iter().filter_map(|s| parse_scope(s)).collect::<BTreeSet<_>>());
        Tenant {
            id: self.id,
            label: self.label,
            key_hash: self.key_hash,
            plan,
            monthly_quota: self.monthly_quota,
            active: self.active,
            scopes,
        }
    }
}
