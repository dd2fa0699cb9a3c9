// SPDX-License-Identifier: MIT OR Apache-2.0
//! pbi-store
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Connection pooling, transactions, per-tenant advisory locks, and
//! idempotent schema bootstrap for the PBI attestation service's Postgres
//! backend. Entity-specific queries (challenges, receipts, quotas, webhook
//! endpoints/deliveries) live in their owning crates and take `&PgPool` or
//! `&mut Transaction` from here — this crate only owns the pool lifecycle
//! and the cross-cutting primitives every query uses.

use sha2::{Digest, Sha256};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Transaction;
use std::time::Duration;
use uuid::Uuid;

/// Default maximum number of pooled connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
/// Default idle-connection timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool sizing/timeout knobs; see distilled spec §5.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Bounded pool size.
    pub max_connections: u32,
    /// How long an idle connection may sit before being closed.
    pub idle_timeout: Duration,
    /// How long to wait for a new connection before failing.
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Failures from the store layer. Transient pool/connection errors are
/// always wrapped here rather than allowed to panic the process.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The pool could not be established, or a query/transaction failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Schema bootstrap failed.
    #[error("schema bootstrap failed: {0}")]
    Bootstrap(sqlx::Error),
}

impl From<&StoreError> for pbi_error::PbiError {
    fn from(err: &StoreError) -> Self {
        pbi_error::PbiError::new(pbi_error::ErrorCode::InternalError, "internal error")
            .with_context("store_error", err.to_string())
    }
}

/// Owns the process-wide Postgres connection pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect to `database_url`, applying `config`'s pool sizing.
    pub async fn connect(database_url: &str, config: PoolConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .idle_timeout(config.idle_timeout)
            .acquire_timeout(config.connect_timeout)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Borrow the underlying pool for entity-specific crates to issue
    /// queries against.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Idempotently create every table named in the persistent schema
    /// (distilled spec §6): `api_keys`, `pbi_challenges`, `pbi_receipts`,
    /// `usage_events`, `invoices`, `webhook_endpoints`,
    /// `webhook_deliveries`, plus their secondary indices.
    pub async fn bootstrap_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA_DDL)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Bootstrap)?;
        Ok(())
    }

    /// Closes the pool. Part of the explicit shutdown phase: drain the
    /// listener, stop the webhook worker, then close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Deterministic 64-bit hash of a tenant id, used as the key for
/// `pg_advisory_xact_lock`. Serializes concurrent quota debits for the same
/// tenant across processes.
pub fn tenant_lock_key(tenant_id: Uuid) -> i64 {
    let digest = Sha256::digest(tenant_id.as_bytes());
    i64::from_be_bytes(digest[0..8].try_into().expect("sha256 digest has >= 8 bytes"))
}

/// Acquire a transaction-scoped advisory lock on `tenant_id`. Released
/// automatically when `tx` commits or rolls back.
pub async fn advisory_lock_tenant<'a>(
    tx: &mut Transaction<'a, sqlx::Postgres>,
    tenant_id: Uuid,
) -> Result<(), StoreError> {
    let key = tenant_lock_key(tenant_id);
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(key)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

const SCHEMA_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS api_keys (
    id UUID PRIMARY KEY,
    label TEXT NOT NULL,
    key_hash TEXT NOT NULL UNIQUE,
    plan TEXT NOT NULL,
    monthly_quota BIGINT NOT NULL,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    scopes TEXT[],
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS pbi_challenges (
    id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL REFERENCES api_keys(id),
    nonce TEXT NOT NULL,
    purpose TEXT NOT NULL,
    action_hash_hex TEXT NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL,
    used_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_pbi_challenges_tenant_expiry
    ON pbi_challenges (tenant_id, expires_at);

CREATE TABLE IF NOT EXISTS pbi_receipts (
    id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL REFERENCES api_keys(id),
    challenge_id UUID NOT NULL REFERENCES pbi_challenges(id),
    decision TEXT NOT NULL,
    receipt_hash_hex TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_pbi_receipts_tenant_created
    ON pbi_receipts (tenant_id, created_at, id);

CREATE TABLE IF NOT EXISTS usage_events (
    id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL REFERENCES api_keys(id),
    month_key TEXT NOT NULL,
    kind TEXT NOT NULL,
    units BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_usage_events_tenant_month
    ON usage_events (tenant_id, month_key);

CREATE TABLE IF NOT EXISTS invoices (
    id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL REFERENCES api_keys(id),
    month_key TEXT NOT NULL,
    amount_cents BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS webhook_endpoints (
    id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL REFERENCES api_keys(id),
    url TEXT NOT NULL,
    events TEXT[] NOT NULL,
    enabled BOOLEAN NOT NULL DEFAULT TRUE,
    secret_ciphertext_b64 TEXT NOT NULL,
    secret_iv_b64 TEXT NOT NULL,
    secret_hash_hex TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS webhook_deliveries (
    id UUID PRIMARY KEY,
    endpoint_id UUID NOT NULL REFERENCES webhook_endpoints(id),
    event TEXT NOT NULL,
    receipt_id UUID NOT NULL REFERENCES pbi_receipts(id),
    payload_json TEXT NOT NULL,
    status TEXT NOT NULL,
    attempts INT NOT NULL DEFAULT 0,
    next_attempt_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    last_error TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_pending
    ON webhook_deliveries (status, next_attempt_at);
"#;
