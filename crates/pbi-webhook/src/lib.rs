// SPDX-License-Identifier: MIT OR Apache-2.0
//! pbi-webhook
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Webhook enqueue, HMAC signing (distilled spec §4.9), and the delivery
//! worker tick loop (§4.10, C11). Safe to run on multiple processes: the
//! claim step uses `SELECT ... FOR UPDATE SKIP LOCKED` so no two workers
//! claim the same row.

use chrono::{DateTime, Utc};
use pbi_core::{EncryptedSecret, WebhookEventType};
use pbi_retry::BackoffPolicy;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

/// Default attempt cap before a delivery is marked `failed` terminally.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 8;
/// Backoff base, in seconds.
pub const BACKOFF_BASE_SECONDS: i64 = 30;
/// Backoff cap, in seconds (~1h).
pub const BACKOFF_CAP_SECONDS: i64 = 3600;
const BACKOFF_POLICY: BackoffPolicy = BackoffPolicy::new(BACKOFF_BASE_SECONDS, BACKOFF_CAP_SECONDS);
/// Per-delivery POST timeout.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a claimed-but-not-yet-resolved delivery is hidden from other
/// workers by bumping `next_attempt_at` forward during the claim step.
const CLAIM_LEASE_SECONDS: i64 = 60;

/// Failures enqueuing or delivering a webhook.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// A query or transaction against the pool failed.
    #[error(transparent)]
    Query(#[from] sqlx::Error),
    /// Decrypting the endpoint's at-rest secret failed.
    #[error(transparent)]
    Secret(#[from] pbi_secrets::SecretsError),
    /// Serializing the delivery payload failed.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

/// `baseString = <timestamp>.<deliveryId>.<rawBody>`, the HMAC signing input.
pub fn signing_base_string(timestamp: i64, delivery_id: Uuid, raw_body: &str) -> String {
    format!("{timestamp}.{delivery_id}.{raw_body}")
}

/// The `X-PBI-Signature` header value: `v1=<hex>`.
pub fn sign_delivery(secret: &[u8], timestamp: i64, delivery_id: Uuid, raw_body: &str) -> String {
    let base = signing_base_string(timestamp, delivery_id, raw_body);
    format!("v1={}", pbi_crypto::hmac_sha256_hex(secret, base.as_bytes()))
}

/// Recompute and constant-time-compare a consumer-side signature check,
/// after stripping the `v1=` prefix. Provided for symmetry with consumers'
/// own verification code and exercised in this crate's tests.
pub fn verify_signature(
    secret: &[u8],
    timestamp: i64,
    delivery_id: Uuid,
    raw_body: &str,
    header_value: &str,
) -> bool {
    let expected = sign_delivery(secret, timestamp, delivery_id, raw_body);
    header_value == expected
}

/// Exponential backoff with jitter: `min(cap, base * 2^(attempts-1)) * (1 ± 20%)`.
pub fn backoff(attempts: i32) -> Duration {
    BACKOFF_POLICY.delay(attempts)
}

/// On receipt mint, enqueue one delivery per enabled endpoint subscribed to
/// `event`. `data` becomes the payload's `data` field (e.g.
/// `{"receipt": ..., "challenge": ...}`); each delivery gets its own
/// `deliveryId`, which is also embedded as the payload's `id`. Returns the
/// fresh delivery ids.
pub async fn enqueue(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    event: WebhookEventType,
    receipt_id: Uuid,
    data: serde_json::Value,
) -> Result<Vec<Uuid>, WebhookError> {
    let endpoint_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT id FROM webhook_endpoints \
         WHERE tenant_id = $1 AND enabled = true AND $2 = ANY(events)",
    )
    .bind(tenant_id)
    .bind(event.wire_str())
    .fetch_all(&mut **tx)
    .await?;

    let mut delivery_ids = Vec::with_capacity(endpoint_ids.len());
    let now = Utc::now();
    for endpoint_id in endpoint_ids {
        let delivery_id = Uuid::new_v4();
        let payload = serde_json::json!({
            "id": delivery_id,
            "type": event.wire_str(),
            "createdAt": now,
            "data": data.clone(),
        });
        let payload_json = serde_json::to_string(&payload)?;
        sqlx::query(
            "INSERT INTO webhook_deliveries \
             (id, endpoint_id, event, receipt_id, payload_json, status, attempts, next_attempt_at, last_error, created_at) \
             VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, NULL, $6)",
        )
        .bind(delivery_id)
        .bind(endpoint_id)
        .bind(event.wire_str())
        .bind(receipt_id)
        .bind(payload_json)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        delivery_ids.push(delivery_id);
    }
    Ok(delivery_ids)
}

#[derive(sqlx::FromRow)]
struct ClaimedDelivery {
    id: Uuid,
    endpoint_id: Uuid,
    payload_json: String,
    attempts: i32,
    url: String,
    ciphertext_b64: String,
    iv_b64: String,
    secret_hash_hex: String,
}

/// Claim up to `batch_size` due deliveries, hiding them from other workers
/// for [`CLAIM_LEASE_SECONDS`] by bumping `next_attempt_at` forward.
async fn claim_batch(pool: &PgPool, batch_size: i64) -> Result<Vec<ClaimedDelivery>, WebhookError> {
    let mut tx = pool.begin().await?;
    let claimed = sqlx::query_as::<_, ClaimedDelivery>(
        "SELECT d.id, d.endpoint_id, d.payload_json, d.attempts, \
                e.url, e.secret_ciphertext_b64 AS ciphertext_b64, e.secret_iv_b64 AS iv_b64, e.secret_hash_hex \
         FROM webhook_deliveries d \
         JOIN webhook_endpoints e ON e.id = d.endpoint_id \
         WHERE d.status = 'pending' AND d.next_attempt_at <= now() \
         ORDER BY d.next_attempt_at \
         LIMIT $1 \
         FOR UPDATE OF d SKIP LOCKED",
    )
    .bind(batch_size)
    .fetch_all(&mut *tx)
    .await?;

    if !claimed.is_empty() {
        let ids: Vec<Uuid> = claimed.iter().map(|d| d.id).collect();
        sqlx::query(
            "UPDATE webhook_deliveries SET next_attempt_at = now() + make_interval(secs => $2) \
             WHERE id = ANY($1)",
        )
        .bind(&ids)
        .bind(CLAIM_LEASE_SECONDS as f64)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(claimed)
}

/// Outcome of attempting a single claimed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// A 2xx response was observed.
    Delivered,
    /// Non-2xx or network error; will retry if under the attempt cap.
    RetryScheduled,
    /// Attempt cap reached; delivery is now terminally `failed`.
    TerminallyFailed,
}

/// One worker tick: claim a batch of due deliveries and attempt each.
/// Returns the outcome per delivery id, in claim order.
pub async fn tick(
    pool: &PgPool,
    http: &reqwest::Client,
    decrypt_key: &[u8],
    batch_size: i64,
    max_attempts: i32,
) -> Result<Vec<(Uuid, AttemptOutcome)>, WebhookError> {
    let batch = claim_batch(pool, batch_size).await?;
    tracing::debug!(claimed = batch.len(), "webhook tick claimed batch");
    let mut outcomes = Vec::with_capacity(batch.len());

    for delivery in batch {
        let outcome = attempt_delivery(pool, http, decrypt_key, max_attempts, &delivery).await?;
        if outcome == AttemptOutcome::TerminallyFailed {
            tracing::warn!(delivery_id = %delivery.id, "webhook delivery exhausted retries");
        }
        outcomes.push((delivery.id, outcome));
    }
    Ok(outcomes)
}

/// Result of POSTing one signed delivery attempt, before any store writes.
#[derive(Debug)]
pub struct SentDelivery {
    /// The response status, if the request completed.
    pub status: reqwest::StatusCode,
    /// The `X-PBI-Timestamp` header value that was sent.
    pub timestamp: i64,
    /// The `X-PBI-Signature` header value that was sent (with `v1=` prefix).
    pub signature: String,
}

/// Sign and POST one delivery attempt (§4.9's header set and signing
/// input). Split out of the delivery worker's per-attempt step so the wire
/// format can be exercised against a mock HTTP endpoint without a database.
pub async fn send_signed(
    http: &reqwest::Client,
    url: &str,
    secret: &[u8],
    delivery_id: Uuid,
    payload_json: &str,
) -> Result<SentDelivery, reqwest::Error> {
    let timestamp = Utc::now().timestamp();
    let signature = sign_delivery(secret, timestamp, delivery_id, payload_json);
    let resp = http
        .post(url)
        .header("X-PBI-Event", "receipt.created")
        .header("X-PBI-Delivery-Id", delivery_id.to_string())
        .header("X-PBI-Timestamp", timestamp.to_string())
        .header("X-PBI-Signature", signature.clone())
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .timeout(DELIVERY_TIMEOUT)
        .body(payload_json.to_string())
        .send()
        .await?;
    Ok(SentDelivery { status: resp.status(), timestamp, signature })
}

async fn attempt_delivery(
    pool: &PgPool,
    http: &reqwest::Client,
    decrypt_key: &[u8],
    max_attempts: i32,
    delivery: &ClaimedDelivery,
) -> Result<AttemptOutcome, WebhookError> {
    let encrypted = EncryptedSecret {
        ciphertext_b64: delivery.ciphertext_b64.clone(),
        iv_b64: delivery.iv_b64.clone(),
        secret_hash_hex: delivery.secret_hash_hex.clone(),
    };
    let secret = pbi_secrets::decrypt_secret(decrypt_key, &encrypted)?;

    let send_result = send_signed(http, &delivery.url, &secret, delivery.id, &delivery.payload_json).await;

    let attempts = delivery.attempts + 1;

    match send_result {
        Ok(sent) if sent.status.is_success() => {
            mark_delivered(pool, delivery.id, attempts).await?;
            Ok(AttemptOutcome::Delivered)
        }
        Ok(sent) => {
            let err = format!("http status {}", sent.status.as_u16());
            resolve_failure(pool, delivery.id, attempts, max_attempts, &err).await
        }
        Err(e) => resolve_failure(pool, delivery.id, attempts, max_attempts, &e.to_string()).await,
    }
}

async fn mark_delivered(pool: &PgPool, id: Uuid, attempts: i32) -> Result<(), WebhookError> {
    sqlx::query(
        "UPDATE webhook_deliveries SET status = 'delivered', attempts = $2, last_error = NULL \
         WHERE id = $1",
    )
    .bind(id)
    .bind(attempts)
    .execute(pool)
    .await?;
    Ok(())
}

async fn resolve_failure(
    pool: &PgPool,
    id: Uuid,
    attempts: i32,
    max_attempts: i32,
    error: &str,
) -> Result<AttemptOutcome, WebhookError> {
    if attempts >= max_attempts {
        sqlx::query(
            "UPDATE webhook_deliveries SET status = 'failed', attempts = $2, last_error = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(attempts)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(AttemptOutcome::TerminallyFailed)
    } else {
        let next_attempt_at: DateTime<Utc> = Utc::now() + backoff(attempts);
        sqlx::query(
            "UPDATE webhook_deliveries \
             SET status = 'pending', attempts = $2, next_attempt_at = $3, last_error = $4 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(attempts)
        .bind(next_attempt_at)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(AttemptOutcome::RetryScheduled)
    }
}
