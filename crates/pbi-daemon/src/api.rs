// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire DTOs for the PBI HTTP surface and the `PbiError` -> HTTP response
//! bridge.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use pbi_core::Decision;
use pbi_error::{PbiError, PbiErrorDto};
use pbi_webauthn::AssertionBundle;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// The error envelope every non-2xx response carries: `{"error": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// The wrapped error.
    pub error: PbiErrorDto,
}

/// Newtype so [`PbiError`] can implement [`IntoResponse`] without an orphan
/// impl violation (both the trait and the inner type live outside this crate).
pub struct ApiError(pub PbiError);

impl From<PbiError> for ApiError {
    fn from(err: PbiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "internal error");
        }
        let body = ApiErrorBody {
            error: PbiErrorDto::from(&self.0),
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// `GET /health` response.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HealthResponse {
    /// Always `"ok"` once the process has bootstrapped its schema.
    pub status: String,
}

// ---------------------------------------------------------------------------
// POST /v1/pbi/challenge
// ---------------------------------------------------------------------------

/// `POST /v1/pbi/challenge` request body.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ChallengeMintRequest {
    /// The wire purpose token, e.g. `"ACTION_COMMIT"`.
    pub purpose: String,
    /// 64 lowercase hex characters identifying the caller's action.
    pub action_hash_hex: String,
    /// Requested TTL in seconds, clamped to `[10, 600]` server-side if given;
    /// defaults to [`pbi_core::CHALLENGE_TTL_DEFAULT_SECONDS`] when absent.
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
}

/// `POST /v1/pbi/challenge` response body.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ChallengeMintResponse {
    /// The minted challenge's id; pass this back in `/verify`.
    pub challenge_id: Uuid,
    /// Base64url nonce the client's authenticator must sign.
    pub nonce: String,
    /// Echoes the request's purpose.
    pub purpose: String,
    /// Echoes the request's action hash.
    pub action_hash_hex: String,
    /// Absolute expiry instant.
    pub expires_at: DateTime<Utc>,
    /// Mint time.
    pub created_at: DateTime<Utc>,
    /// Metering snapshot after this mint's debit.
    pub usage: UsageSnapshot,
}

// ---------------------------------------------------------------------------
// POST /v1/pbi/verify
// ---------------------------------------------------------------------------

/// Wire shape of a WebAuthn assertion, all binary fields base64url-encoded.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AssertionBundleDto {
    /// Base64url-encoded authenticator data.
    pub authenticator_data_b64url: String,
    /// Base64url-encoded `clientDataJSON`.
    pub client_data_json_b64url: String,
    /// Base64url-encoded DER ECDSA signature.
    pub signature_b64url: String,
    /// Base64url-encoded credential id.
    pub cred_id_b64url: String,
    /// SPKI PEM-encoded P-256 public key bound to the credential.
    pub pub_key_pem: String,
}

impl From<AssertionBundleDto> for AssertionBundle {
    fn from(dto: AssertionBundleDto) -> Self {
        AssertionBundle {
            authenticator_data_b64url: dto.authenticator_data_b64url,
            client_data_json_b64url: dto.client_data_json_b64url,
            signature_b64url: dto.signature_b64url,
            cred_id_b64url: dto.cred_id_b64url,
            pub_key_pem: dto.pub_key_pem,
        }
    }
}

/// `POST /v1/pbi/verify` request body.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct VerifyRequest {
    /// The challenge id returned by a prior mint call.
    pub challenge_id: Uuid,
    /// The WebAuthn assertion produced by the authenticator.
    pub assertion: AssertionBundleDto,
}

/// A minted receipt, as returned on the wire.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ReceiptDto {
    /// Opaque receipt identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// The challenge this receipt attests to.
    pub challenge_id: Uuid,
    /// Verification outcome.
    pub decision: String,
    /// Lowercase hex HMAC-SHA-256 fingerprint.
    pub receipt_hash_hex: String,
    /// Append time.
    pub created_at: DateTime<Utc>,
}

impl From<&pbi_core::Receipt> for ReceiptDto {
    fn from(r: &pbi_core::Receipt) -> Self {
        Self {
            id: r.id,
            tenant_id: r.tenant_id,
            challenge_id: r.challenge_id,
            decision: decision_wire_str(r.decision).to_string(),
            receipt_hash_hex: r.receipt_hash_hex.clone(),
            created_at: r.created_at,
        }
    }
}

pub(crate) fn decision_wire_str(decision: Decision) -> &'static str {
    match decision {
        Decision::PbiVerified => "PBI_VERIFIED",
        Decision::Failed => "FAILED",
        Decision::Expired => "EXPIRED",
        Decision::Replayed => "REPLAYED",
    }
}

/// Metering state after a quota-affecting call.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct UsageSnapshot {
    /// UTC `YYYY-MM` bucket.
    pub month_key: String,
    /// Units used in `month_key` so far, including this call.
    pub used: i64,
    /// The tenant's monthly quota ceiling.
    pub quota: i64,
}

impl From<&pbi_quota::DebitOutcome> for UsageSnapshot {
    fn from(o: &pbi_quota::DebitOutcome) -> Self {
        Self {
            month_key: o.month_key.clone(),
            used: o.used,
            quota: o.quota,
        }
    }
}

/// `POST /v1/pbi/verify` response body.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct VerifyResponse {
    /// One of `"PBI_VERIFIED"`, `"FAILED"`, `"EXPIRED"`, `"REPLAYED"`.
    pub decision: String,
    /// Present on `"FAILED"`.
    pub reason: Option<String>,
    /// Present only when `decision == "PBI_VERIFIED"`.
    pub receipt: Option<ReceiptDto>,
    /// Present once the verify-quota debit has run.
    pub usage: Option<UsageSnapshot>,
}

// ---------------------------------------------------------------------------
// GET /v1/pbi/receipts
// ---------------------------------------------------------------------------

/// Query parameters accepted by `GET /v1/pbi/receipts`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReceiptsListQuery {
    /// Filter by the challenge's bound action hash.
    pub action_hash_hex: Option<String>,
    /// Filter to a single challenge.
    pub challenge_id: Option<Uuid>,
    /// Filter by the challenge's purpose.
    pub purpose: Option<String>,
    /// Filter by verify outcome.
    pub decision: Option<String>,
    /// Inclusive lower bound on `createdAt`, RFC-3339.
    pub created_after: Option<String>,
    /// Exclusive upper bound on `createdAt`, RFC-3339.
    pub created_before: Option<String>,
    /// Page size; defaults to 50, capped at 200.
    pub limit: Option<i64>,
    /// `"asc"` or `"desc"`; defaults to `"desc"`.
    pub order: Option<String>,
    /// Opaque cursor from a prior page's `nextCursor`.
    pub cursor: Option<String>,
}

/// `GET /v1/pbi/receipts` response body.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ReceiptsListResponse {
    /// The page's receipts.
    pub receipts: Vec<ReceiptDto>,
    /// Cursor to pass as `cursor` on the next call, if any.
    pub next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// GET /v1/pbi/receipts/export
// ---------------------------------------------------------------------------

/// Query parameters accepted by `GET /v1/pbi/receipts/export`; the same
/// filter vocabulary as the list endpoint, minus pagination.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReceiptsExportQuery {
    /// Filter by the challenge's bound action hash.
    pub action_hash_hex: Option<String>,
    /// Filter by the challenge's purpose.
    pub purpose: Option<String>,
    /// Filter by verify outcome.
    pub decision: Option<String>,
    /// Inclusive lower bound on `createdAt`, RFC-3339.
    pub created_after: Option<String>,
    /// Exclusive upper bound on `createdAt`, RFC-3339.
    pub created_before: Option<String>,
}

/// `GET /v1/pbi/receipts/export` response body: the signed manifest plus
/// every file it describes, base64-encoded. A JSON envelope rather than a
/// zip/multipart body, so the pack can be verified and re-served without a
/// streaming body reader.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ExportPackResponse {
    /// The manifest describing this pack's contents.
    pub manifest: pbi_export::Manifest,
    /// The manifest's detached Ed25519 signature.
    pub signature: pbi_export::SignatureRecord,
    /// File name to base64-encoded raw bytes.
    pub files: std::collections::BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// POST /v1/pbi/receipts/verify
// ---------------------------------------------------------------------------

/// `POST /v1/pbi/receipts/verify` request body.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReceiptVerifyRequest {
    /// The receipt id to re-verify.
    pub receipt_id: Uuid,
    /// The candidate hash to check against the stored receipt.
    pub receipt_hash_hex: String,
}

/// `POST /v1/pbi/receipts/verify` response body.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ReceiptVerifyResponse {
    /// Whether `receiptHashHex` matched and the receipt is still
    /// self-consistent under the service's receipt secret.
    pub valid: bool,
}

// ---------------------------------------------------------------------------
// GET /v1/billing/usage
// ---------------------------------------------------------------------------

/// Query parameters accepted by `GET /v1/billing/usage`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BillingUsageQuery {
    /// UTC `YYYY-MM` bucket; defaults to the current month.
    pub month_key: Option<String>,
}

/// `GET /v1/billing/usage` response body.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct BillingUsageResponse {
    /// The bucket this summary covers.
    pub month_key: String,
    /// Challenge units consumed in `month_key`.
    pub challenge: i64,
    /// Verify units consumed in `month_key`.
    pub verify: i64,
    /// The tenant's monthly quota ceiling.
    pub quota: i64,
}

// ---------------------------------------------------------------------------
// GET /v1/billing/invoices
// ---------------------------------------------------------------------------

/// A single billed invoice row.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct InvoiceDto {
    /// Opaque invoice identifier.
    pub id: Uuid,
    /// UTC `YYYY-MM` bucket the invoice covers.
    pub month_key: String,
    /// Amount due, in cents.
    pub amount_cents: i64,
    /// When the invoice was recorded.
    pub created_at: DateTime<Utc>,
}

/// `GET /v1/billing/invoices` response body.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct InvoicesListResponse {
    /// All invoices recorded for the tenant, newest first.
    pub invoices: Vec<InvoiceDto>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn api_error_maps_status_and_body() {
        let err = PbiError::new(pbi_error::ErrorCode::QuotaExceeded, "quota exhausted")
            .with_context("used", 10);
        let resp = ApiError::from(err).into_response();
        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let parsed: ApiErrorBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error.code, "quota_exceeded");
    }

    #[test]
    fn receipt_dto_maps_decision_wire_strings() {
        for decision in [Decision::PbiVerified, Decision::Failed, Decision::Expired, Decision::Replayed] {
            let receipt = pbi_core::Receipt {
                id: Uuid::nil(),
                tenant_id: Uuid::nil(),
                challenge_id: Uuid::nil(),
                decision,
                receipt_hash_hex: "deadbeef".into(),
                created_at: Utc::now(),
            };
            let dto = ReceiptDto::from(&receipt);
            assert_eq!(dto.decision, decision_wire_str(decision));
        }
    }
}
