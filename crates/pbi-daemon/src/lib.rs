// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! The PBI attestation service's HTTP surface: request parsing, tenant
//! authentication, and the handlers that drive `pbi-service`'s orchestrator
//! plus the read-only receipts/billing endpoints it doesn't own.

pub mod api;
pub mod middleware;
pub mod validation;

use crate::api::{
    ApiError, AssertionBundleDto, BillingUsageQuery, BillingUsageResponse, ChallengeMintRequest,
    ChallengeMintResponse, ExportPackResponse, HealthResponse, InvoiceDto, InvoicesListResponse,
    ReceiptDto, ReceiptVerifyRequest, ReceiptVerifyResponse, ReceiptsExportQuery,
    ReceiptsListQuery, ReceiptsListResponse, UsageSnapshot, VerifyRequest, VerifyResponse,
};
use crate::middleware::{request_id_middleware, CorsConfig, RateLimiterLayer, RequestContext, RequestLogger};
use axum::extract::{Extension, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use chrono::Utc;
use pbi_core::{Scope, Tenant, UsageEvent, CHALLENGE_TTL_DEFAULT_SECONDS};
use pbi_policy::PolicyEngine;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Process-wide state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Postgres connection pool.
    pub pool: PgPool,
    /// Compiled policy, used by the WebAuthn verifier.
    pub policy: Arc<PolicyEngine>,
    /// The raw policy document, embedded verbatim into export packs.
    pub policy_document: Arc<pbi_policy::PolicyDocument>,
    /// HMAC key for minting and self-verifying receipt hashes.
    pub receipt_secret: Arc<Vec<u8>>,
    /// AES-256-GCM key for decrypting webhook endpoint secrets.
    pub webhook_decrypt_key: Arc<Vec<u8>>,
    /// Ed25519 signing key (32-byte seed) for export-pack manifests.
    pub export_signing_key: Arc<[u8; 32]>,
    /// PEM-wrapped Ed25519 public key paired with `export_signing_key`.
    pub export_public_key_pem: Arc<String>,
    /// Per-key sliding-window rate limiter.
    pub rate_limiter: Arc<pbi_ratelimit::RateLimiter>,
}

/// Assemble the router: every `/v1/pbi/*` and `/v1/billing/*` route plus
/// `/health`, wrapped in request-id, request-logging, rate-limiting, and
/// CORS middleware.
pub fn build_app(state: AppState, cors: CorsConfig) -> Router {
    let rate_limiter = state.rate_limiter.clone();
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/pbi/challenge", post(challenge_handler))
        .route("/v1/pbi/verify", post(verify_handler))
        .route("/v1/pbi/receipts", get(receipts_list_handler))
        .route("/v1/pbi/receipts/export", get(receipts_export_handler))
        .route("/v1/pbi/receipts/verify", post(receipt_verify_handler))
        .route("/v1/billing/usage", get(billing_usage_handler))
        .route("/v1/billing/invoices", get(billing_invoices_handler))
        .layer(axum::middleware::from_fn(RequestLogger::layer))
        .layer(RateLimiterLayer::new(rate_limiter))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(cors.to_cors_layer())
        .with_state(state)
}

async fn authenticate(state: &AppState, headers: &HeaderMap, ctx: &RequestContext) -> Result<Tenant, ApiError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let tenant = pbi_auth::authenticate_header(&state.pool, header)
        .await
        .map_err(ApiError::from)?;
    ctx.set_tenant(tenant.id);
    Ok(tenant)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn challenge_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    Json(req): Json<ChallengeMintRequest>,
) -> Result<Json<ChallengeMintResponse>, ApiError> {
    let tenant = authenticate(&state, &headers, &ctx).await?;

    let purpose = validation::parse_purpose(&req.purpose)?;
    validation::validate_action_hash(&req.action_hash_hex)?;
    let ttl_seconds = req.ttl_seconds.unwrap_or(CHALLENGE_TTL_DEFAULT_SECONDS);
    validation::validate_ttl_seconds(ttl_seconds)?;

    let outcome = pbi_service::mint_challenge(&state.pool, &tenant, purpose, &req.action_hash_hex, ttl_seconds)
        .await?;

    Ok(Json(ChallengeMintResponse {
        challenge_id: outcome.challenge.id,
        nonce: outcome.challenge.nonce,
        purpose: outcome.challenge.purpose.wire_str().to_string(),
        action_hash_hex: outcome.challenge.action_hash_hex,
        expires_at: outcome.challenge.expires_at,
        created_at: outcome.challenge.created_at,
        usage: UsageSnapshot::from(&outcome.metering),
    }))
}

async fn verify_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    Json(req): Json<VerifyRequest>,
) -> Result<(StatusCode, Json<VerifyResponse>), ApiError> {
    let tenant = authenticate(&state, &headers, &ctx).await?;
    let assertion: pbi_webauthn::AssertionBundle = AssertionBundleDto::from(req.assertion).into();

    let outcome = pbi_service::verify(
        &state.pool,
        &tenant,
        &state.policy,
        &state.receipt_secret,
        req.challenge_id,
        &assertion,
    )
    .await?;

    Ok((
        verify_status_for_decision(outcome.decision),
        Json(VerifyResponse {
            decision: api::decision_wire_str(outcome.decision).to_string(),
            reason: outcome.reason,
            receipt: outcome.receipt.as_ref().map(ReceiptDto::from),
            usage: outcome.metering.as_ref().map(UsageSnapshot::from),
        }),
    ))
}

/// §4.5/§6: only `PbiVerified` is a 200; `Expired`/`Replayed`/`Failed` are
/// all reported as 400 even though `pbi_service::verify` carries them as
/// `Ok` outcomes, not `ApiError`s, since the caller still gets a
/// fully-formed decision body alongside the non-2xx status.
fn verify_status_for_decision(decision: pbi_core::Decision) -> StatusCode {
    match decision {
        pbi_core::Decision::PbiVerified => StatusCode::OK,
        pbi_core::Decision::Expired | pbi_core::Decision::Replayed | pbi_core::Decision::Failed => {
            StatusCode::BAD_REQUEST
        }
    }
}

async fn receipts_list_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    Query(query): Query<ReceiptsListQuery>,
) -> Result<Json<ReceiptsListResponse>, ApiError> {
    let tenant = authenticate(&state, &headers, &ctx).await?;
    pbi_auth::require_scope(&tenant, Scope::ReadReceipts)?;

    let filter = pbi_receipt_store::ReceiptFilter {
        tenant_id: tenant.id,
        limit: validation::parse_limit(query.limit)?,
        order: validation::parse_order(query.order.as_deref())?,
        cursor: validation::parse_cursor(query.cursor.as_deref())?,
        action_hash_hex: query.action_hash_hex,
        challenge_id: query.challenge_id,
        purpose: query.purpose.as_deref().map(validation::parse_purpose).transpose()?,
        decision: query.decision.as_deref().map(validation::parse_decision).transpose()?,
        created_after: validation::parse_timestamp("createdAfter", query.created_after.as_deref())?,
        created_before: validation::parse_timestamp("createdBefore", query.created_before.as_deref())?,
    };

    let page = pbi_receipt_store::query(&state.pool, &filter)
        .await
        .map_err(|e| pbi_error::PbiError::internal(e))?;

    Ok(Json(ReceiptsListResponse {
        receipts: page.receipts.iter().map(ReceiptDto::from).collect(),
        next_cursor: page.next_cursor.map(|c| c.encode()),
    }))
}

async fn receipts_export_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    Query(query): Query<ReceiptsExportQuery>,
) -> Result<Json<ExportPackResponse>, ApiError> {
    let tenant = authenticate(&state, &headers, &ctx).await?;
    pbi_auth::require_scope(&tenant, Scope::Export)?;

    let purpose = query.purpose.as_deref().map(validation::parse_purpose).transpose()?;
    let decision = query.decision.as_deref().map(validation::parse_decision).transpose()?;
    let created_after = validation::parse_timestamp("createdAfter", query.created_after.as_deref())?;
    let created_before = validation::parse_timestamp("createdBefore", query.created_before.as_deref())?;

    let mut records = Vec::new();
    let mut cursor = None;
    loop {
        let filter = pbi_receipt_store::ReceiptFilter {
            tenant_id: tenant.id,
            limit: validation::MAX_PAGE_LIMIT,
            order: pbi_core::SortOrder::Asc,
            cursor,
            action_hash_hex: query.action_hash_hex.clone(),
            challenge_id: None,
            purpose,
            decision,
            created_after,
            created_before,
        };
        let page = pbi_receipt_store::query(&state.pool, &filter)
            .await
            .map_err(pbi_error::PbiError::internal)?;
        let exhausted = page.next_cursor.is_none();
        for receipt in &page.receipts {
            let challenge = pbi_challenge::load(&state.pool, receipt.challenge_id)
                .await
                .map_err(pbi_error::PbiError::internal)?
                .ok_or_else(|| {
                    pbi_error::PbiError::internal(std::io::Error::other("receipt references missing challenge"))
                })?;
            records.push(pbi_export::ReceiptRecord {
                receipt: receipt.clone(),
                challenge,
            });
        }
        cursor = page.next_cursor;
        if exhausted {
            break;
        }
    }

    let filters = pbi_export::ExportFilter {
        tenant_id: tenant.id,
        action_hash_hex: query.action_hash_hex,
        purpose: purpose.map(|p| p.wire_str().to_string()),
        decision: decision.map(|d| api::decision_wire_str(d).to_string()),
        created_after,
        created_before,
    };

    let pack = pbi_export::build_pack(
        filters,
        &records,
        &state.policy_document,
        None,
        &state.export_signing_key[..],
        &state.export_public_key_pem,
    )
    .map_err(pbi_error::PbiError::internal)?;

    let files = pack
        .files
        .iter()
        .map(|(name, bytes)| (name.clone(), base64::engine::general_purpose::STANDARD.encode(bytes)))
        .collect();

    Ok(Json(ExportPackResponse {
        manifest: pack.manifest,
        signature: pack.signature,
        files,
    }))
}

async fn receipt_verify_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    Json(req): Json<ReceiptVerifyRequest>,
) -> Result<Json<ReceiptVerifyResponse>, ApiError> {
    let tenant = authenticate(&state, &headers, &ctx).await?;
    pbi_auth::require_scope(&tenant, Scope::ReadReceipts)?;

    let receipt = pbi_receipt_store::load_by_id(&state.pool, tenant.id, req.receipt_id)
        .await
        .map_err(pbi_error::PbiError::internal)?;

    let valid = match receipt {
        Some(receipt) => pbi_secrets::verify_receipt(&receipt, &req.receipt_hash_hex, &state.receipt_secret),
        None => false,
    };

    Ok(Json(ReceiptVerifyResponse { valid }))
}

async fn billing_usage_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    Query(query): Query<BillingUsageQuery>,
) -> Result<Json<BillingUsageResponse>, ApiError> {
    let tenant = authenticate(&state, &headers, &ctx).await?;
    let month_key = query.month_key.unwrap_or_else(|| UsageEvent::month_key_for(Utc::now()));

    let usage = pbi_quota::monthly_usage(&state.pool, tenant.id, &month_key)
        .await
        .map_err(|e| pbi_error::PbiError::internal(e))?;

    Ok(Json(BillingUsageResponse {
        month_key: usage.month_key,
        challenge: usage.challenge,
        verify: usage.verify,
        quota: tenant.monthly_quota,
    }))
}

#[derive(sqlx::FromRow)]
struct InvoiceRow {
    id: Uuid,
    month_key: String,
    amount_cents: i64,
    created_at: chrono::DateTime<Utc>,
}

async fn billing_invoices_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
) -> Result<Json<InvoicesListResponse>, ApiError> {
    let tenant = authenticate(&state, &headers, &ctx).await?;

    let rows: Vec<InvoiceRow> = sqlx::query_as(
        "SELECT id, month_key, amount_cents, created_at FROM invoices \
         WHERE tenant_id = $1 ORDER BY created_at DESC",
    )
    .bind(tenant.id)
    .fetch_all(&state.pool)
    .await
    .map_err(|e| pbi_error::PbiError::internal(e))?;

    let invoices = rows
        .into_iter()
        .map(|r| InvoiceDto {
            id: r.id,
            month_key: r.month_key,
            amount_cents: r.amount_cents,
            created_at: r.created_at,
        })
        .collect();

    Ok(Json(InvoicesListResponse { invoices }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_status_is_200_only_for_pbi_verified() {
        assert_eq!(
            verify_status_for_decision(pbi_core::Decision::PbiVerified),
            StatusCode::OK
        );
        for decision in [
            pbi_core::Decision::Expired,
            pbi_core::Decision::Replayed,
            pbi_core::Decision::Failed,
        ] {
            assert_eq!(
                verify_status_for_decision(decision),
                StatusCode::BAD_REQUEST,
                "{decision:?} must not be reported as 200"
            );
        }
    }
}
