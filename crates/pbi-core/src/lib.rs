// SPDX-License-Identifier: MIT OR Apache-2.0
//! pbi-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for the PBI attestation service: the entities named
//! in the data model (tenants, challenges, receipts, usage events, webhook
//! endpoints and deliveries) plus the opaque pagination cursor that rides
//! the wire between `GET /v1/pbi/receipts` calls.
//!
//! If you only take one dependency from this workspace, take this one.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Current contract version string embedded in policy snapshots and export
/// manifests.
///
/// # Examples
///
/// ```
/// assert_eq!(pbi_core::CONTRACT_VERSION, "pbi/v1");
/// ```
pub const CONTRACT_VERSION: &str = "pbi/v1";

/// Default plan assigned to newly created tenants.
///
/// Per the resolved open question on `customers.plan` defaults, new tenants
/// start on `pending` with zero quota; downstream provisioning upgrades them.
pub const DEFAULT_PLAN: Plan = Plan::Pending;

/// Default monthly quota for the [`DEFAULT_PLAN`].
pub const DEFAULT_MONTHLY_QUOTA: i64 = 0;

/// Minimum challenge TTL, in seconds.
pub const CHALLENGE_TTL_MIN_SECONDS: i64 = 10;
/// Maximum challenge TTL, in seconds.
pub const CHALLENGE_TTL_MAX_SECONDS: i64 = 600;
/// Default challenge TTL, in seconds, when the caller omits `ttlSeconds`.
pub const CHALLENGE_TTL_DEFAULT_SECONDS: i64 = 120;

/// Billing plan a tenant is enrolled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// Newly provisioned tenant awaiting a plan assignment; zero quota.
    Pending,
    /// Entry paid tier.
    Starter,
    /// Mid paid tier.
    Pro,
    /// Contract tier.
    Enterprise,
}

/// A capability tag on an API key restricting which endpoints it may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// May call `POST /v1/pbi/verify` (and by extension `/challenge`).
    Verify,
    /// May call `GET /v1/pbi/receipts` and `POST /v1/pbi/receipts/verify`.
    ReadReceipts,
    /// May call `GET /v1/pbi/receipts/export`.
    Export,
}

/// A tenant, identified externally by its bearer API key.
///
/// The raw bearer token is never stored; only its SHA-256 hash
/// ([`Tenant::key_hash`]) is persisted, and `key_hash` is globally unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Tenant {
    /// Opaque tenant identifier.
    pub id: Uuid,
    /// Human-readable label.
    pub label: String,
    /// SHA-256 hex digest of the raw bearer token.
    pub key_hash: String,
    /// Billing plan.
    pub plan: Plan,
    /// Non-negative monthly quota shared across usage kinds tracked per kind.
    pub monthly_quota: i64,
    /// Whether the tenant may authenticate at all.
    pub active: bool,
    /// `None` means "all scopes granted"; `Some(set)` restricts to that set.
    pub scopes: Option<BTreeSet<Scope>>,
}

impl Tenant {
    /// Construct a new tenant on the default pending plan with zero quota,
    /// per the resolved open question on plan defaults.
    pub fn new_pending(id: Uuid, label: impl Into<String>, key_hash: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            key_hash: key_hash.into(),
            plan: DEFAULT_PLAN,
            monthly_quota: DEFAULT_MONTHLY_QUOTA,
            active: true,
            scopes: None,
        }
    }

    /// `true` if this tenant's scope set (or absence thereof) permits
    /// `scope`.
    pub fn has_scope(&self, scope: Scope) -> bool {
        match &self.scopes {
            None => true,
            Some(set) => set.contains(&scope),
        }
    }
}

/// Purpose a challenge was minted for; bound into the challenge and carried
/// through to the receipt so a verification proof cannot be repurposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Purpose {
    /// Authorizing the irreversible commit of some action.
    ActionCommit,
    /// Attesting authorship of an artifact.
    ArtifactAuthorship,
    /// Attesting submission of evidence.
    EvidenceSubmit,
    /// Authorizing a dangerous administrative operation.
    AdminDangerousOp,
}

impl Purpose {
    /// The exact wire token used in challenge payloads and policy documents.
    pub fn wire_str(&self) -> &'static str {
        match self {
            Self::ActionCommit => "ACTION_COMMIT",
            Self::ArtifactAuthorship => "ARTIFACT_AUTHORSHIP",
            Self::EvidenceSubmit => "EVIDENCE_SUBMIT",
            Self::AdminDangerousOp => "ADMIN_DANGEROUS_OP",
        }
    }

    /// Parse a wire token produced by [`Purpose::wire_str`].
    pub fn parse_wire(s: &str) -> Option<Self> {
        match s {
            "ACTION_COMMIT" => Some(Self::ActionCommit),
            "ARTIFACT_AUTHORSHIP" => Some(Self::ArtifactAuthorship),
            "EVIDENCE_SUBMIT" => Some(Self::EvidenceSubmit),
            "ADMIN_DANGEROUS_OP" => Some(Self::AdminDangerousOp),
            _ => None,
        }
    }
}

/// A one-shot cryptographic challenge minted for a tenant.
///
/// Lifecycle: created by challenge-mint; consumed exactly once by verify
/// (`Active` -> `Used`); otherwise aged out by wallclock (`Active` ->
/// `Expired`, no destructive GC required).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Challenge {
    /// Opaque challenge identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// 256 random bits, base64url-encoded; the `challenge` field signed by
    /// the authenticator.
    pub nonce: String,
    /// Purpose this challenge authorizes.
    pub purpose: Purpose,
    /// 64 lowercase hex characters: the caller's action fingerprint.
    pub action_hash_hex: String,
    /// Absolute expiry instant.
    pub expires_at: DateTime<Utc>,
    /// Set exactly once, the first time verify succeeds in consuming this
    /// challenge; monotonic once set.
    pub used_at: Option<DateTime<Utc>>,
    /// Mint time.
    pub created_at: DateTime<Utc>,
}

impl Challenge {
    /// `true` if `now` is past [`Challenge::expires_at`].
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// `true` if this challenge has already been consumed.
    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    /// Validates `actionHashHex` matches `^[0-9a-f]{64}$`.
    pub fn is_valid_action_hash(hex: &str) -> bool {
        hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    /// Validates a caller-chosen TTL falls in `[10, 600]` seconds.
    pub fn is_valid_ttl(ttl_seconds: i64) -> bool {
        (CHALLENGE_TTL_MIN_SECONDS..=CHALLENGE_TTL_MAX_SECONDS).contains(&ttl_seconds)
    }
}

/// Outcome of a verify attempt against a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// The assertion verified and the receipt was minted.
    PbiVerified,
    /// The assertion failed WebAuthn verification (see the accompanying
    /// `reason` code).
    Failed,
    /// The challenge had already expired when verify was attempted.
    Expired,
    /// The challenge had already been consumed.
    Replayed,
}

/// A tamper-evident, append-only record that a challenge was successfully
/// answered.
///
/// `receipt_hash_hex` is an HMAC-SHA-256 over
/// `"receipt:" + id + ":challenge:" + challenge_id + ":decision:" + decision`
/// under the process-wide receipt secret; see `pbi-receipt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Receipt {
    /// Opaque receipt identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// The challenge this receipt attests to.
    pub challenge_id: Uuid,
    /// Verification outcome.
    pub decision: Decision,
    /// Lowercase hex HMAC-SHA-256 fingerprint.
    pub receipt_hash_hex: String,
    /// Append time.
    pub created_at: DateTime<Utc>,
}

/// Usage kind tracked per tenant per month for quota accounting and billing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    /// One unit per minted challenge.
    Challenge,
    /// One unit per successful verify.
    Verify,
}

/// A single append-only usage unit, summed by `(tenant_id, month_key, kind)`
/// to compute monthly usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UsageEvent {
    /// Opaque event identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// UTC `YYYY-MM` bucket.
    pub month_key: String,
    /// Usage kind.
    pub kind: UsageKind,
    /// Units charged; always 1 in the current design.
    pub units: i64,
}

impl UsageEvent {
    /// Computes the UTC `YYYY-MM` month key for `at`.
    pub fn month_key_for(at: DateTime<Utc>) -> String {
        at.format("%Y-%m").to_string()
    }
}

/// Event type a webhook endpoint may subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    /// Fired once per minted receipt.
    ReceiptCreated,
}

impl WebhookEventType {
    /// Wire string used in `X-PBI-Event` and delivery payload `type`.
    pub fn wire_str(&self) -> &'static str {
        match self {
            Self::ReceiptCreated => "receipt.created",
        }
    }
}

/// A tenant-owned outbound webhook subscription.
///
/// The raw secret is returned to the caller exactly once, at create/rotate
/// time; thereafter only [`WebhookEndpoint::encrypted_secret`] is retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WebhookEndpoint {
    /// Opaque endpoint identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Destination URL; must be `https`.
    pub url: String,
    /// Subscribed event types.
    pub events: BTreeSet<WebhookEventType>,
    /// Whether deliveries are attempted at all.
    pub enabled: bool,
    /// At-rest encrypted secret, used to HMAC-sign deliveries.
    pub encrypted_secret: EncryptedSecret,
}

/// AES-GCM-encrypted secret plus a hash of the raw value for
/// caller-facing identification without ever decrypting it server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EncryptedSecret {
    /// Base64-encoded ciphertext.
    pub ciphertext_b64: String,
    /// Base64-encoded 96-bit nonce/IV.
    pub iv_b64: String,
    /// SHA-256 hex of the raw secret, for display/identification only.
    pub secret_hash_hex: String,
}

/// Lifecycle state of a single webhook delivery attempt chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Awaiting (re)attempt.
    Pending,
    /// A 2xx response was observed.
    Delivered,
    /// `attempts` reached the cap without a 2xx response.
    Failed,
}

/// A queued outbound delivery of a `receipt.created` event to one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WebhookDelivery {
    /// Opaque delivery identifier; also the `X-PBI-Delivery-Id` value and
    /// the idempotency key consumers must dedupe on.
    pub id: Uuid,
    /// Target endpoint.
    pub endpoint_id: Uuid,
    /// Event type, currently always `receipt.created`.
    pub event: WebhookEventType,
    /// Receipt this delivery announces.
    pub receipt_id: Uuid,
    /// Pre-serialized JSON body sent on every attempt (bytes must be
    /// identical across retries so the signature stays reproducible).
    pub payload_json: String,
    /// Current lifecycle state.
    pub status: DeliveryStatus,
    /// Attempts made so far.
    pub attempts: i32,
    /// Earliest instant the next attempt may run.
    pub next_attempt_at: DateTime<Utc>,
    /// Most recent failure description, if any.
    pub last_error: Option<String>,
}

/// Sort direction for a paginated receipt query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Oldest first.
    Asc,
    /// Newest first.
    Desc,
}

/// An opaque pagination cursor: `(createdAt, id)`, serialized on the wire as
/// base64url of its canonical JSON form.
///
/// Stable across concurrent inserts because ordering is `(createdAt, id)` —
/// strictly monotone with a deterministic tiebreak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// The row's `created_at`.
    pub created_at: DateTime<Utc>,
    /// The row's `id`, used as the tiebreak for equal timestamps.
    pub id: Uuid,
}

#[derive(Serialize, Deserialize)]
struct CursorWire {
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
    id: Uuid,
}

/// Failure modes when decoding a client-supplied cursor string.
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    /// The string was not valid base64url.
    #[error("invalid cursor encoding: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The decoded bytes were not valid UTF-8 JSON matching the cursor shape.
    #[error("invalid cursor payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl Cursor {
    /// Encode as the opaque wire string.
    pub fn encode(&self) -> String {
        let wire = CursorWire {
            created_at: self.created_at,
            id: self.id,
        };
        let json = serde_json::to_vec(&wire).expect("cursor always serializes");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a wire string produced by [`Cursor::encode`].
    pub fn decode(s: &str) -> Result<Self, CursorError> {
        let bytes = URL_SAFE_NO_PAD.decode(s)?;
        let wire: CursorWire = serde_json::from_slice(&bytes)?;
        Ok(Self {
            created_at: wire.created_at,
            id: wire.id,
        })
    }
}
