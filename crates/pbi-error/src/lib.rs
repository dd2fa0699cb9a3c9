// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for the PBI attestation service.
//!
//! Every PBI error carries an [`ErrorCode`] (a machine-readable, stable wire
//! string matching the protocol's closed error vocabulary), a human-readable
//! message, an optional cause chain, and arbitrary key-value context. Use the
//! builder returned by [`PbiError::new`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bearer-token / scope failures.
    Authentication,
    /// Request body or query-parameter schema failures.
    Validation,
    /// Challenge lifecycle state failures (expired, replayed, unknown).
    State,
    /// WebAuthn assertion verification failures.
    Cryptographic,
    /// Quota accounting failures.
    Quota,
    /// Coarse request rate limiting.
    RateLimit,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Authentication => "authentication",
            Self::Validation => "validation",
            Self::State => "state",
            Self::Cryptographic => "cryptographic",
            Self::Quota => "quota",
            Self::RateLimit => "rate_limit",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant's [`ErrorCode::wire_str`] is the exact protocol token named
/// in the service's error-handling design; these strings are guaranteed not
/// to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// `Authorization` header absent.
    MissingApiKey,
    /// Bearer token does not resolve to an active tenant.
    InvalidApiKey,
    /// Tenant's scope set does not include the scope the endpoint requires.
    InsufficientScope,
    /// Request body/query failed schema validation.
    SchemaInvalid,
    /// Challenge's `expiresAt` has passed.
    Expired,
    /// Challenge's `usedAt` was already set.
    Replayed,
    /// Challenge id does not exist, or belongs to a different tenant.
    UnknownChallenge,
    /// `clientDataJSON` missing required fields or wrong `type`.
    BadClientData,
    /// `clientDataJSON.origin` not in the allowed-origins list.
    BadOrigin,
    /// `clientDataJSON.challenge` does not match the expected challenge.
    BadChallenge,
    /// Authenticator-data user-presence flag not set.
    MissingUp,
    /// Authenticator-data user-verification flag not set.
    MissingUv,
    /// ES256 signature verification failed.
    BadSignature,
    /// Tenant's monthly quota for this usage kind is exhausted.
    QuotaExceeded,
    /// Coarse in-memory rate limit exceeded.
    RateLimited,
    /// Unexpected failure; never carries internal detail to the caller.
    InternalError,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        use ErrorCode::*;
        match self {
            MissingApiKey | InvalidApiKey | InsufficientScope => ErrorCategory::Authentication,
            SchemaInvalid => ErrorCategory::Validation,
            Expired | Replayed | UnknownChallenge => ErrorCategory::State,
            BadClientData | BadOrigin | BadChallenge | MissingUp | MissingUv | BadSignature => {
                ErrorCategory::Cryptographic
            }
            QuotaExceeded => ErrorCategory::Quota,
            RateLimited => ErrorCategory::RateLimit,
            InternalError => ErrorCategory::Internal,
        }
    }

    /// The exact wire string callers see (in `reason` fields, decision
    /// payloads, or as a bare error code). These tokens are part of the
    /// protocol and must not be renamed.
    pub fn wire_str(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            MissingApiKey => "missing_api_key",
            InvalidApiKey => "invalid_api_key",
            InsufficientScope => "insufficient_scope",
            SchemaInvalid => "schema_invalid",
            Expired => "EXPIRED",
            Replayed => "REPLAYED",
            UnknownChallenge => "unknown_challenge",
            BadClientData => "BAD_CLIENT_DATA",
            BadOrigin => "BAD_ORIGIN",
            BadChallenge => "BAD_CHALLENGE",
            MissingUp => "MISSING_UP",
            MissingUv => "MISSING_UV",
            BadSignature => "BAD_SIGNATURE",
            QuotaExceeded => "quota_exceeded",
            RateLimited => "rate_limited",
            InternalError => "internal_error",
        }
    }

    /// HTTP status code this error maps to at the daemon boundary.
    pub fn http_status(&self) -> u16 {
        use ErrorCode::*;
        match self {
            MissingApiKey => 401,
            InvalidApiKey | InsufficientScope => 403,
            SchemaInvalid => 400,
            Expired | Replayed | BadClientData | BadOrigin | BadChallenge | MissingUp
            | MissingUv | BadSignature => 400,
            UnknownChallenge => 404,
            QuotaExceeded => 402,
            RateLimited => 429,
            InternalError => 500,
        }
    }

    /// `true` for the six WebAuthn verification failure codes that are
    /// reported as `decision: "FAILED"` with this code as `reason`.
    pub fn is_verification_reason(&self) -> bool {
        matches!(
            self,
            ErrorCode::BadClientData
                | ErrorCode::BadOrigin
                | ErrorCode::BadChallenge
                | ErrorCode::MissingUp
                | ErrorCode::MissingUv
                | ErrorCode::BadSignature
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_str())
    }
}

// ---------------------------------------------------------------------------
// PbiError
// ---------------------------------------------------------------------------

/// Unified PBI error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context (e.g.
/// `month`/`used`/`quota` for a [`ErrorCode::QuotaExceeded`]).
///
/// # Builder usage
///
/// ```
/// use pbi_error::{PbiError, ErrorCode};
///
/// let err = PbiError::new(ErrorCode::QuotaExceeded, "monthly verify quota exhausted")
///     .with_context("used", 2)
///     .with_context("quota", 2);
/// ```
pub struct PbiError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics and response bodies.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl PbiError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Shorthand for `self.code.http_status()`.
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Build an internal error, deliberately discarding `cause`'s message
    /// from what's returned to the caller (it is still attached as the
    /// `source` for local logging).
    pub fn internal(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(ErrorCode::InternalError, "internal error").with_source(cause)
    }
}

impl fmt::Debug for PbiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("PbiError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for PbiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.wire_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for PbiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`PbiError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PbiErrorDto {
    /// Wire error code, e.g. `"quota_exceeded"`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl From<&PbiError> for PbiErrorDto {
    fn from(err: &PbiError) -> Self {
        Self {
            code: err.code.wire_str().to_string(),
            message: err.message.clone(),
            context: err.context.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_match_protocol_tokens() {
        assert_eq!(ErrorCode::MissingApiKey.wire_str(), "missing_api_key");
        assert_eq!(ErrorCode::InvalidApiKey.wire_str(), "invalid_api_key");
        assert_eq!(
            ErrorCode::InsufficientScope.wire_str(),
            "insufficient_scope"
        );
        assert_eq!(ErrorCode::Expired.wire_str(), "EXPIRED");
        assert_eq!(ErrorCode::Replayed.wire_str(), "REPLAYED");
        assert_eq!(ErrorCode::UnknownChallenge.wire_str(), "unknown_challenge");
        assert_eq!(ErrorCode::BadClientData.wire_str(), "BAD_CLIENT_DATA");
        assert_eq!(ErrorCode::BadOrigin.wire_str(), "BAD_ORIGIN");
        assert_eq!(ErrorCode::BadChallenge.wire_str(), "BAD_CHALLENGE");
        assert_eq!(ErrorCode::MissingUp.wire_str(), "MISSING_UP");
        assert_eq!(ErrorCode::MissingUv.wire_str(), "MISSING_UV");
        assert_eq!(ErrorCode::BadSignature.wire_str(), "BAD_SIGNATURE");
        assert_eq!(ErrorCode::QuotaExceeded.wire_str(), "quota_exceeded");
        assert_eq!(ErrorCode::RateLimited.wire_str(), "rate_limited");
        assert_eq!(ErrorCode::InternalError.wire_str(), "internal_error");
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(ErrorCode::MissingApiKey.http_status(), 401);
        assert_eq!(ErrorCode::InvalidApiKey.http_status(), 403);
        assert_eq!(ErrorCode::InsufficientScope.http_status(), 403);
        assert_eq!(ErrorCode::UnknownChallenge.http_status(), 404);
        assert_eq!(ErrorCode::QuotaExceeded.http_status(), 402);
        assert_eq!(ErrorCode::RateLimited.http_status(), 429);
        assert_eq!(ErrorCode::InternalError.http_status(), 500);
        assert_eq!(ErrorCode::BadSignature.http_status(), 400);
    }

    #[test]
    fn verification_reason_codes() {
        assert!(ErrorCode::BadSignature.is_verification_reason());
        assert!(ErrorCode::MissingUp.is_verification_reason());
        assert!(!ErrorCode::QuotaExceeded.is_verification_reason());
        assert!(!ErrorCode::Expired.is_verification_reason());
    }

    #[test]
    fn builder_roundtrip_via_dto() {
        let err = PbiError::new(ErrorCode::QuotaExceeded, "quota exhausted")
            .with_context("used", 2)
            .with_context("quota", 2);
        let dto = PbiErrorDto::from(&err);
        assert_eq!(dto.code, "quota_exceeded");
        assert_eq!(dto.context.get("used").unwrap(), 2);
        let json = serde_json::to_string(&dto).unwrap();
        let back: PbiErrorDto = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dto);
    }

    #[test]
    fn internal_error_hides_cause_message() {
        let cause = std::io::Error::other("pool exhausted");
        let err = PbiError::internal(cause);
        assert_eq!(err.code, ErrorCode::InternalError);
        assert_eq!(err.message, "internal error");
        assert!(err.source.is_some());
    }

    #[test]
    fn display_includes_context() {
        let err = PbiError::new(ErrorCode::BadOrigin, "origin not allowed")
            .with_context("origin", "https://evil.example");
        let rendered = err.to_string();
        assert!(rendered.starts_with("[BAD_ORIGIN]"));
        assert!(rendered.contains("evil.example"));
    }
}
