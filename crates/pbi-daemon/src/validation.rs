// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request and query validation for the PBI HTTP surface.
//!
//! Schema checks that already have a canonical home (action-hash shape,
//! TTL bounds, purpose tokens) delegate to `pbi-core` rather than
//! reimplementing them; this module only owns the query-parameter parsing
//! that is specific to the daemon's wire format.

use chrono::{DateTime, Utc};
use pbi_core::{Challenge, Cursor, Decision, Purpose, SortOrder};
use pbi_error::{ErrorCode, PbiError};

/// Validate `actionHashHex` is 64 lowercase hex characters.
pub fn validate_action_hash(action_hash_hex: &str) -> Result<(), PbiError> {
    if Challenge::is_valid_action_hash(action_hash_hex) {
        Ok(())
    } else {
        Err(PbiError::new(
            ErrorCode::SchemaInvalid,
            "actionHashHex must be 64 lowercase hex characters",
        ))
    }
}

/// Validate `ttlSeconds` falls in `[10, 600]`.
pub fn validate_ttl_seconds(ttl_seconds: i64) -> Result<(), PbiError> {
    if Challenge::is_valid_ttl(ttl_seconds) {
        Ok(())
    } else {
        Err(PbiError::new(
            ErrorCode::SchemaInvalid,
            "ttlSeconds must be between 10 and 600",
        ))
    }
}

/// Parse a `purpose` wire token, or fail `schema_invalid`.
pub fn parse_purpose(purpose: &str) -> Result<Purpose, PbiError> {
    Purpose::parse_wire(purpose).ok_or_else(|| {
        PbiError::new(ErrorCode::SchemaInvalid, "unrecognized purpose")
            .with_context("purpose", purpose.to_string())
    })
}

/// Parse a `decision` wire token, or fail `schema_invalid`.
pub fn parse_decision(decision: &str) -> Result<Decision, PbiError> {
    match decision {
        "PBI_VERIFIED" => Ok(Decision::PbiVerified),
        "FAILED" => Ok(Decision::Failed),
        "EXPIRED" => Ok(Decision::Expired),
        "REPLAYED" => Ok(Decision::Replayed),
        _ => Err(PbiError::new(ErrorCode::SchemaInvalid, "unrecognized decision")
            .with_context("decision", decision.to_string())),
    }
}

/// Parse `order` (`"asc"` / `"desc"`), defaulting to `Desc` when absent.
pub fn parse_order(order: Option<&str>) -> Result<SortOrder, PbiError> {
    match order {
        None => Ok(SortOrder::Desc),
        Some("asc") => Ok(SortOrder::Asc),
        Some("desc") => Ok(SortOrder::Desc),
        Some(other) => Err(PbiError::new(ErrorCode::SchemaInvalid, "order must be \"asc\" or \"desc\"")
            .with_context("order", other.to_string())),
    }
}

/// Default and maximum page size for `GET /v1/pbi/receipts`.
pub const DEFAULT_PAGE_LIMIT: i64 = 50;
/// Hard ceiling on `limit`, beyond which the request is rejected rather than
/// silently clamped.
pub const MAX_PAGE_LIMIT: i64 = 200;

/// Parse and bound-check `limit`, defaulting to [`DEFAULT_PAGE_LIMIT`].
pub fn parse_limit(limit: Option<i64>) -> Result<i64, PbiError> {
    match limit {
        None => Ok(DEFAULT_PAGE_LIMIT),
        Some(n) if n > 0 && n <= MAX_PAGE_LIMIT => Ok(n),
        Some(n) => Err(PbiError::new(ErrorCode::SchemaInvalid, "limit out of range")
            .with_context("limit", n)
            .with_context("max", MAX_PAGE_LIMIT)),
    }
}

/// Decode an opaque pagination cursor, or fail `schema_invalid`.
pub fn parse_cursor(cursor: Option<&str>) -> Result<Option<Cursor>, PbiError> {
    match cursor {
        None => Ok(None),
        Some(s) => Cursor::decode(s)
            .map(Some)
            .map_err(|e| PbiError::new(ErrorCode::SchemaInvalid, "invalid cursor").with_context("detail", e.to_string())),
    }
}

/// Parse an RFC-3339 timestamp query parameter, or fail `schema_invalid`.
pub fn parse_timestamp(field: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, PbiError> {
    match value {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| {
                PbiError::new(ErrorCode::SchemaInvalid, "timestamp must be RFC-3339")
                    .with_context("field", field.to_string())
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_hash_validation_delegates_to_core() {
        assert!(validate_action_hash(&"a".repeat(64)).is_ok());
        assert!(validate_action_hash(&"A".repeat(64)).is_err());
    }

    #[test]
    fn ttl_bounds_delegate_to_core() {
        assert!(validate_ttl_seconds(120).is_ok());
        assert!(validate_ttl_seconds(9).is_err());
        assert!(validate_ttl_seconds(601).is_err());
    }

    #[test]
    fn purpose_parsing_round_trips() {
        assert_eq!(parse_purpose("ACTION_COMMIT").unwrap(), Purpose::ActionCommit);
        assert!(parse_purpose("NOT_A_PURPOSE").is_err());
    }

    #[test]
    fn decision_parsing_round_trips() {
        assert_eq!(parse_decision("PBI_VERIFIED").unwrap(), Decision::PbiVerified);
        assert!(parse_decision("NOT_A_DECISION").is_err());
    }

    #[test]
    fn order_defaults_to_desc() {
        assert_eq!(parse_order(None).unwrap(), SortOrder::Desc);
        assert_eq!(parse_order(Some("asc")).unwrap(), SortOrder::Asc);
        assert!(parse_order(Some("sideways")).is_err());
    }

    #[test]
    fn limit_defaults_and_bounds() {
        assert_eq!(parse_limit(None).unwrap(), DEFAULT_PAGE_LIMIT);
        assert!(parse_limit(Some(0)).is_err());
        assert!(parse_limit(Some(MAX_PAGE_LIMIT + 1)).is_err());
        assert_eq!(parse_limit(Some(10)).unwrap(), 10);
    }

    #[test]
    fn cursor_parsing_rejects_garbage() {
        assert!(parse_cursor(None).unwrap().is_none());
        assert!(parse_cursor(Some("not-a-cursor")).is_err());
    }

    #[test]
    fn timestamp_parsing_rejects_non_rfc3339() {
        assert!(parse_timestamp("createdAfter", Some("not-a-date")).is_err());
        assert!(parse_timestamp("createdAfter", Some("2026-01-01T00:00:00Z")).unwrap().is_some());
    }
}
