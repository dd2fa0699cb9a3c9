// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `pbi-policy-1.0` document schema (distilled spec §4.11, C12).

use chrono::{DateTime, Utc};
use pbi_core::Purpose;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Schema version stamped into every policy document and export manifest.
pub const POLICY_SCHEMA_VERSION: &str = "pbi-policy-1.0";

/// Per-purpose WebAuthn policy: which relying-party ids and origins are
/// accepted, and whether user-presence/user-verification are required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PurposePolicy {
    /// The purpose this entry governs.
    pub purpose: Purpose,
    /// Non-empty allowlist of relying-party ids.
    #[serde(rename = "rpIdAllowList")]
    pub rp_id_allow_list: Vec<String>,
    /// Non-empty allowlist of accepted WebAuthn origins.
    #[serde(rename = "originAllowList")]
    pub origin_allow_list: Vec<String>,
    /// Whether the user-presence flag is mandatory.
    #[serde(rename = "requireUP")]
    pub require_up: bool,
    /// Whether the user-verification flag is mandatory.
    #[serde(rename = "requireUV")]
    pub require_uv: bool,
}

/// A full `pbi-policy-1.0` document, keyed by purpose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PolicyDocument {
    /// Schema version; always [`POLICY_SCHEMA_VERSION`].
    pub version: String,
    /// When this document was generated.
    pub issued_at: DateTime<Utc>,
    /// Optional issuer label, stamped into evidence metadata.
    pub issuer: Option<String>,
    /// One entry per governed purpose.
    pub purposes: Vec<PurposePolicy>,
}

impl PolicyDocument {
    /// Construct an empty document stamped with the current schema version.
    pub fn new(issued_at: DateTime<Utc>, issuer: Option<String>) -> Self {
        Self {
            version: POLICY_SCHEMA_VERSION.to_string(),
            issued_at,
            issuer,
            purposes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_stamps_schema_version() {
        let doc = PolicyDocument::new(Utc::now(), None);
        assert_eq!(doc.version, "pbi-policy-1.0");
    }

    #[test]
    fn purpose_policy_field_renames_match_schema() {
        let p = PurposePolicy {
            purpose: Purpose::ActionCommit,
            rp_id_allow_list: vec!["example.com".into()],
            origin_allow_list: vec!["https://example.com".into()],
            require_up: true,
            require_uv: true,
        };
        let json = serde_json::to_value(&p).unwrap();
        assert!(json.get("rpIdAllowList").is_some());
        assert!(json.get("originAllowList").is_some());
        assert!(json.get("requireUP").is_some());
        assert!(json.get("requireUV").is_some());
    }
}
