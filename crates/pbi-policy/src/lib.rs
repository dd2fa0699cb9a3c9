// SPDX-License-Identifier: MIT OR Apache-2.0
//! pbi-policy
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Parses the `pbi-policy-1.0` document and exposes the authorization
//! predicates the WebAuthn verifier and orchestrator consult: which origins
//! are accepted for a given purpose, and whether a purpose is governed at
//! all.

mod document;

pub use document::{PolicyDocument, PurposePolicy, POLICY_SCHEMA_VERSION};

use pbi_core::Purpose;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The outcome of a policy check: either allowed, or denied with a reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Decision {
    /// Whether the check passed.
    pub allowed: bool,
    /// Present when `allowed` is `false`.
    pub reason: Option<String>,
}

impl Decision {
    /// An allowed decision.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    /// A denied decision carrying `reason`.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Failure compiling a [`PolicyDocument`] into a [`PolicyEngine`].
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// A purpose entry's `rpIdAllowList` or `originAllowList` was empty.
    #[error("purpose {purpose:?} must declare a non-empty {field}")]
    EmptyAllowList {
        /// The offending purpose.
        purpose: Purpose,
        /// Which field was empty: `"rpIdAllowList"` or `"originAllowList"`.
        field: &'static str,
    },
}

/// Compiled policy, ready for fast per-purpose lookups.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    by_purpose: BTreeMap<Purpose, PurposePolicy>,
}

impl PolicyEngine {
    /// Compile `document`, validating that every entry's allowlists are
    /// non-empty.
    pub fn new(document: &PolicyDocument) -> Result<Self, PolicyError> {
        let mut by_purpose = BTreeMap::new();
        for entry in &document.purposes {
            if entry.rp_id_allow_list.is_empty() {
                return Err(PolicyError::EmptyAllowList {
                    purpose: entry.purpose,
                    field: "rpIdAllowList",
                });
            }
            if entry.origin_allow_list.is_empty() {
                return Err(PolicyError::EmptyAllowList {
                    purpose: entry.purpose,
                    field: "originAllowList",
                });
            }
            by_purpose.insert(entry.purpose, entry.clone());
        }
        Ok(Self { by_purpose })
    }

    /// The policy entry governing `purpose`, if any.
    pub fn policy_for(&self, purpose: Purpose) -> Option<&PurposePolicy> {
        self.by_purpose.get(&purpose)
    }

    /// `purpose`'s allowed origins as a set, for the WebAuthn verifier.
    /// Absent purposes have no policy and thus no allowed origins.
    pub fn allowed_origins(&self, purpose: Purpose) -> BTreeSet<String> {
        self.by_purpose
            .get(&purpose)
            .map(|p| p.origin_allow_list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// `purpose_mismatch` check: is `purpose` governed by this policy at all?
    pub fn governs(&self, purpose: Purpose) -> Decision {
        if self.by_purpose.contains_key(&purpose) {
            Decision::allow()
        } else {
            Decision::deny("purpose_mismatch")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_document() -> PolicyDocument {
        let mut doc = PolicyDocument::new(Utc::now(), Some("acme".into()));
        doc.purposes.push(PurposePolicy {
            purpose: Purpose::ActionCommit,
            rp_id_allow_list: vec!["example.com".into()],
            origin_allow_list: vec!["https://example.com".into()],
            require_up: true,
            require_uv: true,
        });
        doc
    }

    #[test]
    fn compiles_valid_document() {
        let engine = PolicyEngine::new(&sample_document()).unwrap();
        assert!(engine.policy_for(Purpose::ActionCommit).is_some());
    }

    #[test]
    fn rejects_empty_rp_id_allow_list() {
        let mut doc = sample_document();
        doc.purposes[0].rp_id_allow_list.clear();
        let err = PolicyEngine::new(&doc).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::EmptyAllowList {
                field: "rpIdAllowList",
                ..
            }
        ));
    }

    #[test]
    fn rejects_empty_origin_allow_list() {
        let mut doc = sample_document();
        doc.purposes[0].origin_allow_list.clear();
        let err = PolicyEngine::new(&doc).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::EmptyAllowList {
                field: "originAllowList",
                ..
            }
        ));
    }

    #[test]
    fn governs_reports_purpose_mismatch() {
        let engine = PolicyEngine::new(&sample_document()).unwrap();
        assert_eq!(engine.governs(Purpose::ActionCommit), Decision::allow());
        assert_eq!(
            engine.governs(Purpose::AdminDangerousOp),
            Decision::deny("purpose_mismatch")
        );
    }

    #[test]
    fn allowed_origins_reflects_entry() {
        let engine = PolicyEngine::new(&sample_document()).unwrap();
        let origins = engine.allowed_origins(Purpose::ActionCommit);
        assert!(origins.contains("https://example.com"));
        assert!(engine.allowed_origins(Purpose::EvidenceSubmit).is_empty());
    }
}
