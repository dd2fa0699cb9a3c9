// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for the PBI attestation
//! service.
//!
//! This crate provides [`PbiConfig`] — the top-level runtime settings —
//! together with helpers for loading from TOML files, applying environment
//! overrides, merging overlays, and producing advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// No `policyVersion` was configured.
    MissingPolicyVersion,
    /// No `policyHash` was configured.
    MissingPolicyHash,
    /// `rlWindowSeconds` is outside the sane range this crate expects
    /// (see [`RL_WINDOW_SANE_RANGE`]).
    RateLimitWindowOutOfSaneRange {
        /// The configured window, in seconds.
        seconds: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingPolicyVersion => {
                write!(f, "policyVersion is not set")
            }
            ConfigWarning::MissingPolicyHash => {
                write!(f, "policyHash is not set")
            }
            ConfigWarning::RateLimitWindowOutOfSaneRange { seconds } => {
                write!(f, "rlWindowSeconds ({seconds}) is outside the sane range")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config type
// ---------------------------------------------------------------------------

/// Minimum accepted length, in bytes, for `receiptSecret`.
pub const RECEIPT_SECRET_MIN_BYTES: usize = 32;
/// Required length, in raw bytes after base64 decoding, for
/// `webhookSecretKey`.
pub const WEBHOOK_SECRET_KEY_BYTES: usize = 32;
/// The range outside of which `rlWindowSeconds` generates an advisory
/// warning rather than a hard error.
pub const RL_WINDOW_SANE_RANGE: std::ops::RangeInclusive<u64> = 1..=3600;

fn default_port() -> u16 {
    8080
}

fn default_rl_window_seconds() -> u64 {
    60
}

fn default_rl_max_requests() -> u32 {
    120
}

/// Top-level runtime configuration for the PBI attestation service.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct PbiConfig {
    /// TCP port the HTTP listener binds to.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Postgres connection string.
    pub database_url: String,

    /// HMAC key used to mint and self-verify receipt hashes. Must be at
    /// least [`RECEIPT_SECRET_MIN_BYTES`] bytes.
    pub receipt_secret: String,

    /// Origins accepted by the WebAuthn assertion verifier, unioned with
    /// each purpose's policy-scoped allowlist. Must be non-empty.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Advisory label for the currently active policy document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_version: Option<String>,

    /// Advisory content hash of the currently active policy document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_hash: Option<String>,

    /// Base64-encoded 32-byte AES-256-GCM key used to encrypt webhook
    /// endpoint secrets at rest.
    pub webhook_secret_key: String,

    /// PEM-wrapped Ed25519 private key used to sign offline export packs.
    pub export_signing_private_key_pem: String,

    /// PEM-wrapped Ed25519 public key that pairs with
    /// `export_signing_private_key_pem`, embedded in every export manifest.
    pub export_signing_public_key_pem: String,

    /// Rate limit sliding window, in seconds.
    #[serde(default = "default_rl_window_seconds")]
    pub rl_window_seconds: u64,

    /// Maximum requests per key allowed inside `rl_window_seconds`.
    #[serde(default = "default_rl_max_requests")]
    pub rl_max_requests: u32,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`PbiConfig`] from a TOML file, then apply environment overrides.
pub fn load_config(path: &Path) -> Result<PbiConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.display().to_string(),
    })?;
    let mut config = parse_toml(&content)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`PbiConfig`].
pub fn parse_toml(content: &str) -> Result<PbiConfig, ConfigError> {
    toml::from_str::<PbiConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables:
/// - `PBI_PORT`
/// - `PBI_DATABASE_URL`
/// - `PBI_RECEIPT_SECRET`
/// - `PBI_ALLOWED_ORIGINS` (comma-separated)
/// - `PBI_WEBHOOK_SECRET_KEY`
/// - `PBI_RL_WINDOW_SECONDS`
/// - `PBI_RL_MAX_REQUESTS`
pub fn apply_env_overrides(config: &mut PbiConfig) {
    if let Ok(val) = std::env::var("PBI_PORT")
        && let Ok(port) = val.parse::<u16>()
    {
        config.port = port;
    }
    if let Ok(val) = std::env::var("PBI_DATABASE_URL") {
        config.database_url = val;
    }
    if let Ok(val) = std::env::var("PBI_RECEIPT_SECRET") {
        config.receipt_secret = val;
    }
    if let Ok(val) = std::env::var("PBI_ALLOWED_ORIGINS") {
        config.allowed_origins = val
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Ok(val) = std::env::var("PBI_WEBHOOK_SECRET_KEY") {
        config.webhook_secret_key = val;
    }
    if let Ok(val) = std::env::var("PBI_RL_WINDOW_SECONDS")
        && let Ok(seconds) = val.parse::<u64>()
    {
        config.rl_window_seconds = seconds;
    }
    if let Ok(val) = std::env::var("PBI_RL_MAX_REQUESTS")
        && let Ok(max) = val.parse::<u32>()
    {
        config.rl_max_requests = max;
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (short `receiptSecret`, malformed or wrong-length
/// `webhookSecretKey`, empty `allowedOrigins`) are returned as a
/// [`ConfigError::ValidationError`]; soft issues come back as warnings.
pub fn validate_config(config: &PbiConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if config.receipt_secret.as_bytes().len() < RECEIPT_SECRET_MIN_BYTES {
        errors.push(format!(
            "receiptSecret must be at least {RECEIPT_SECRET_MIN_BYTES} bytes"
        ));
    }

    match pbi_crypto::base64url_decode(&config.webhook_secret_key) {
        Ok(raw) if raw.len() == WEBHOOK_SECRET_KEY_BYTES => {}
        Ok(raw) => errors.push(format!(
            "webhookSecretKey must decode to {WEBHOOK_SECRET_KEY_BYTES} bytes, got {}",
            raw.len()
        )),
        Err(_) => errors.push("webhookSecretKey is not valid base64url".into()),
    }

    if config.allowed_origins.is_empty() {
        errors.push("allowedOrigins must not be empty".into());
    }

    if config.policy_version.is_none() {
        warnings.push(ConfigWarning::MissingPolicyVersion);
    }
    if config.policy_hash.is_none() {
        warnings.push(ConfigWarning::MissingPolicyHash);
    }
    if !RL_WINDOW_SANE_RANGE.contains(&config.rl_window_seconds) {
        warnings.push(ConfigWarning::RateLimitWindowOutOfSaneRange {
            seconds: config.rl_window_seconds,
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations. Non-default scalar values in `overlay` take
/// precedence over `base`; `allowed_origins` is unioned.
pub fn merge_configs(base: PbiConfig, overlay: PbiConfig) -> PbiConfig {
    let mut allowed_origins = base.allowed_origins;
    for origin in overlay.allowed_origins {
        if !allowed_origins.contains(&origin) {
            allowed_origins.push(origin);
        }
    }
    PbiConfig {
        port: if overlay.port != default_port() {
            overlay.port
        } else {
            base.port
        },
        database_url: if overlay.database_url.is_empty() {
            base.database_url
        } else {
            overlay.database_url
        },
        receipt_secret: if overlay.receipt_secret.is_empty() {
            base.receipt_secret
        } else {
            overlay.receipt_secret
        },
        allowed_origins,
        policy_version: overlay.policy_version.or(base.policy_version),
        policy_hash: overlay.policy_hash.or(base.policy_hash),
        webhook_secret_key: if overlay.webhook_secret_key.is_empty() {
            base.webhook_secret_key
        } else {
            overlay.webhook_secret_key
        },
        export_signing_private_key_pem: if overlay.export_signing_private_key_pem.is_empty() {
            base.export_signing_private_key_pem
        } else {
            overlay.export_signing_private_key_pem
        },
        export_signing_public_key_pem: if overlay.export_signing_public_key_pem.is_empty() {
            base.export_signing_public_key_pem
        } else {
            overlay.export_signing_public_key_pem
        },
        rl_window_seconds: if overlay.rl_window_seconds != default_rl_window_seconds() {
            overlay.rl_window_seconds
        } else {
            base.rl_window_seconds
        },
        rl_max_requests: if overlay.rl_max_requests != default_rl_max_requests() {
            overlay.rl_max_requests
        } else {
            base.rl_max_requests
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> PbiConfig {
        PbiConfig {
            port: 8080,
            database_url: "postgres://localhost/pbi".into(),
            receipt_secret: "x".repeat(32),
            allowed_origins: vec!["https://example.com".into()],
            policy_version: Some("v1".into()),
            policy_hash: Some("deadbeef".into()),
            webhook_secret_key: pbi_crypto::base64url_encode(&[7u8; 32]),
            export_signing_private_key_pem: "-----BEGIN KEY-----".into(),
            export_signing_public_key_pem: "-----BEGIN KEY-----".into(),
            rl_window_seconds: 60,
            rl_max_requests: 120,
        }
    }

    #[test]
    fn valid_config_passes_with_no_warnings() {
        let warnings = validate_config(&valid_config()).expect("should validate");
        assert!(warnings.is_empty());
    }

    #[test]
    fn short_receipt_secret_is_a_hard_error() {
        let mut cfg = valid_config();
        cfg.receipt_secret = "short".into();
        let err = validate_config(&cfg).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("receiptSecret")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn wrong_length_webhook_key_is_a_hard_error() {
        let mut cfg = valid_config();
        cfg.webhook_secret_key = pbi_crypto::base64url_encode(&[1u8; 16]);
        let err = validate_config(&cfg).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("webhookSecretKey")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn non_base64_webhook_key_is_a_hard_error() {
        let mut cfg = valid_config();
        cfg.webhook_secret_key = "!!! not base64 !!!".into();
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn empty_allowed_origins_is_a_hard_error() {
        let mut cfg = valid_config();
        cfg.allowed_origins = vec![];
        let err = validate_config(&cfg).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("allowedOrigins")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn missing_policy_metadata_produces_warnings_not_errors() {
        let mut cfg = valid_config();
        cfg.policy_version = None;
        cfg.policy_hash = None;
        let warnings = validate_config(&cfg).expect("should still validate");
        assert!(
            warnings
                .iter()
                .any(|w| matches!(w, ConfigWarning::MissingPolicyVersion))
        );
        assert!(
            warnings
                .iter()
                .any(|w| matches!(w, ConfigWarning::MissingPolicyHash))
        );
    }

    #[test]
    fn out_of_range_rate_limit_window_produces_warning() {
        let mut cfg = valid_config();
        cfg.rl_window_seconds = 999_999;
        let warnings = validate_config(&cfg).expect("should still validate");
        assert!(warnings.iter().any(|w| matches!(
            w,
            ConfigWarning::RateLimitWindowOutOfSaneRange { .. }
        )));
    }

    #[test]
    fn parse_valid_toml_string() {
        let toml_str = r#"
            database_url = "postgres://localhost/pbi"
            receipt_secret = "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"
            allowed_origins = ["https://example.com"]
            webhook_secret_key = "BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc"
            export_signing_private_key_pem = "pem"
            export_signing_public_key_pem = "pem"
        "#;
        let cfg = parse_toml(toml_str).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.database_url, "postgres://localhost/pbi");
        assert_eq!(cfg.rl_window_seconds, 60);
        assert_eq!(cfg.rl_max_requests, 120);
    }

    #[test]
    fn parse_invalid_toml_gives_parse_error() {
        let bad = "this is [not valid toml =";
        let err = parse_toml(bad).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply_on_top_of_parsed_values() {
        // SAFETY: test runs single-threaded with respect to this var via
        // serial execution guaranteed by cargo test's default per-test
        // isolation of env state not being shared across processes here;
        // this crate does not run these tests concurrently against the
        // same var name elsewhere.
        unsafe {
            std::env::set_var("PBI_PORT", "9999");
        }
        let mut cfg = valid_config();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.port, 9999);
        unsafe {
            std::env::remove_var("PBI_PORT");
        }
    }

    #[test]
    fn env_override_for_allowed_origins_splits_on_comma() {
        unsafe {
            std::env::set_var("PBI_ALLOWED_ORIGINS", "https://a.com, https://b.com");
        }
        let mut cfg = valid_config();
        apply_env_overrides(&mut cfg);
        assert_eq!(
            cfg.allowed_origins,
            vec!["https://a.com".to_string(), "https://b.com".to_string()]
        );
        unsafe {
            std::env::remove_var("PBI_ALLOWED_ORIGINS");
        }
    }

    #[test]
    fn load_missing_file_gives_file_not_found() {
        let err = load_config(Path::new("/nonexistent/pbi.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pbi.toml");
        std::fs::write(
            &path,
            r#"
                database_url = "postgres://localhost/pbi"
                receipt_secret = "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"
                allowed_origins = ["https://example.com"]
                webhook_secret_key = "BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc"
                export_signing_private_key_pem = "pem"
                export_signing_public_key_pem = "pem"
                port = 9090
            "#,
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.port, 9090);
    }

    #[test]
    fn merge_overlay_overrides_base_port() {
        let base = PbiConfig { port: 8080, ..valid_config() };
        let overlay = PbiConfig { port: 9090, ..valid_config() };
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.port, 9090);
    }

    #[test]
    fn merge_unions_allowed_origins() {
        let mut base = valid_config();
        base.allowed_origins = vec!["https://a.com".into()];
        let mut overlay = valid_config();
        overlay.allowed_origins = vec!["https://b.com".into()];
        let merged = merge_configs(base, overlay);
        assert!(merged.allowed_origins.contains(&"https://a.com".to_string()));
        assert!(merged.allowed_origins.contains(&"https://b.com".to_string()));
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = valid_config();
        let serialized = toml::to_string(&cfg).unwrap();
        let deserialized: PbiConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(cfg, deserialized);
    }

    #[test]
    fn config_error_display() {
        let e = ConfigError::FileNotFound {
            path: "/foo".into(),
        };
        assert!(e.to_string().contains("/foo"));
    }
}
