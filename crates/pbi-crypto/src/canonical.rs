//! Canonical JSON: recursively sorted object keys, no whitespace, arrays in
//! original order, minimal string escaping — the signing input for
//! export-pack manifests and attestor-trust-bundle key IDs.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Failure constructing the canonical form.
#[derive(Debug, thiserror::Error)]
pub enum CanonicalJsonError {
    /// The input could not be serialized to [`serde_json::Value`] at all.
    #[error("failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serialize `value` into its canonical JSON byte representation: object
/// keys in ascending codepoint order, no insignificant whitespace, array
/// order preserved.
///
/// `parse(canonicalize(v)) == v` and `canonicalize` is deterministic for any
/// `v` representable as [`serde_json::Value`].
pub fn canonicalize<T: Serialize>(value: &T) -> Result<String, CanonicalJsonError> {
    let v = serde_json::to_value(value)?;
    let sorted = sort_keys(&v);
    Ok(serde_json::to_string(&sorted)?)
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), sort_keys(v)))
                .collect();
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
