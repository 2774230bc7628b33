//! Hashing - SHA-256 over Canonical JSON
//!
//! Batch manifests and the delivery report carry a `manifest_hash` over
//! their own content, so downstream tooling can detect edits.

use serde::Serialize;
use serde_json::{to_string, Value};
use sha2::{Digest, Sha256};

pub const HASH_FIELD: &str = "manifest_hash";

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_value(v)))
                    .collect(),
            )
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Hash of a manifest with its own `manifest_hash` blanked.
pub fn compute_manifest_hash<T: Serialize>(manifest: &T) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(manifest)?;
    if let Value::Object(map) = &mut value {
        if map.contains_key(HASH_FIELD) {
            map.insert(HASH_FIELD.to_string(), Value::String(String::new()));
        }
    }
    Ok(sha256_hex(canonical_json(&value)?.as_bytes()))
}

/// `None` when the document carries no hash; otherwise whether it matches.
pub fn verify_manifest_hash(document: &Value) -> Option<bool> {
    let recorded = document.get(HASH_FIELD)?.as_str()?;
    if recorded.is_empty() {
        return None;
    }
    Some(compute_manifest_hash(document).map_or(false, |actual| actual == recorded))
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}
