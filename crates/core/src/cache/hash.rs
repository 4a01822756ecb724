//! Content-addressed cache key generation.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Compute a content-addressed cache key for a request parameter set.
///
/// Object keys are sorted at every depth before hashing, so two parameter
/// sets that differ only in insertion order share a key.
pub fn compute_cache_key(params: &Map<String, Value>) -> String {
    let canonical = canonicalize(&Value::Object(params.clone()));
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
