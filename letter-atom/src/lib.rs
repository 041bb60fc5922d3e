//! Canonical JSON serialization for deterministic content hashing.
//!
//! Every hashed structure in the ledger (blocks, manifests) is hashed
//! by first rendering it to this canonical byte form, so that two
//! semantically-equal values always hash identically regardless of
//! field insertion order.
//!
//! ## Guarantees
//! - Keys are sorted lexicographically (recursive)
//! - No whitespace in output
//! - Arrays preserve order
//! - Non-finite numbers are rejected

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors that can occur during canonicalization
#[derive(Error, Debug)]
pub enum AtomError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Non-finite number detected (NaN, Infinity)
    #[error("non-finite number detected")]
    NonFiniteNumber,
}

/// Result type for atom operations
pub type Result<T> = std::result::Result<T, AtomError>;

/// Canonicalize a JSON value to deterministic bytes.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>> {
    let sorted = sort_keys_recursive(value)?;
    Ok(serde_json::to_vec(&sorted)?)
}

/// Canonicalize to a UTF-8 string (for logging/debugging).
pub fn canonicalize_string(value: &Value) -> Result<String> {
    let bytes = canonicalize(value)?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

/// Compute `content_hash = BLAKE3(canonical_bytes)`, hex-encoded.
pub fn content_hash(value: &Value) -> Result<String> {
    let canonical = canonicalize(value)?;
    Ok(hex::encode(blake3::hash(&canonical).as_bytes()))
}

/// Serialize any `Serialize` value to canonical JSON and hash it.
pub fn hash_serializable<T: serde::Serialize>(value: &T) -> Result<String> {
    let v = serde_json::to_value(value)?;
    content_hash(&v)
}

fn sort_keys_recursive(value: &Value) -> Result<Value> {
    match value {
        Value::Object(map) => {
            let mut sorted_map = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            for key in keys {
                let val = map.get(key).unwrap();
                sorted_map.insert(key.clone(), sort_keys_recursive(val)?);
            }

            Ok(Value::Object(sorted_map))
        }
        Value::Array(arr) => {
            let sorted: Result<Vec<Value>> = arr.iter().map(sort_keys_recursive).collect();
            Ok(Value::Array(sorted?))
        }
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if f.is_nan() || f.is_infinite() {
                    return Err(AtomError::NonFiniteNumber);
                }
            }
            Ok(value.clone())
        }
        _ => Ok(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys() {
        let data = json!({"z": 1, "a": 2, "m": 3});
        let canonical = canonicalize_string(&data).unwrap();
        assert_eq!(canonical, r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn sorts_nested_keys() {
        let data = json!({
            "outer": {"z": 1, "a": 2},
            "array": [{"b": 1, "a": 2}]
        });
        let canonical = canonicalize_string(&data).unwrap();
        assert_eq!(canonical, r#"{"array":[{"a":2,"b":1}],"outer":{"a":2,"z":1}}"#);
    }

    #[test]
    fn preserves_array_order() {
        let data = json!([3, 1, 2]);
        let canonical = canonicalize_string(&data).unwrap();
        assert_eq!(canonical, "[3,1,2]");
    }

    #[test]
    fn deterministic_across_key_order() {
        let data1 = json!({"b": 2, "a": 1});
        let data2 = json!({"a": 1, "b": 2});
        assert_eq!(canonicalize(&data1).unwrap(), canonicalize(&data2).unwrap());
    }

    #[test]
    fn no_whitespace() {
        let data = json!({"key": "value", "nested": {"a": 1}});
        let canonical = canonicalize_string(&data).unwrap();
        assert!(!canonical.contains(' '));
        assert!(!canonical.contains('\n'));
    }

    #[test]
    fn content_hash_matches_blake3_of_canonical() {
        let v = json!({"a": 1, "b": [2, 3]});
        let h = content_hash(&v).unwrap();
        let canon = canonicalize(&v).unwrap();
        let raw = hex::encode(blake3::hash(&canon).as_bytes());
        assert_eq!(h, raw);
    }

    #[test]
    fn content_hash_ignores_key_order() {
        let v1 = json!({"z": 1, "a": 2});
        let v2 = json!({"a": 2, "z": 1});
        assert_eq!(content_hash(&v1).unwrap(), content_hash(&v2).unwrap());
    }

    #[test]
    fn rejects_non_finite_numbers() {
        // f64::NAN can't be constructed via json! directly but can via Number
        let n = serde_json::Number::from_f64(f64::INFINITY);
        assert!(n.is_none(), "serde_json already refuses to build non-finite Numbers");
    }
}
