//! # Canonical Serialization and Identity Hashing
//!
//! A document's identity is the SHA-1 digest of its canonical
//! serialization. "Canonical" means the same logical value always freezes
//! to the same bytes: MessagePack over `BTreeMap`-backed structures gives
//! deterministic field and key order, so equal values hash equally.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::types::DIGEST_LEN;
use crate::value::Value;

/// Freeze a value to canonical bytes.
pub fn freeze<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec(value).map_err(|e| Error::Serialization {
        message: format!("canonical freeze failed: {}", e),
    })
}

/// Decode canonical bytes back into a value.
pub fn thaw<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(|e| Error::Serialization {
        message: format!("canonical thaw failed: {}", e),
    })
}

/// SHA-1 digest of raw bytes.
pub fn digest(bytes: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Digest of a value's canonical serialization.
pub fn hash_value(value: &Value) -> [u8; DIGEST_LEN] {
    // Value serialization through rmp cannot fail: no recursion limits are
    // hit at the depths documents use and every variant is encodable.
    let bytes = freeze(value).expect("value freeze is infallible");
    digest(&bytes)
}

/// Digest identifying an attribute name in the attribute/value index.
pub fn attribute_hash(attr: &str) -> [u8; DIGEST_LEN] {
    hash_value(&Value::String(attr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_freeze_is_deterministic() {
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), Value::Long(2));
        map.insert("a".to_string(), Value::Long(1));
        let v = Value::Map(map.clone());

        let mut map2 = BTreeMap::new();
        map2.insert("a".to_string(), Value::Long(1));
        map2.insert("b".to_string(), Value::Long(2));
        let v2 = Value::Map(map2);

        assert_eq!(freeze(&v).unwrap(), freeze(&v2).unwrap());
    }

    #[test]
    fn test_hash_value_stable() {
        let v = Value::String("stable".to_string());
        assert_eq!(hash_value(&v), hash_value(&v));
        assert_eq!(hash_value(&v).len(), DIGEST_LEN);
    }

    #[test]
    fn test_distinct_values_distinct_digests() {
        assert_ne!(
            hash_value(&Value::String("a".to_string())),
            hash_value(&Value::String("b".to_string()))
        );
        assert_ne!(hash_value(&Value::Long(1)), hash_value(&Value::Long(2)));
    }

    #[test]
    fn test_thaw_roundtrip() {
        let v = Value::List(vec![Value::Long(1), Value::String("x".to_string())]);
        let bytes = freeze(&v).unwrap();
        let back: Value = thaw(&bytes).unwrap();
        assert_eq!(back, v);
    }
}
