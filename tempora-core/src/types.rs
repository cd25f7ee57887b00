//! # Core Types
//!
//! Fundamental data structures used throughout TemporaDB.
//!
//! Identity is always reduced to a fixed-width 20-byte SHA-1 digest, both
//! for entities ([`EntityId`]) and for document contents ([`ContentHash`]).
//! Documents are immutable: an entity changes by referencing a new document
//! with a new content hash from a later transaction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::canonical;
use crate::error::{Error, Result};
use crate::value::Value;

/// Width of every identity digest, in bytes.
pub const DIGEST_LEN: usize = 20;

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_millis() as i64;
        Self(millis)
    }

    pub fn millis(self) -> i64 {
        self.0
    }

    /// Get timestamp as chrono DateTime
    pub fn to_datetime(self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(self.0).unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().to_rfc3339())
    }
}

/// Canonical entity identifier: a 20-byte digest.
///
/// Constructors accept the ingress forms the system recognizes: keyword-like
/// strings, UUIDs, hex strings of exactly the digest width, raw digests, and
/// arbitrary values (hashed after canonical serialization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId([u8; DIGEST_LEN]);

impl EntityId {
    pub fn from_digest(digest: [u8; DIGEST_LEN]) -> Self {
        Self(digest)
    }

    /// Keyword-like string id, e.g. `:person/picasso`. Hashed.
    pub fn from_keyword(keyword: &str) -> Self {
        Self(canonical::hash_value(&Value::String(keyword.to_string())))
    }

    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(canonical::hash_value(&Value::String(uuid.to_string())))
    }

    /// Hex string of exactly the digest width; anything else is rejected.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != DIGEST_LEN * 2 {
            return Err(Error::MalformedId {
                message: format!(
                    "hex id must be {} characters, got {}",
                    DIGEST_LEN * 2,
                    hex_str.len()
                ),
            });
        }
        let decoded = hex::decode(hex_str).map_err(|e| Error::MalformedId {
            message: format!("invalid hex id: {}", e),
        })?;
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&decoded);
        Ok(Self(digest))
    }

    /// Raw byte array: taken verbatim at digest width, hashed otherwise.
    pub fn from_raw(bytes: &[u8]) -> Self {
        if bytes.len() == DIGEST_LEN {
            let mut digest = [0u8; DIGEST_LEN];
            digest.copy_from_slice(bytes);
            Self(digest)
        } else {
            Self(canonical::digest(bytes))
        }
    }

    /// Arbitrary value (typically a map) hashed after canonical serialization.
    pub fn from_value(value: &Value) -> Self {
        Self(canonical::hash_value(value))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// SHA-1 digest of a canonically serialized document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; DIGEST_LEN]);

impl ContentHash {
    /// The all-zero digest, used as the nil/tombstone sentinel in the
    /// bitemporal index: versions pointing at it read as "entity absent".
    pub const NIL: ContentHash = ContentHash([0u8; DIGEST_LEN]);

    pub fn from_digest(digest: [u8; DIGEST_LEN]) -> Self {
        Self(digest)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != DIGEST_LEN {
            return Err(Error::CorruptIndex {
                details: format!("content hash must be {} bytes, got {}", DIGEST_LEN, bytes.len()),
            });
        }
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(bytes);
        Ok(Self(digest))
    }

    /// Hash of already-canonical document bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(canonical::digest(bytes))
    }

    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// An immutable document: an entity id plus attribute/value fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: EntityId,
    pub fields: BTreeMap<String, Value>,
}

impl Document {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, attr: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(attr.into(), value.into());
        self
    }

    pub fn get(&self, attr: &str) -> Option<&Value> {
        self.fields.get(attr)
    }

    /// Canonical serialization: deterministic bytes, stable across runs.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical::freeze(self)
    }

    pub fn from_canonical(bytes: &[u8]) -> Result<Self> {
        canonical::thaw(bytes)
    }

    /// Content hash of the canonical serialization.
    pub fn content_hash(&self) -> Result<ContentHash> {
        Ok(ContentHash::of_bytes(&self.canonical_bytes()?))
    }
}

/// A single operation inside a transaction.
///
/// Put/Cas carry content hashes, never inline documents: the documents
/// travel on the doc-topic and must be acknowledged before the transaction
/// record is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TxOp {
    Put {
        eid: EntityId,
        content_hash: ContentHash,
        business_time: Option<Timestamp>,
    },
    Delete {
        eid: EntityId,
        business_time: Option<Timestamp>,
    },
    Cas {
        eid: EntityId,
        expected: ContentHash,
        new: ContentHash,
        business_time: Option<Timestamp>,
    },
    Evict {
        eid: EntityId,
    },
}

impl TxOp {
    pub fn eid(&self) -> EntityId {
        match self {
            TxOp::Put { eid, .. }
            | TxOp::Delete { eid, .. }
            | TxOp::Cas { eid, .. }
            | TxOp::Evict { eid } => *eid,
        }
    }

    /// Content hashes whose documents must be present before this op can
    /// be applied.
    pub fn required_hashes(&self) -> Vec<ContentHash> {
        match self {
            TxOp::Put { content_hash, .. } => vec![*content_hash],
            TxOp::Cas { new, .. } => vec![*new],
            TxOp::Delete { .. } | TxOp::Evict { .. } => Vec::new(),
        }
    }
}

/// A transaction as read back from the log: the id and time are assigned by
/// the log at commit (offset and record timestamp).
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub tx_id: u64,
    pub tx_time: Timestamp,
    pub ops: Vec<TxOp>,
}

/// One indexed entity version: the record stored in the bitemporal index,
/// one per (eid, business-time, transaction-time, tx-id, op) coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityVersion {
    pub eid: EntityId,
    pub business_time: Timestamp,
    pub tx_time: Timestamp,
    pub tx_id: u64,
    /// Position of the originating operation inside its transaction;
    /// breaks ties between ops touching the same eid at the same times.
    pub op_ix: u16,
    pub content_hash: ContentHash,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_id_roundtrip() {
        let id = EntityId::from_keyword(":person/picasso");
        let hex_str = id.to_string();
        assert_eq!(hex_str.len(), 40);
        assert_eq!(EntityId::from_hex(&hex_str).unwrap(), id);
    }

    #[test]
    fn test_hex_id_wrong_length_rejected() {
        assert!(EntityId::from_hex("abcd").is_err());
        assert!(EntityId::from_hex(&"a".repeat(41)).is_err());
    }

    #[test]
    fn test_uuid_id_is_stable() {
        let uuid = uuid::Uuid::new_v4();
        assert_eq!(EntityId::from_uuid(uuid), EntityId::from_uuid(uuid));
        assert_ne!(
            EntityId::from_uuid(uuid),
            EntityId::from_uuid(uuid::Uuid::new_v4())
        );
    }

    #[test]
    fn test_raw_id_verbatim_at_digest_width() {
        let digest = [7u8; DIGEST_LEN];
        assert_eq!(EntityId::from_raw(&digest).as_bytes(), &digest);
        // Non-digest width gets hashed instead
        assert_ne!(EntityId::from_raw(b"abc").as_bytes(), &[0u8; DIGEST_LEN]);
    }

    #[test]
    fn test_document_hash_changes_with_content() {
        let id = EntityId::from_keyword(":doc/a");
        let d1 = Document::new(id).with("name", "one");
        let d2 = Document::new(id).with("name", "two");
        assert_ne!(d1.content_hash().unwrap(), d2.content_hash().unwrap());
        assert_eq!(d1.content_hash().unwrap(), d1.clone().content_hash().unwrap());
    }

    #[test]
    fn test_document_canonical_roundtrip() {
        let doc = Document::new(EntityId::from_keyword(":doc/rt"))
            .with("age", 42i64)
            .with("name", "pablo");
        let bytes = doc.canonical_bytes().unwrap();
        assert_eq!(Document::from_canonical(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_required_hashes() {
        let eid = EntityId::from_keyword(":e");
        let hash = ContentHash::of_bytes(b"doc");
        let op = TxOp::Put { eid, content_hash: hash, business_time: None };
        assert_eq!(op.required_hashes(), vec![hash]);
        assert!(TxOp::Evict { eid }.required_hashes().is_empty());
    }
}
