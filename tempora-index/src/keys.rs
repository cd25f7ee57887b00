//! # Typed Key Layouts
//!
//! Construction and decoding of the five tagged key layouts. Decoding
//! checks lengths hard: a key that does not match its layout means the
//! index is corrupt, not that the caller should cope.

use tempora_core::canonical;
use tempora_core::error::{Error, Result};
use tempora_core::types::{ContentHash, EntityId, EntityVersion, Timestamp, DIGEST_LEN};
use tempora_core::value::Value;

use crate::codec;

pub const TAG_LEN: usize = 2;
/// Full length of an entity bitemporal key:
/// tag ‖ eid ‖ bt ‖ tt ‖ tx-id ‖ op-seq.
pub const ENTITY_KEY_LEN: usize = TAG_LEN + DIGEST_LEN + 8 + 8 + 8 + 2;

/// The five index spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum IndexTag {
    /// content-hash → document bytes
    Doc = 0,
    /// attr-hash ‖ value-bytes ‖ content-hash → ()
    AttrValue = 1,
    /// content-hash ‖ eid → ()
    HashEntity = 2,
    /// eid ‖ ~bt ‖ ~tt ‖ ~tx-id ‖ ~op → content-hash
    EntityBitemporal = 3,
    /// meta-key-hash → arbitrary
    Meta = 4,
}

impl IndexTag {
    pub fn bytes(self) -> [u8; TAG_LEN] {
        (self as u16).to_be_bytes()
    }
}

fn tagged(tag: IndexTag, capacity: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(TAG_LEN + capacity);
    key.extend_from_slice(&tag.bytes());
    key
}

fn check_tag(key: &[u8], tag: IndexTag) -> Result<()> {
    if key.len() < TAG_LEN || key[..TAG_LEN] != tag.bytes() {
        return Err(Error::CorruptIndex {
            details: format!("key does not carry tag {:?}", tag),
        });
    }
    Ok(())
}

/// Index 0: content-hash → document bytes.
pub fn doc_key(hash: &ContentHash) -> Vec<u8> {
    let mut key = tagged(IndexTag::Doc, DIGEST_LEN);
    key.extend_from_slice(hash.as_bytes());
    key
}

pub fn decode_doc_key(key: &[u8]) -> Result<ContentHash> {
    check_tag(key, IndexTag::Doc)?;
    if key.len() != TAG_LEN + DIGEST_LEN {
        return Err(Error::CorruptIndex {
            details: format!("doc key has length {}", key.len()),
        });
    }
    ContentHash::from_slice(&key[TAG_LEN..])
}

/// Index 1: attr-hash ‖ value-bytes ‖ content-hash.
pub fn attr_value_key(attr_hash: &[u8; DIGEST_LEN], value_bytes: &[u8], hash: &ContentHash) -> Vec<u8> {
    let mut key = tagged(IndexTag::AttrValue, DIGEST_LEN + value_bytes.len() + DIGEST_LEN);
    key.extend_from_slice(attr_hash);
    key.extend_from_slice(value_bytes);
    key.extend_from_slice(hash.as_bytes());
    key
}

/// Prefix covering every value of one attribute.
pub fn attr_prefix(attr_hash: &[u8; DIGEST_LEN]) -> Vec<u8> {
    let mut key = tagged(IndexTag::AttrValue, DIGEST_LEN);
    key.extend_from_slice(attr_hash);
    key
}

/// Split an index-1 key into (value-bytes, content-hash). The attribute
/// prefix is the caller's; only the remainder varies.
pub fn decode_attr_value_key(key: &[u8]) -> Result<(Vec<u8>, ContentHash)> {
    check_tag(key, IndexTag::AttrValue)?;
    let min = TAG_LEN + DIGEST_LEN + DIGEST_LEN;
    if key.len() < min {
        return Err(Error::CorruptIndex {
            details: format!("attr/value key has length {}", key.len()),
        });
    }
    let value_bytes = key[TAG_LEN + DIGEST_LEN..key.len() - DIGEST_LEN].to_vec();
    let hash = ContentHash::from_slice(&key[key.len() - DIGEST_LEN..])?;
    Ok((value_bytes, hash))
}

/// Index 2: content-hash ‖ eid.
pub fn hash_entity_key(hash: &ContentHash, eid: &EntityId) -> Vec<u8> {
    let mut key = tagged(IndexTag::HashEntity, DIGEST_LEN * 2);
    key.extend_from_slice(hash.as_bytes());
    key.extend_from_slice(eid.as_bytes());
    key
}

pub fn decode_hash_entity_key(key: &[u8]) -> Result<(ContentHash, EntityId)> {
    check_tag(key, IndexTag::HashEntity)?;
    if key.len() != TAG_LEN + DIGEST_LEN * 2 {
        return Err(Error::CorruptIndex {
            details: format!("hash/entity key has length {}", key.len()),
        });
    }
    let hash = ContentHash::from_slice(&key[TAG_LEN..TAG_LEN + DIGEST_LEN])?;
    let mut eid = [0u8; DIGEST_LEN];
    eid.copy_from_slice(&key[TAG_LEN + DIGEST_LEN..]);
    Ok((hash, EntityId::from_digest(eid)))
}

/// Index 3: eid ‖ ~bt ‖ ~tt ‖ ~tx-id ‖ ~op-seq.
///
/// All four trailing fields are reverse-encoded, so a forward scan under an
/// eid prefix yields newest business time first, ties broken by newest
/// transaction time, then highest tx-id, then latest op in the transaction.
pub fn entity_key(
    eid: &EntityId,
    business_time: Timestamp,
    tx_time: Timestamp,
    tx_id: u64,
    op_ix: u16,
) -> Vec<u8> {
    let mut key = tagged(IndexTag::EntityBitemporal, ENTITY_KEY_LEN - TAG_LEN);
    key.extend_from_slice(eid.as_bytes());
    key.extend_from_slice(&codec::encode_i64_desc(business_time.millis()));
    key.extend_from_slice(&codec::encode_i64_desc(tx_time.millis()));
    key.extend_from_slice(&codec::encode_u64_desc(tx_id));
    key.extend_from_slice(&codec::encode_u16_desc(op_ix));
    key
}

/// Prefix covering every version of one entity.
pub fn entity_prefix(eid: &EntityId) -> Vec<u8> {
    let mut key = tagged(IndexTag::EntityBitemporal, DIGEST_LEN);
    key.extend_from_slice(eid.as_bytes());
    key
}

/// Seek key for the as-of lookup at (bt, tt).
///
/// Deliberately ends at the tt field: live keys extend it with tx-id and
/// op-seq bytes and therefore sort after it, so the first matching key a
/// forward scan meets is the exact (bt, tt) coordinate with the highest
/// tx-id, when one exists.
pub fn entity_seek_key(eid: &EntityId, business_time: Timestamp, tx_time: Timestamp) -> Vec<u8> {
    let mut key = tagged(IndexTag::EntityBitemporal, DIGEST_LEN + 16);
    key.extend_from_slice(eid.as_bytes());
    key.extend_from_slice(&codec::encode_i64_desc(business_time.millis()));
    key.extend_from_slice(&codec::encode_i64_desc(tx_time.millis()));
    key
}

/// Decode an index-3 key and its content-hash value.
pub fn decode_entity_entry(key: &[u8], value: &[u8]) -> Result<EntityVersion> {
    check_tag(key, IndexTag::EntityBitemporal)?;
    if key.len() != ENTITY_KEY_LEN {
        return Err(Error::CorruptIndex {
            details: format!("entity key has length {}, expected {}", key.len(), ENTITY_KEY_LEN),
        });
    }
    let mut eid = [0u8; DIGEST_LEN];
    eid.copy_from_slice(&key[TAG_LEN..TAG_LEN + DIGEST_LEN]);
    let mut at = TAG_LEN + DIGEST_LEN;
    let business_time = codec::decode_i64_desc(&key[at..at + 8])?;
    at += 8;
    let tx_time = codec::decode_i64_desc(&key[at..at + 8])?;
    at += 8;
    let tx_id = codec::decode_u64_desc(&key[at..at + 8])?;
    at += 8;
    let op_ix = codec::decode_u16_desc(&key[at..at + 2])?;

    Ok(EntityVersion {
        eid: EntityId::from_digest(eid),
        business_time: Timestamp::from_millis(business_time),
        tx_time: Timestamp::from_millis(tx_time),
        tx_id,
        op_ix,
        content_hash: ContentHash::from_slice(value)?,
    })
}

/// Index 4: meta entry keyed by a digest.
pub fn meta_key(digest: &[u8; DIGEST_LEN]) -> Vec<u8> {
    let mut key = tagged(IndexTag::Meta, DIGEST_LEN);
    key.extend_from_slice(digest);
    key
}

/// Meta key holding the committed consumer offset of (topic, partition).
pub fn offsets_key(topic: &str, partition: u32) -> Vec<u8> {
    let id = Value::List(vec![
        Value::String("consumer-offset".to_string()),
        Value::String(topic.to_string()),
        Value::Long(partition as i64),
    ]);
    meta_key(&canonical::hash_value(&id))
}

/// Meta key marking a transaction whose precondition failed.
pub fn tx_failed_key(tx_id: u64) -> Vec<u8> {
    let id = Value::List(vec![
        Value::String("tx-failed".to_string()),
        Value::Long(tx_id as i64),
    ]);
    meta_key(&canonical::hash_value(&id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eid(n: u8) -> EntityId {
        EntityId::from_digest([n; DIGEST_LEN])
    }

    fn hash(n: u8) -> ContentHash {
        ContentHash::from_digest([n; DIGEST_LEN])
    }

    #[test]
    fn test_entity_key_roundtrip() {
        let version = EntityVersion {
            eid: eid(3),
            business_time: Timestamp::from_millis(1_700_000_000_123),
            tx_time: Timestamp::from_millis(1_700_000_001_456),
            tx_id: 42,
            op_ix: 7,
            content_hash: hash(9),
        };
        let key = entity_key(
            &version.eid,
            version.business_time,
            version.tx_time,
            version.tx_id,
            version.op_ix,
        );
        assert_eq!(key.len(), ENTITY_KEY_LEN);
        let decoded = decode_entity_entry(&key, version.content_hash.as_bytes()).unwrap();
        assert_eq!(decoded, version);
    }

    #[test]
    fn test_entity_keys_sort_newest_first() {
        let e = eid(1);
        let t = |ms| Timestamp::from_millis(ms);
        let older = entity_key(&e, t(100), t(100), 1, 0);
        let newer_bt = entity_key(&e, t(200), t(100), 1, 0);
        let newer_tt = entity_key(&e, t(100), t(200), 2, 0);
        let higher_tx = entity_key(&e, t(100), t(100), 9, 0);
        let later_op = entity_key(&e, t(100), t(100), 1, 3);

        assert!(newer_bt < older);
        assert!(newer_tt < older);
        assert!(higher_tx < older);
        assert!(later_op < older);
    }

    #[test]
    fn test_seek_key_sorts_before_exact_coordinate() {
        let e = eid(2);
        let t = Timestamp::from_millis(500);
        let seek = entity_seek_key(&e, t, t);
        let exact = entity_key(&e, t, t, u64::MAX, u16::MAX);
        assert!(seek < exact);
        assert!(exact.starts_with(&seek));
    }

    #[test]
    fn test_doc_key_roundtrip() {
        let h = hash(5);
        assert_eq!(decode_doc_key(&doc_key(&h)).unwrap(), h);
    }

    #[test]
    fn test_hash_entity_key_roundtrip() {
        let (h, e) = (hash(1), eid(2));
        let key = hash_entity_key(&h, &e);
        assert_eq!(decode_hash_entity_key(&key).unwrap(), (h, e));
    }

    #[test]
    fn test_attr_value_key_roundtrip() {
        let attr = [7u8; DIGEST_LEN];
        let value_bytes = crate::codec::encode_value(&Value::from("pablo"));
        let key = attr_value_key(&attr, &value_bytes, &hash(3));
        let (decoded_value, decoded_hash) = decode_attr_value_key(&key).unwrap();
        assert_eq!(decoded_value, value_bytes);
        assert_eq!(decoded_hash, hash(3));
        assert!(key.starts_with(&attr_prefix(&attr)));
    }

    #[test]
    fn test_truncated_keys_are_corrupt() {
        assert!(decode_doc_key(&[0, 0, 1, 2]).is_err());
        assert!(decode_entity_entry(&[0, 3, 9], &[0; DIGEST_LEN]).is_err());
        let (h, e) = (hash(1), eid(1));
        let mut key = hash_entity_key(&h, &e);
        key.pop();
        assert!(decode_hash_entity_key(&key).is_err());
    }

    #[test]
    fn test_meta_keys_are_stable_and_distinct() {
        assert_eq!(offsets_key("t", 0), offsets_key("t", 0));
        assert_ne!(offsets_key("t", 0), offsets_key("t", 1));
        assert_ne!(offsets_key("a", 0), offsets_key("b", 0));
        assert_ne!(tx_failed_key(1), tx_failed_key(2));
    }
}
