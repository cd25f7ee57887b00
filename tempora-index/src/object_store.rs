//! # Object Store
//!
//! content-hash → document bytes, layered over the KV store's index-0
//! space. Puts are idempotent: the key is the digest of the value, so
//! overwriting writes the same bytes.
//!
//! An evicted hash keeps its key with the tombstone marker as value: point
//! lookups answer "absent" while the indexer can still distinguish
//! "evicted" from "not yet delivered".

use std::sync::Arc;

use tempora_core::error::Result;
use tempora_core::traits::KvStore;
use tempora_core::types::ContentHash;

use crate::index_store::IndexBatch;
use crate::keys;

/// Value stored under an evicted content hash. Real documents are
/// canonical MessagePack and never a single NUL byte.
pub const TOMBSTONE_MARKER: &[u8] = &[0x00];

pub struct ObjectStore {
    kv: Arc<dyn KvStore>,
}

impl ObjectStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Stage a document write. Idempotent; re-delivery stages identical
    /// bytes under the same key.
    pub fn stage_put(&self, batch: &mut IndexBatch, hash: &ContentHash, bytes: &[u8]) {
        batch.put(keys::doc_key(hash), bytes.to_vec());
    }

    /// Stage tombstones for evicted hashes: the document bytes are
    /// replaced by the marker.
    pub fn stage_delete(&self, batch: &mut IndexBatch, hashes: &[ContentHash]) {
        for hash in hashes {
            batch.put(keys::doc_key(hash), TOMBSTONE_MARKER.to_vec());
        }
    }

    /// Document bytes for a hash. `None` when the hash is unknown *or* has
    /// been tombstoned; compaction makes both legitimate.
    pub fn get(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>> {
        Ok(self
            .kv
            .get(&keys::doc_key(hash))?
            .filter(|bytes| bytes != TOMBSTONE_MARKER))
    }

    /// True when the hash has been evicted and replaced by the marker.
    pub fn is_tombstoned(&self, hash: &ContentHash) -> Result<bool> {
        Ok(self
            .kv
            .get(&keys::doc_key(hash))?
            .map(|bytes| bytes == TOMBSTONE_MARKER)
            .unwrap_or(false))
    }

    /// A referenced hash is resolvable when its document is present or its
    /// eviction has been recorded; staged writes in `overlays` count, later
    /// overlays shadowing earlier ones.
    pub fn present_or_tombstoned(&self, overlays: &[&IndexBatch], hash: &ContentHash) -> Result<bool> {
        let key = keys::doc_key(hash);
        for overlay in overlays.iter().rev() {
            if let Some(staged) = overlay.staged_get(&key) {
                return Ok(staged.is_some());
            }
        }
        Ok(self.kv.get(&key)?.is_some())
    }

    /// Document bytes, reading through staged overlay state first.
    pub fn get_with(&self, overlays: &[&IndexBatch], hash: &ContentHash) -> Result<Option<Vec<u8>>> {
        let key = keys::doc_key(hash);
        for overlay in overlays.iter().rev() {
            if let Some(staged) = overlay.staged_get(&key) {
                return Ok(staged
                    .filter(|bytes| bytes.as_slice() != TOMBSTONE_MARKER)
                    .map(|bytes| bytes.to_vec()));
            }
        }
        self.get(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempora_storage::MemKv;

    fn store() -> (Arc<MemKv>, ObjectStore) {
        let kv = Arc::new(MemKv::new());
        let objects = ObjectStore::new(kv.clone() as Arc<dyn KvStore>);
        (kv, objects)
    }

    fn commit(kv: &MemKv, batch: IndexBatch) {
        kv.write_batch(batch.into_ops()).unwrap();
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (kv, objects) = store();
        let hash = ContentHash::of_bytes(b"doc bytes");

        let mut batch = IndexBatch::new();
        objects.stage_put(&mut batch, &hash, b"doc bytes");
        commit(&kv, batch);

        assert_eq!(objects.get(&hash).unwrap(), Some(b"doc bytes".to_vec()));
        assert!(!objects.is_tombstoned(&hash).unwrap());

        // Overwriting with the same bytes is a semantic no-op
        let mut batch = IndexBatch::new();
        objects.stage_put(&mut batch, &hash, b"doc bytes");
        commit(&kv, batch);
        assert_eq!(objects.get(&hash).unwrap(), Some(b"doc bytes".to_vec()));
    }

    #[test]
    fn test_unknown_hash_is_absent_not_tombstoned() {
        let (_kv, objects) = store();
        let hash = ContentHash::of_bytes(b"never written");
        assert_eq!(objects.get(&hash).unwrap(), None);
        assert!(!objects.is_tombstoned(&hash).unwrap());
        assert!(!objects.present_or_tombstoned(&[], &hash).unwrap());
    }

    #[test]
    fn test_delete_leaves_tombstone() {
        let (kv, objects) = store();
        let hash = ContentHash::of_bytes(b"condemned");

        let mut batch = IndexBatch::new();
        objects.stage_put(&mut batch, &hash, b"condemned");
        commit(&kv, batch);

        let mut batch = IndexBatch::new();
        objects.stage_delete(&mut batch, &[hash]);
        commit(&kv, batch);

        // Gone for readers, but distinguishable from never-delivered
        assert_eq!(objects.get(&hash).unwrap(), None);
        assert!(objects.is_tombstoned(&hash).unwrap());
        assert!(objects.present_or_tombstoned(&[], &hash).unwrap());
    }

    #[test]
    fn test_staged_state_visible_through_overlay() {
        let (_kv, objects) = store();
        let hash = ContentHash::of_bytes(b"in flight");

        let mut batch = IndexBatch::new();
        objects.stage_put(&mut batch, &hash, b"in flight");

        // Visible through the overlay before any commit
        assert!(objects.present_or_tombstoned(&[&batch], &hash).unwrap());
        assert_eq!(
            objects.get_with(&[&batch], &hash).unwrap(),
            Some(b"in flight".to_vec())
        );
        // Not visible without it
        assert_eq!(objects.get(&hash).unwrap(), None);
    }
}
