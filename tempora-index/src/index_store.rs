//! # Index Store
//!
//! The secondary indexes as pure functions of documents and transactions:
//! staging writes into an [`IndexBatch`] and reading through snapshots.
//!
//! Mutations never hit the KV store directly. The indexer stages
//! everything a consume cycle produces into one batch and commits it
//! atomically together with the consumer offsets; reads that must observe
//! staged-but-uncommitted state (CAS preconditions, eviction scans) go
//! through the batch overlay.

use std::collections::BTreeMap;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use tracing::debug;

use tempora_core::canonical;
use tempora_core::error::{Error, Result};
use tempora_core::traits::{BatchOp, KvIterator, KvStore};
use tempora_core::types::{ContentHash, Document, EntityId, EntityVersion, Timestamp};
use tempora_core::value::Value;

use crate::codec;
use crate::keys;

/// Staged mutations for one atomic commit.
///
/// Keeps the ops in application order for the KV write, plus a map view so
/// overlay reads see the batch's own writes.
#[derive(Default)]
pub struct IndexBatch {
    ops: Vec<BatchOp>,
    staged: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl IndexBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.staged.insert(key.clone(), Some(value.clone()));
        self.ops.push(BatchOp::Put { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.staged.insert(key.clone(), None);
        self.ops.push(BatchOp::Delete { key });
    }

    /// Fold another batch into this one; the other's writes win.
    pub fn merge(&mut self, other: IndexBatch) {
        for (key, value) in other.staged {
            self.staged.insert(key, value);
        }
        // ops were captured per put/delete, so replay preserves order
        let mut other_ops = other.ops;
        self.ops.append(&mut other_ops);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Staged state of a key: `Some(Some(_))` staged put, `Some(None)`
    /// staged delete, `None` untouched.
    pub fn staged_get(&self, key: &[u8]) -> Option<Option<&Vec<u8>>> {
        self.staged.get(key).map(|v| v.as_ref())
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    fn staged_in_prefix(&self, seek: &[u8], prefix: &[u8]) -> BTreeMap<Vec<u8>, Vec<u8>> {
        // seek always lies within the prefix region, so matching keys are
        // the contiguous run from seek to the end of the prefix
        self.staged
            .range(seek.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect()
    }
}

/// Forward walk over the union of the committed store and staged batches,
/// bounded by a key prefix. Staged entries shadow committed ones.
struct MergedPrefixScan {
    store: Box<dyn KvIterator>,
    store_next: Option<(Vec<u8>, Vec<u8>)>,
    staged: std::iter::Peekable<std::collections::btree_map::IntoIter<Vec<u8>, Vec<u8>>>,
    prefix: Vec<u8>,
    done: bool,
}

impl MergedPrefixScan {
    fn new(kv: &dyn KvStore, overlays: &[&IndexBatch], seek: &[u8], prefix: &[u8]) -> Self {
        // Later overlays shadow earlier ones
        let mut staged = BTreeMap::new();
        for overlay in overlays {
            staged.extend(overlay.staged_in_prefix(seek, prefix));
        }

        let snapshot = kv.snapshot();
        let mut store = snapshot.iterator();
        let store_next = store.seek(seek);

        Self {
            store,
            store_next,
            staged: staged.into_iter().peekable(),
            prefix: prefix.to_vec(),
            done: false,
        }
    }

    fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        if self.done {
            return None;
        }
        let take_staged = match (&self.store_next, self.staged.peek()) {
            (None, None) => {
                self.done = true;
                return None;
            }
            (None, Some(_)) => true,
            (Some(_), None) => false,
            (Some((store_key, _)), Some((staged_key, _))) => staged_key <= store_key,
        };

        let entry = if take_staged {
            let (key, value) = self.staged.next().expect("peeked");
            // Drop a shadowed committed entry with the same key
            if self.store_next.as_ref().map(|(k, _)| k == &key).unwrap_or(false) {
                self.store_next = self.store.next();
            }
            (key, value)
        } else {
            let entry = self.store_next.take().expect("checked");
            self.store_next = self.store.next();
            entry
        };

        // Keys are globally ordered; one key outside the prefix ends the scan
        if !entry.0.starts_with(&self.prefix) {
            self.done = true;
            return None;
        }
        Some(entry)
    }
}

pub struct IndexStore {
    kv: Arc<dyn KvStore>,
}

impl IndexStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Stage the secondary-index writes for a delivered document: one
    /// attr/value entry per indexable value and one hash→entity entry.
    /// List values index each element; other composites index by digest.
    pub fn stage_doc(&self, batch: &mut IndexBatch, hash: &ContentHash, doc: &Document) {
        for (attr, value) in &doc.fields {
            let attr_hash = canonical::attribute_hash(attr);
            for value_bytes in Self::index_values(value) {
                batch.put(keys::attr_value_key(&attr_hash, &value_bytes, hash), Vec::new());
            }
        }
        batch.put(keys::hash_entity_key(hash, &doc.id), Vec::new());
    }

    /// Stage removal of everything [`stage_doc`] wrote, for eviction.
    pub fn stage_unindex_doc(&self, batch: &mut IndexBatch, hash: &ContentHash, doc: &Document) {
        for (attr, value) in &doc.fields {
            let attr_hash = canonical::attribute_hash(attr);
            for value_bytes in Self::index_values(value) {
                batch.delete(keys::attr_value_key(&attr_hash, &value_bytes, hash));
            }
        }
        batch.delete(keys::hash_entity_key(hash, &doc.id));
    }

    fn index_values(value: &Value) -> Vec<Vec<u8>> {
        match value {
            Value::List(items) => items.iter().map(codec::encode_value).collect(),
            other => vec![codec::encode_value(other)],
        }
    }

    /// Stage one bitemporal index entry.
    pub fn stage_entity_version(&self, batch: &mut IndexBatch, version: &EntityVersion) {
        let key = keys::entity_key(
            &version.eid,
            version.business_time,
            version.tx_time,
            version.tx_id,
            version.op_ix,
        );
        batch.put(key, version.content_hash.as_bytes().to_vec());
    }

    /// The as-of lookup: latest version of `eid` visible at
    /// (business_time, tx_time), reading through `overlays` first.
    ///
    /// Seeks to (eid, ~bt, ~tt) and walks forward: keys under the eid
    /// prefix whose decoded times exceed either bound are skipped, the
    /// first one within both bounds wins.
    pub fn entity_at(
        &self,
        overlays: &[&IndexBatch],
        eid: &EntityId,
        business_time: Timestamp,
        tx_time: Timestamp,
    ) -> Result<Option<EntityVersion>> {
        let seek = keys::entity_seek_key(eid, business_time, tx_time);
        let prefix = keys::entity_prefix(eid);
        let mut scan = MergedPrefixScan::new(self.kv.as_ref(), overlays, &seek, &prefix);

        while let Some((key, value)) = scan.next() {
            let version = keys::decode_entity_entry(&key, &value)?;
            if version.business_time <= business_time && version.tx_time <= tx_time {
                return Ok(Some(version));
            }
        }
        Ok(None)
    }

    /// Every version of `eid` in reverse chronological order, reading
    /// through `overlays` first. Used by eviction, which must rewrite
    /// versions staged earlier in the same commit cycle.
    pub fn entity_versions(
        &self,
        overlays: &[&IndexBatch],
        eid: &EntityId,
    ) -> Result<Vec<EntityVersion>> {
        let prefix = keys::entity_prefix(eid);
        let mut scan = MergedPrefixScan::new(self.kv.as_ref(), overlays, &prefix, &prefix);
        let mut versions = Vec::new();
        while let Some((key, value)) = scan.next() {
            versions.push(keys::decode_entity_entry(&key, &value)?);
        }
        Ok(versions)
    }

    /// Lazy reverse-chronological history of one entity, over a snapshot
    /// the iterator owns.
    pub fn entity_history(&self, eid: &EntityId) -> EntityHistory {
        let snapshot = self.kv.snapshot();
        EntityHistory {
            iter: snapshot.iterator(),
            prefix: keys::entity_prefix(eid),
            started: false,
            done: false,
        }
    }

    /// Lazy range scan over one attribute's indexed values, inclusive on
    /// both bounds.
    pub fn attribute_range(&self, attr: &str, lower: &Value, upper: &Value) -> AttributeRange {
        let attr_hash = canonical::attribute_hash(attr);
        let prefix = keys::attr_prefix(&attr_hash);
        let mut seek = prefix.clone();
        seek.extend_from_slice(&codec::encode_value(lower));

        let snapshot = self.kv.snapshot();
        AttributeRange {
            iter: snapshot.iterator(),
            prefix,
            seek,
            upper: codec::encode_value(upper),
            started: false,
            done: false,
        }
    }

    /// Committed consumer offset for (topic, partition), if any.
    pub fn load_offset(&self, topic: &str, partition: u32) -> Result<Option<u64>> {
        match self.kv.get(&keys::offsets_key(topic, partition))? {
            None => Ok(None),
            Some(bytes) => {
                if bytes.len() != 8 {
                    return Err(Error::CorruptIndex {
                        details: format!("offset entry has length {}", bytes.len()),
                    });
                }
                Ok(Some(BigEndian::read_u64(&bytes)))
            }
        }
    }

    /// Stage the consumer offset for (topic, partition); committed
    /// atomically with the index mutations of the same cycle.
    pub fn stage_offset(&self, batch: &mut IndexBatch, topic: &str, partition: u32, offset: u64) {
        let mut bytes = [0u8; 8];
        BigEndian::write_u64(&mut bytes, offset);
        debug!("staging offset {} for {}/{}", offset, topic, partition);
        batch.put(keys::offsets_key(topic, partition), bytes.to_vec());
    }

    /// Stage the failed-transaction marker.
    pub fn stage_tx_failed(&self, batch: &mut IndexBatch, tx_id: u64) {
        batch.put(keys::tx_failed_key(tx_id), Vec::new());
    }

    /// Whether a transaction was recorded as failed (CAS mismatch).
    pub fn tx_failed(&self, tx_id: u64) -> Result<bool> {
        Ok(self.kv.get(&keys::tx_failed_key(tx_id))?.is_some())
    }
}

/// Iterator over an entity's versions, newest first. Owns its snapshot via
/// the underlying KV iterator; dropping it releases the view.
pub struct EntityHistory {
    iter: Box<dyn KvIterator>,
    prefix: Vec<u8>,
    started: bool,
    done: bool,
}

impl Iterator for EntityHistory {
    type Item = Result<EntityVersion>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let entry = if self.started {
            self.iter.next()
        } else {
            self.started = true;
            self.iter.seek(&self.prefix)
        };
        match entry {
            Some((key, value)) if key.starts_with(&self.prefix) => {
                Some(keys::decode_entity_entry(&key, &value))
            }
            _ => {
                self.done = true;
                None
            }
        }
    }
}

/// Iterator over (encoded value bytes, content hash) pairs of one
/// attribute, values ascending, bounds inclusive.
pub struct AttributeRange {
    iter: Box<dyn KvIterator>,
    prefix: Vec<u8>,
    seek: Vec<u8>,
    upper: Vec<u8>,
    started: bool,
    done: bool,
}

impl Iterator for AttributeRange {
    type Item = Result<(Vec<u8>, ContentHash)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let entry = if self.started {
            self.iter.next()
        } else {
            self.started = true;
            self.iter.seek(&self.seek)
        };
        match entry {
            Some((key, _)) if key.starts_with(&self.prefix) => {
                match keys::decode_attr_value_key(&key) {
                    Ok((value_bytes, hash)) => {
                        if value_bytes.as_slice() > self.upper.as_slice() {
                            self.done = true;
                            None
                        } else {
                            Some(Ok((value_bytes, hash)))
                        }
                    }
                    Err(e) => {
                        self.done = true;
                        Some(Err(e))
                    }
                }
            }
            _ => {
                self.done = true;
                None
            }
        }
    }
}
