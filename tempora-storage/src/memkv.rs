//! In-memory ordered key/value store.
//!
//! A `BTreeMap` behind a `parking_lot::RwLock`. Batches apply under one
//! write lock, so readers never observe a half-applied batch. Snapshots
//! clone the tree into an `Arc`; iterators hold the `Arc`, so a snapshot
//! stays readable for as long as any iterator over it is alive.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use tempora_core::error::Result;
use tempora_core::traits::{BatchOp, KvIterator, KvSnapshot, KvStore};

type Tree = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory ordered KV store.
pub struct MemKv {
    tree: RwLock<Tree>,
}

impl MemKv {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }

    /// Full copy of the current contents, used by replay-equivalence tests.
    pub fn dump(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.tree
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl Default for MemKv {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.tree.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.tree.write().remove(key);
        Ok(())
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut tree = self.tree.write();
        debug!("applying batch of {} ops", ops.len());
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    tree.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    tree.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> Box<dyn KvSnapshot> {
        Box::new(MemSnapshot {
            tree: Arc::new(self.tree.read().clone()),
        })
    }
}

struct MemSnapshot {
    tree: Arc<Tree>,
}

impl KvSnapshot for MemSnapshot {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key).cloned())
    }

    fn iterator(&self) -> Box<dyn KvIterator> {
        Box::new(MemIter {
            tree: Arc::clone(&self.tree),
            cursor: Cursor::Start,
        })
    }
}

enum Cursor {
    /// Before the first key.
    Start,
    /// At a live key.
    At(Vec<u8>),
    /// Past the last key.
    End,
}

/// Cursor over an immutable snapshot tree. Steps re-enter the tree at the
/// cursor key, so each step is O(log n) against the frozen view.
struct MemIter {
    tree: Arc<Tree>,
    cursor: Cursor,
}

impl MemIter {
    fn settle(&mut self, entry: Option<(Vec<u8>, Vec<u8>)>, exhausted: Cursor) -> Option<(Vec<u8>, Vec<u8>)> {
        self.cursor = match &entry {
            Some((k, _)) => Cursor::At(k.clone()),
            None => exhausted,
        };
        entry
    }
}

impl KvIterator for MemIter {
    fn seek(&mut self, key: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        let entry = self
            .tree
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()));
        self.settle(entry, Cursor::End)
    }

    fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        let lower = match &self.cursor {
            Cursor::Start => Bound::Unbounded,
            Cursor::At(cur) => Bound::Excluded(cur.clone()),
            Cursor::End => return None,
        };
        let entry = self
            .tree
            .range((lower, Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()));
        self.settle(entry, Cursor::End)
    }

    fn prev(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        let upper = match &self.cursor {
            Cursor::Start => return None,
            Cursor::At(cur) => Bound::Excluded(cur.clone()),
            Cursor::End => Bound::Unbounded,
        };
        let entry = self
            .tree
            .range((Bound::Unbounded, upper))
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone()));
        self.settle(entry, Cursor::Start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let kv = MemKv::new();
        kv.put(b"a", b"1").unwrap();
        assert_eq!(kv.get(b"a").unwrap(), Some(b"1".to_vec()));
        kv.delete(b"a").unwrap();
        assert_eq!(kv.get(b"a").unwrap(), None);
    }

    #[test]
    fn test_batch_is_atomic_for_snapshots() {
        let kv = MemKv::new();
        kv.put(b"k1", b"old").unwrap();

        let before = kv.snapshot();
        kv.write_batch(vec![
            BatchOp::Put { key: b"k1".to_vec(), value: b"new".to_vec() },
            BatchOp::Put { key: b"k2".to_vec(), value: b"v2".to_vec() },
            BatchOp::Delete { key: b"missing".to_vec() },
        ])
        .unwrap();

        // Earlier snapshot still sees the old world
        assert_eq!(before.get(b"k1").unwrap(), Some(b"old".to_vec()));
        assert_eq!(before.get(b"k2").unwrap(), None);

        let after = kv.snapshot();
        assert_eq!(after.get(b"k1").unwrap(), Some(b"new".to_vec()));
        assert_eq!(after.get(b"k2").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_iterator_seek_next_prev() {
        let kv = MemKv::new();
        for k in [b"b".as_ref(), b"d", b"f"] {
            kv.put(k, k).unwrap();
        }
        let snap = kv.snapshot();
        let mut iter = snap.iterator();

        // Seek lands on first key >= target
        assert_eq!(iter.seek(b"c").map(|(k, _)| k), Some(b"d".to_vec()));
        assert_eq!(iter.next().map(|(k, _)| k), Some(b"f".to_vec()));
        assert_eq!(iter.next(), None);
        // Exhausted forward: prev re-enters from the end
        assert_eq!(iter.prev().map(|(k, _)| k), Some(b"f".to_vec()));
        assert_eq!(iter.prev().map(|(k, _)| k), Some(b"d".to_vec()));
        assert_eq!(iter.prev().map(|(k, _)| k), Some(b"b".to_vec()));
        assert_eq!(iter.prev(), None);
        // Exhausted backward: next re-enters from the start
        assert_eq!(iter.next().map(|(k, _)| k), Some(b"b".to_vec()));
    }

    #[test]
    fn test_seek_past_end() {
        let kv = MemKv::new();
        kv.put(b"a", b"1").unwrap();
        let snap = kv.snapshot();
        let mut iter = snap.iterator();
        assert_eq!(iter.seek(b"z"), None);
        // Past the end: next yields nothing, prev returns the last key
        assert_eq!(iter.next(), None);
        assert_eq!(iter.prev().map(|(k, _)| k), Some(b"a".to_vec()));
    }
}
