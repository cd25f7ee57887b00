//! # Core Traits
//!
//! The ordered key/value store interface the index layer is written
//! against. The store sorts keys lexicographically; the index layer builds
//! fixed-layout keys so that every useful range becomes a prefix scan.
//!
//! ## Design Philosophy
//!
//! 1. **Error Propagation**: All operations return Result
//! 2. **Atomicity**: `write_batch` applies all operations or none
//! 3. **Snapshots**: Readers iterate a consistent point-in-time view
//! 4. **Testability**: Traits enable swapping backends in tests

use crate::error::Result;

/// A single operation in an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOp {
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// Ordered byte-keyed store. Keys compare lexicographically.
///
/// Implementations must be thread-safe; the indexer owns exclusive write
/// access while readers see consistent snapshots.
pub trait KvStore: Send + Sync {
    /// Point lookup. `Ok(None)` if the key is absent.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite a single key.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove a single key. Idempotent.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Apply all operations atomically: either every op is visible or none.
    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()>;

    /// A consistent point-in-time view of the store.
    fn snapshot(&self) -> Box<dyn KvSnapshot>;
}

/// A point-in-time view supporting point reads and ordered iteration.
pub trait KvSnapshot: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// New iterator positioned before the first key.
    fn iterator(&self) -> Box<dyn KvIterator>;
}

/// Seekable, bidirectional iterator over a snapshot.
///
/// The iterator owns whatever handle keeps its snapshot alive; dropping it
/// releases the view.
pub trait KvIterator: Send {
    /// Position at the first key `>= key` and return that entry.
    fn seek(&mut self, key: &[u8]) -> Option<(Vec<u8>, Vec<u8>)>;

    /// Advance to the next key in ascending order.
    fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)>;

    /// Step back to the previous key in ascending order.
    fn prev(&mut self) -> Option<(Vec<u8>, Vec<u8>)>;
}
