//! # TemporaDB Index
//!
//! The binary index layout over an ordered byte-keyed KV store.
//!
//! ## Key Structure
//!
//! Every key starts with a 2-byte index tag; the rest is a fixed layout of
//! order-preserving encodings, so that the interesting queries are prefix
//! or range scans:
//!
//! ```text
//! ┌─────┬──────────────────────────────────────────────┬──────────────┐
//! │ Tag │ Key                                          │ Value        │
//! ├─────┼──────────────────────────────────────────────┼──────────────┤
//! │  0  │ content-hash (20B)                           │ doc bytes    │
//! │  1  │ attr-hash (20B) ‖ value-bytes ‖ hash (20B)   │ (empty)      │
//! │  2  │ content-hash (20B) ‖ eid (20B)               │ (empty)      │
//! │  3  │ eid (20B) ‖ ~bt ‖ ~tt ‖ ~tx-id ‖ ~op         │ hash (20B)   │
//! │  4  │ meta-key-hash (20B)                          │ arbitrary    │
//! └─────┴──────────────────────────────────────────────┴──────────────┘
//! ```
//!
//! Index 3 stores its time fields bitwise-inverted (`~`), giving reverse
//! chronological order: the latest version under an entity prefix is the
//! first key a forward scan meets.

pub mod codec;
pub mod keys;
mod index_store;
mod object_store;

pub use index_store::{AttributeRange, EntityHistory, IndexBatch, IndexStore};
pub use object_store::{ObjectStore, TOMBSTONE_MARKER};
