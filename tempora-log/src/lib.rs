//! # TemporaDB Log
//!
//! The append-only, single-partition topic log that is the authoritative
//! state of a TemporaDB deployment. Two topics carry everything:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Topic Layout                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  tx-topic   cleanup=delete  retention=-1   ordered, immutable   │
//! │  doc-topic  cleanup=compact keyed by content hash               │
//! │                                                                 │
//! │  Writer ──► doc records (all acked) ──► one tx record           │
//! │  Indexer ◄── poll both topics on one consumer                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each topic is a directory of segment files; records carry the offset
//! assigned at append time, which doubles as the transaction id on the
//! tx-topic. Compaction of the doc-topic retains at most the latest record
//! per key and preserves record offsets, so consumer positions survive it.

mod client;
mod compaction;
mod iterator;
mod segment;
mod topic;
mod types;

pub use client::{Consumer, ConsumedRecord, LogManager, Producer};
pub use compaction::{CompactionReport, Compactor};
pub use iterator::RecordIterator;
pub use topic::Topic;
pub use types::{Record, RecordKind, RecordMeta};
