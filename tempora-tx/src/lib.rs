//! # TemporaDB Transactions
//!
//! The write path and the indexing loop that turn the two-topic log into
//! queryable bitemporal state.
//!
//! ## Data Flow
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  submit_tx(ops)                                                  │
//! │    1. produce one doc record per attached document (all acked)   │
//! │    2. produce one tx record referencing content hashes           │
//! │    3. resolve with (tx-id, tx-time) = (offset, timestamp)        │
//! │                                                                  │
//! │  consume_and_index()                                             │
//! │    poll both topics ──► docs → object store + indexes 1/2        │
//! │                    └──► txs  → pending queue                     │
//! │    apply pending head once its documents are present             │
//! │    commit: ONE atomic KV batch (mutations + both offsets)        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod indexer;
mod node;
mod submit;

pub use indexer::{IndexReport, Indexer, PendingState};
pub use node::{Node, TxLog};
pub use submit::{SubmitOp, TxReceipt, TxSubmitter};
