//! # TemporaDB Core
//!
//! This crate provides the fundamental building blocks for TemporaDB:
//! - Core data structures (ids, documents, transactions)
//! - Canonical serialization and identity hashing
//! - Error types
//! - Configuration and metrics
//! - The ordered key/value store interface
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  tempora-core                   │
//! ├─────────────────────────────────────────────────┤
//! │  • types      - Ids, documents, transactions   │
//! │  • value      - Closed document value enum     │
//! │  • canonical  - Deterministic freeze + SHA-1   │
//! │  • traits     - Ordered KV store interface     │
//! │  • error      - Error handling                 │
//! │  • config     - Configuration                  │
//! │  • metrics    - Counters                       │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod canonical;
pub mod config;
pub mod error;
pub mod metrics;
pub mod traits;
pub mod types;
pub mod utils;
pub mod value;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::{
    ContentHash, Document, EntityId, EntityVersion, Timestamp, Transaction, TxOp,
};
pub use value::Value;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PROTOCOL_VERSION: u32 = 1;
