//! # Metrics and Monitoring
//!
//! Provides metrics collection for monitoring TemporaDB.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Log metrics
    records_produced: AtomicU64,
    bytes_produced: AtomicU64,
    records_consumed: AtomicU64,
    compactions: AtomicU64,

    // Indexing metrics
    docs_indexed: AtomicU64,
    txs_indexed: AtomicU64,
    txs_failed: AtomicU64,
    evictions: AtomicU64,
    pending_txs: AtomicU64,

    // Query metrics
    entity_lookups: AtomicU64,
    range_scans: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                records_produced: AtomicU64::new(0),
                bytes_produced: AtomicU64::new(0),
                records_consumed: AtomicU64::new(0),
                compactions: AtomicU64::new(0),
                docs_indexed: AtomicU64::new(0),
                txs_indexed: AtomicU64::new(0),
                txs_failed: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                pending_txs: AtomicU64::new(0),
                entity_lookups: AtomicU64::new(0),
                range_scans: AtomicU64::new(0),
            }),
        }
    }

    /// Record produced log records
    pub fn record_produce(&self, count: u64, bytes: u64) {
        self.inner.records_produced.fetch_add(count, Ordering::Relaxed);
        self.inner.bytes_produced.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record consumed log records
    pub fn record_consume(&self, count: u64) {
        self.inner.records_consumed.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a compaction run
    pub fn record_compaction(&self) {
        self.inner.compactions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record indexed documents
    pub fn record_docs_indexed(&self, count: u64) {
        self.inner.docs_indexed.fetch_add(count, Ordering::Relaxed);
    }

    /// Record an applied transaction
    pub fn record_tx_indexed(&self) {
        self.inner.txs_indexed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transaction whose precondition failed
    pub fn record_tx_failed(&self) {
        self.inner.txs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction
    pub fn record_eviction(&self) {
        self.inner.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the pending-transaction depth
    pub fn update_pending_txs(&self, depth: u64) {
        self.inner.pending_txs.store(depth, Ordering::Relaxed);
    }

    /// Record an entity lookup
    pub fn record_entity_lookup(&self) {
        self.inner.entity_lookups.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an attribute range scan
    pub fn record_range_scan(&self) {
        self.inner.range_scans.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_produced: self.inner.records_produced.load(Ordering::Relaxed),
            bytes_produced: self.inner.bytes_produced.load(Ordering::Relaxed),
            records_consumed: self.inner.records_consumed.load(Ordering::Relaxed),
            compactions: self.inner.compactions.load(Ordering::Relaxed),
            docs_indexed: self.inner.docs_indexed.load(Ordering::Relaxed),
            txs_indexed: self.inner.txs_indexed.load(Ordering::Relaxed),
            txs_failed: self.inner.txs_failed.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            pending_txs: self.inner.pending_txs.load(Ordering::Relaxed),
            entity_lookups: self.inner.entity_lookups.load(Ordering::Relaxed),
            range_scans: self.inner.range_scans.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub records_produced: u64,
    pub bytes_produced: u64,
    pub records_consumed: u64,
    pub compactions: u64,
    pub docs_indexed: u64,
    pub txs_indexed: u64,
    pub txs_failed: u64,
    pub evictions: u64,
    pub pending_txs: u64,
    pub entity_lookups: u64,
    pub range_scans: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    /// Start new timer
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and log duration
    pub fn stop(self) {
        let duration = self.elapsed();
        tracing::debug!(
            name = %self.name,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
