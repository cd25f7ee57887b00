//! # Indexer
//!
//! The consume loop: pulls from both topics, buffers transactions whose
//! referenced documents have not arrived, applies transactions in tx-id
//! order, and commits every mutation of a cycle plus both consumer offsets
//! in one atomic KV batch.
//!
//! ## Pending Transaction States
//!
//! ```text
//! Waiting ──(all referenced docs present or tombstoned)──► Applying
//! Applying ──(batch committed)──► Applied
//! Applying ──(cas mismatch)──► Failed   (offset still advances)
//! ```
//!
//! An interrupted cycle leaves nothing behind: every write is staged and
//! committed at the end, so a crash before commit means the next cycle
//! re-polls the same records from the committed offsets and rebuilds the
//! pending queue by the same rule.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use tempora_core::canonical;
use tempora_core::error::{Error, Result};
use tempora_core::metrics::Metrics;
use tempora_core::traits::KvStore;
use tempora_core::types::{ContentHash, Document, EntityId, EntityVersion, Timestamp, TxOp};
use tempora_index::{IndexBatch, IndexStore, ObjectStore};
use tempora_log::{Consumer, Producer, Record, RecordKind};

/// Counts returned by one consume cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexReport {
    pub txs: usize,
    pub docs: usize,
}

/// Lifecycle of a consumed-but-not-committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    Waiting,
    Applying,
    Applied,
    Failed,
}

struct PendingTx {
    tx_id: u64,
    tx_time: Timestamp,
    ops: Vec<TxOp>,
    state: PendingState,
}

/// Single consumer per index instance; owns the pending queue exclusively.
pub struct Indexer {
    kv: Arc<dyn KvStore>,
    objects: ObjectStore,
    indexes: IndexStore,
    consumer: Consumer,
    producer: Producer,
    tx_topic: String,
    doc_topic: String,
    poll_timeout: Duration,
    pending: VecDeque<PendingTx>,
    metrics: Metrics,
}

impl Indexer {
    pub fn new(
        kv: Arc<dyn KvStore>,
        consumer: Consumer,
        producer: Producer,
        tx_topic: String,
        doc_topic: String,
        poll_timeout: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            objects: ObjectStore::new(Arc::clone(&kv)),
            indexes: IndexStore::new(Arc::clone(&kv)),
            kv,
            consumer,
            producer,
            tx_topic,
            doc_topic,
            poll_timeout,
            pending: VecDeque::new(),
            metrics,
        }
    }

    /// Seek the consumer to the offsets committed in the meta index. A
    /// fresh KV store has none and replays both topics from the start.
    pub fn subscribe_from_stored_offsets(&mut self) -> Result<()> {
        for topic in [self.doc_topic.clone(), self.tx_topic.clone()] {
            if let Some(offset) = self.indexes.load_offset(&topic, 0)? {
                info!("resuming {} from committed offset {}", topic, offset);
                self.consumer.seek(&topic, offset)?;
            }
        }
        Ok(())
    }

    /// Transactions consumed but not yet applied.
    pub fn pending_depth(&self) -> usize {
        self.pending.len()
    }

    /// States of the queued transactions, head first. Everything still in
    /// the queue is `Waiting`; applied and failed transactions leave it.
    pub fn pending_states(&self) -> Vec<PendingState> {
        self.pending.iter().map(|tx| tx.state).collect()
    }

    /// One consume cycle. Returns how many transactions were applied (or
    /// recorded failed) and how many doc records were indexed.
    pub async fn consume_and_index(&mut self) -> Result<IndexReport> {
        let records = self.consumer.poll(self.poll_timeout).await?;

        let mut batch = IndexBatch::new();
        let mut docs = 0usize;
        let mut doc_offset: Option<u64> = None;

        for consumed in records {
            if consumed.topic == self.doc_topic {
                self.apply_doc_record(&mut batch, &consumed.record)?;
                docs += 1;
                doc_offset = Some(consumed.record.offset + 1);
            } else if consumed.topic == self.tx_topic {
                let ops: Vec<TxOp> = canonical::thaw(&consumed.record.value)?;
                debug!(
                    "consumed tx {} with {} ops, queueing",
                    consumed.record.offset,
                    ops.len()
                );
                self.pending.push_back(PendingTx {
                    tx_id: consumed.record.offset,
                    tx_time: consumed.record.timestamp,
                    ops,
                    state: PendingState::Waiting,
                });
            } else {
                warn!("record from unassigned topic {}", consumed.topic);
            }
        }

        // Apply from the head while every referenced document is available.
        // The tx offset advances only past transactions actually applied.
        let mut txs = 0usize;
        let mut tx_offset: Option<u64> = None;
        let mut evicted: Vec<ContentHash> = Vec::new();

        while let Some(head) = self.pending.front() {
            if !self.docs_available(&batch, head)? {
                break;
            }
            let mut tx = self.pending.pop_front().expect("peeked head");
            tx.state = PendingState::Applying;
            let applied = self.apply_tx(&mut batch, &tx, &mut evicted)?;
            tx.state = if applied { PendingState::Applied } else { PendingState::Failed };
            if applied {
                txs += 1;
                self.metrics.record_tx_indexed();
            } else {
                self.metrics.record_tx_failed();
            }
            tx_offset = Some(tx.tx_id + 1);
        }

        if let Some(offset) = doc_offset {
            self.indexes.stage_offset(&mut batch, &self.doc_topic, 0, offset);
        }
        if let Some(offset) = tx_offset {
            self.indexes.stage_offset(&mut batch, &self.tx_topic, 0, offset);
        }

        if !batch.is_empty() {
            self.kv.write_batch(batch.into_ops())?;
        }

        self.metrics.record_docs_indexed(docs as u64);
        self.metrics.update_pending_txs(self.pending.len() as u64);

        // Tombstones flow through the doc topic after the commit; they are
        // keyed by hash, so re-produced duplicates compact away.
        for hash in evicted {
            self.producer
                .produce_tombstone(&self.doc_topic, Bytes::copy_from_slice(hash.as_bytes()))
                .await?;
        }

        Ok(IndexReport { txs, docs })
    }

    fn apply_doc_record(&self, batch: &mut IndexBatch, record: &Record) -> Result<()> {
        let key = record.key.as_ref().ok_or_else(|| Error::Log {
            message: format!("doc record at offset {} has no key", record.offset),
            source: None,
        })?;
        let hash = ContentHash::from_slice(key)?;

        match record.kind {
            RecordKind::Data => {
                let doc = Document::from_canonical(&record.value)?;
                // Re-delivery is idempotent: same bytes, same keys
                self.objects.stage_put(batch, &hash, &record.value);
                self.indexes.stage_doc(batch, &hash, &doc);
            }
            RecordKind::Tombstone => {
                // An eviction replayed to us: drop local document state
                if let Some(bytes) = self.objects.get_with(&[&*batch], &hash)? {
                    let doc = Document::from_canonical(&bytes)?;
                    self.indexes.stage_unindex_doc(batch, &hash, &doc);
                }
                self.objects.stage_delete(batch, &[hash]);
            }
        }
        Ok(())
    }

    /// A transaction may apply once every hash it references resolves:
    /// document present locally, staged this cycle, or tombstoned.
    fn docs_available(&self, batch: &IndexBatch, tx: &PendingTx) -> Result<bool> {
        for op in &tx.ops {
            for hash in op.required_hashes() {
                if !self.objects.present_or_tombstoned(&[batch], &hash)? {
                    debug!("tx {} waiting on document {}", tx.tx_id, hash);
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Apply one transaction into a sub-batch; merge on success, discard
    /// wholesale on CAS mismatch so a failed transaction writes no
    /// bitemporal entries at all.
    fn apply_tx(
        &self,
        batch: &mut IndexBatch,
        tx: &PendingTx,
        evicted: &mut Vec<ContentHash>,
    ) -> Result<bool> {
        let mut tx_batch = IndexBatch::new();

        for (op_ix, op) in tx.ops.iter().enumerate() {
            let op_ix = op_ix as u16;
            match op {
                TxOp::Put {
                    eid,
                    content_hash,
                    business_time,
                } => {
                    self.indexes.stage_entity_version(
                        &mut tx_batch,
                        &EntityVersion {
                            eid: *eid,
                            business_time: business_time.unwrap_or(tx.tx_time),
                            tx_time: tx.tx_time,
                            tx_id: tx.tx_id,
                            op_ix,
                            content_hash: *content_hash,
                        },
                    );
                }
                TxOp::Delete { eid, business_time } => {
                    self.indexes.stage_entity_version(
                        &mut tx_batch,
                        &EntityVersion {
                            eid: *eid,
                            business_time: business_time.unwrap_or(tx.tx_time),
                            tx_time: tx.tx_time,
                            tx_id: tx.tx_id,
                            op_ix,
                            content_hash: ContentHash::NIL,
                        },
                    );
                }
                TxOp::Cas {
                    eid,
                    expected,
                    new,
                    business_time,
                } => {
                    let current = self
                        .indexes
                        .entity_at(&[&*batch, &tx_batch], eid, tx.tx_time, tx.tx_time)?
                        .map(|v| v.content_hash)
                        .unwrap_or(ContentHash::NIL);
                    if current != *expected {
                        info!(
                            "tx {} failed: cas on {} expected {}, found {}",
                            tx.tx_id, eid, expected, current
                        );
                        self.indexes.stage_tx_failed(batch, tx.tx_id);
                        return Ok(false);
                    }
                    self.indexes.stage_entity_version(
                        &mut tx_batch,
                        &EntityVersion {
                            eid: *eid,
                            business_time: business_time.unwrap_or(tx.tx_time),
                            tx_time: tx.tx_time,
                            tx_id: tx.tx_id,
                            op_ix,
                            content_hash: *new,
                        },
                    );
                }
                TxOp::Evict { eid } => {
                    self.apply_evict(batch, &mut tx_batch, tx, *eid, evicted)?;
                }
            }
        }

        batch.merge(tx_batch);
        Ok(true)
    }

    /// Evict an entity: every historical version is rewritten to point at
    /// the tombstone hash, its documents leave the object store and the
    /// secondary indexes, and tombstone records head for the doc topic.
    fn apply_evict(
        &self,
        batch: &IndexBatch,
        tx_batch: &mut IndexBatch,
        tx: &PendingTx,
        eid: EntityId,
        evicted: &mut Vec<ContentHash>,
    ) -> Result<()> {
        let versions = self.indexes.entity_versions(&[batch, &*tx_batch], &eid)?;

        let mut hashes: Vec<ContentHash> = versions
            .iter()
            .map(|v| v.content_hash)
            .filter(|h| !h.is_nil())
            .collect();
        hashes.sort();
        hashes.dedup();

        for version in &versions {
            let mut rewritten = *version;
            rewritten.content_hash = ContentHash::NIL;
            self.indexes.stage_entity_version(tx_batch, &rewritten);
        }

        for hash in &hashes {
            // Compaction may have removed the document already; then there
            // is nothing left to unindex
            if let Some(bytes) = self.objects.get_with(&[&*batch, &*tx_batch], hash)? {
                let doc = Document::from_canonical(&bytes)?;
                self.indexes.stage_unindex_doc(tx_batch, hash, &doc);
            }
        }
        self.objects.stage_delete(tx_batch, &hashes);

        info!(
            "evicting {}: {} versions, {} documents (tx {})",
            eid,
            versions.len(),
            hashes.len(),
            tx.tx_id
        );
        evicted.extend(hashes);
        self.metrics.record_eviction();
        Ok(())
    }
}
