//! # Node
//!
//! The facade wiring log, KV store, object/index stores, submitter and
//! indexer together, and exposing the query contract:
//!
//! - `entity_as_of(eid, bt, tt)` — the as-of document lookup
//! - `entity_history(eid)` — lazy reverse-chronological versions
//! - `attribute_range(attr, lower, upper)` — lazy index-1 range scan
//! - `tx_log(from_tx_id)` — lazy read of the transaction topic
//!
//! Multiple nodes may consume the same log directory, each building local
//! state in its own KV store; all converge to the same state after
//! consuming up to a given offset.

use std::sync::Arc;

use tracing::info;

use tempora_core::canonical;
use tempora_core::config::{Config, TopicConfig};
use tempora_core::error::Result;
use tempora_core::metrics::{Metrics, MetricsSnapshot};
use tempora_core::traits::KvStore;
use tempora_core::types::{Document, EntityId, Timestamp, Transaction, TxOp};
use tempora_core::value::Value;
use tempora_index::{AttributeRange, EntityHistory, IndexStore, ObjectStore};
use tempora_log::{CompactionReport, Compactor, Consumer, LogManager, Producer, RecordIterator};

use crate::indexer::{IndexReport, Indexer};
use crate::submit::{SubmitOp, TxReceipt, TxSubmitter};

pub struct Node {
    log: Arc<LogManager>,
    objects: ObjectStore,
    indexes: IndexStore,
    submitter: TxSubmitter,
    indexer: tokio::sync::Mutex<Indexer>,
    config: Config,
    metrics: Metrics,
}

impl Node {
    /// Open a node over a KV store and the log directory in `config`.
    /// Creates both topics if absent; refuses to open topics whose stored
    /// policy diverges from the required one.
    pub async fn open(kv: Arc<dyn KvStore>, config: Config) -> Result<Self> {
        let metrics = Metrics::new();
        let log = Arc::new(LogManager::new(config.log.clone(), metrics.clone()));

        log.create_topic(&config.log.tx_topic, TopicConfig::tx_log()).await?;
        log.create_topic(&config.log.doc_topic, TopicConfig::doc_store()).await?;

        let producer = Producer::new(Arc::clone(&log));
        let submitter = TxSubmitter::new(
            producer.clone(),
            config.log.tx_topic.clone(),
            config.log.doc_topic.clone(),
        );

        // Documents drain before transactions within a poll
        let mut consumer = Consumer::new(Arc::clone(&log), config.indexer.max_poll_records);
        consumer.assign(&[config.log.doc_topic.as_str(), config.log.tx_topic.as_str()])?;

        let mut indexer = Indexer::new(
            Arc::clone(&kv),
            consumer,
            producer,
            config.log.tx_topic.clone(),
            config.log.doc_topic.clone(),
            config.indexer.poll_timeout,
            metrics.clone(),
        );
        indexer.subscribe_from_stored_offsets()?;

        info!(
            "node open: log at {:?}, topics {}/{}",
            config.log.data_dir, config.log.tx_topic, config.log.doc_topic
        );

        Ok(Self {
            objects: ObjectStore::new(Arc::clone(&kv)),
            indexes: IndexStore::new(kv),
            log,
            submitter,
            indexer: tokio::sync::Mutex::new(indexer),
            config,
            metrics,
        })
    }

    /// Submit a transaction; see [`TxSubmitter::submit_tx`].
    pub async fn submit_tx(&self, ops: Vec<SubmitOp>) -> Result<TxReceipt> {
        self.submitter.submit_tx(ops).await
    }

    /// Run one consume cycle.
    pub async fn consume_and_index(&self) -> Result<IndexReport> {
        self.indexer.lock().await.consume_and_index().await
    }

    /// Consume until a cycle makes no progress.
    pub async fn catch_up(&self) -> Result<()> {
        loop {
            let report = self.consume_and_index().await?;
            if report.txs == 0 && report.docs == 0 {
                return Ok(());
            }
        }
    }

    /// The document of `eid` visible at (business_time, tx_time), if any.
    /// Deleted, evicted and never-asserted entities all read as absent.
    pub fn entity_as_of(
        &self,
        eid: &EntityId,
        business_time: Timestamp,
        tx_time: Timestamp,
    ) -> Result<Option<Document>> {
        self.metrics.record_entity_lookup();
        match self.indexes.entity_at(&[], eid, business_time, tx_time)? {
            None => Ok(None),
            Some(version) if version.content_hash.is_nil() => Ok(None),
            Some(version) => match self.objects.get(&version.content_hash)? {
                Some(bytes) => Ok(Some(Document::from_canonical(&bytes)?)),
                // Hash tombstoned or compacted away: absent, not an error
                None => Ok(None),
            },
        }
    }

    /// Lazy reverse-chronological history of one entity.
    pub fn entity_history(&self, eid: &EntityId) -> EntityHistory {
        self.indexes.entity_history(eid)
    }

    /// Lazy ascending scan of one attribute's indexed values.
    pub fn attribute_range(&self, attr: &str, lower: &Value, upper: &Value) -> AttributeRange {
        self.metrics.record_range_scan();
        self.indexes.attribute_range(attr, lower, upper)
    }

    /// Lazy read of the transaction log from `from_tx_id` (default 0).
    pub fn tx_log(&self, from_tx_id: Option<u64>) -> Result<TxLog> {
        let topic = self.log.topic(&self.config.log.tx_topic)?;
        Ok(TxLog {
            records: topic.read_from(from_tx_id.unwrap_or(0))?,
        })
    }

    /// Whether a consumed transaction was recorded failed (CAS mismatch).
    pub fn tx_failed(&self, tx_id: u64) -> Result<bool> {
        self.indexes.tx_failed(tx_id)
    }

    /// Compact the document topic now. Returns `None` when the dirty ratio
    /// is below the topic's threshold.
    pub fn compact_doc_topic(&self) -> Result<Option<CompactionReport>> {
        let topic = self.log.topic(&self.config.log.doc_topic)?;
        let compactor = Compactor::new(self.log.log_config().clone(), self.metrics.clone());
        compactor.compact(&topic)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Lazy iterator over the transaction topic.
pub struct TxLog {
    records: RecordIterator,
}

impl Iterator for TxLog {
    type Item = Result<Transaction>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e)),
        };
        let ops: Result<Vec<TxOp>> = canonical::thaw(&record.value);
        Some(ops.map(|ops| Transaction {
            tx_id: record.offset,
            tx_time: record.timestamp,
            ops,
        }))
    }
}
