//! # Log Client
//!
//! Producer and consumer over the topic set of one log directory.
//!
//! The producer is thread-safe: any number of writers may produce
//! concurrently, ordering is whatever the single partition assigns.
//! Transient append failures retry with exponential backoff before the
//! caller sees an error.
//!
//! The consumer owns its positions. Broker-side offset commit does not
//! exist here on purpose: the indexer persists positions in its own KV
//! store atomically with index state and seeks the consumer on startup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::debug;

use tempora_core::config::{LogConfig, TopicConfig};
use tempora_core::error::{Error, Result};
use tempora_core::metrics::Metrics;
use tempora_core::utils::retry_with_backoff;

use super::topic::Topic;
use super::types::{Record, RecordKind, RecordMeta};

/// Owns every topic under one log directory.
pub struct LogManager {
    root: PathBuf,
    log_config: LogConfig,
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    notify: Arc<Notify>,
    metrics: Metrics,
}

impl LogManager {
    pub fn new(log_config: LogConfig, metrics: Metrics) -> Self {
        Self {
            root: log_config.data_dir.clone(),
            log_config,
            topics: RwLock::new(HashMap::new()),
            notify: Arc::new(Notify::new()),
            metrics,
        }
    }

    /// Open or create a topic, enforcing the required policy. Opening an
    /// existing topic whose stored policy diverges fails hard.
    pub async fn create_topic(&self, name: &str, required: TopicConfig) -> Result<Arc<Topic>> {
        if let Some(existing) = self.topics.read().get(name) {
            return Ok(Arc::clone(existing));
        }
        let topic = Topic::open(
            &self.root,
            name,
            required,
            self.log_config.clone(),
            Arc::clone(&self.notify),
            self.metrics.clone(),
        )
        .await?;
        self.topics.write().insert(name.to_string(), Arc::clone(&topic));
        Ok(topic)
    }

    pub fn topic(&self, name: &str) -> Result<Arc<Topic>> {
        self.topics.read().get(name).cloned().ok_or_else(|| Error::Log {
            message: format!("unknown topic: {}", name),
            source: None,
        })
    }

    pub fn log_config(&self) -> &LogConfig {
        &self.log_config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub(crate) fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }
}

/// Thread-safe record producer.
#[derive(Clone)]
pub struct Producer {
    manager: Arc<LogManager>,
    max_retries: u32,
    initial_backoff_ms: u64,
}

impl Producer {
    pub fn new(manager: Arc<LogManager>) -> Self {
        Self {
            manager,
            max_retries: 5,
            initial_backoff_ms: 10,
        }
    }

    /// Produce one record; resolves with its offset and timestamp once the
    /// append is durable. Transient failures retry with backoff.
    pub async fn produce(
        &self,
        topic: &str,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Result<RecordMeta> {
        self.produce_kind(topic, RecordKind::Data, key, value).await
    }

    /// Produce a tombstone for `key`: the compaction-surviving marker that
    /// the key's document has been evicted.
    pub async fn produce_tombstone(&self, topic: &str, key: Bytes) -> Result<RecordMeta> {
        self.produce_kind(topic, RecordKind::Tombstone, Some(key), Bytes::new())
            .await
    }

    async fn produce_kind(
        &self,
        topic: &str,
        kind: RecordKind,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Result<RecordMeta> {
        let topic = self.manager.topic(topic)?;
        retry_with_backoff(
            || {
                let topic = Arc::clone(&topic);
                let key = key.clone();
                let value = value.clone();
                async move { topic.append(kind, key, value).await }
            },
            self.max_retries,
            self.initial_backoff_ms,
        )
        .await
    }
}

/// A record handed to a consumer, tagged with its topic.
#[derive(Debug, Clone)]
pub struct ConsumedRecord {
    pub topic: String,
    pub record: Record,
}

/// Single-threaded consumer over an assigned set of topics.
pub struct Consumer {
    manager: Arc<LogManager>,
    assigned: Vec<String>,
    positions: HashMap<String, u64>,
    max_poll_records: usize,
}

impl Consumer {
    pub fn new(manager: Arc<LogManager>, max_poll_records: usize) -> Self {
        Self {
            manager,
            assigned: Vec::new(),
            positions: HashMap::new(),
            max_poll_records,
        }
    }

    /// Assign topics to this consumer, starting at offset 0. Poll drains
    /// topics in assignment order.
    pub fn assign(&mut self, topics: &[&str]) -> Result<()> {
        for name in topics {
            // Fails on unknown topics; policy was validated at open
            let _ = self.manager.topic(name)?;
            if !self.assigned.iter().any(|t| t == name) {
                self.assigned.push(name.to_string());
                self.positions.insert(name.to_string(), 0);
            }
        }
        Ok(())
    }

    /// Move this consumer's position for `topic`.
    pub fn seek(&mut self, topic: &str, offset: u64) -> Result<()> {
        if !self.assigned.iter().any(|t| t == topic) {
            return Err(Error::Log {
                message: format!("cannot seek unassigned topic: {}", topic),
                source: None,
            });
        }
        debug!("seek {} to offset {}", topic, offset);
        self.positions.insert(topic.to_string(), offset);
        Ok(())
    }

    pub fn position(&self, topic: &str) -> Option<u64> {
        self.positions.get(topic).copied()
    }

    /// Poll for up to `max_poll_records` records, waiting up to `timeout`
    /// for data to arrive. An empty result means the deadline passed.
    pub async fn poll(&mut self, timeout: Duration) -> Result<Vec<ConsumedRecord>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let batch = self.fetch()?;
            if !batch.is_empty() {
                self.manager.metrics().record_consume(batch.len() as u64);
                return Ok(batch);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            // Wake on any append, or when the deadline passes
            let _ = tokio::time::timeout_at(deadline, self.manager.notified()).await;
        }
    }

    fn fetch(&mut self) -> Result<Vec<ConsumedRecord>> {
        let mut batch = Vec::new();

        for name in &self.assigned {
            if batch.len() >= self.max_poll_records {
                break;
            }
            let topic = self.manager.topic(name)?;
            let position = *self.positions.get(name).unwrap_or(&0);
            if position >= topic.end_offset() {
                continue;
            }

            let mut new_position = position;
            for record in topic.read_from(position)? {
                if batch.len() >= self.max_poll_records {
                    break;
                }
                let record = record?;
                new_position = record.offset + 1;
                batch.push(ConsumedRecord {
                    topic: name.clone(),
                    record,
                });
            }
            self.positions.insert(name.clone(), new_position);
        }

        Ok(batch)
    }
}
