//! # Configuration Management
//!
//! Handles all configuration for TemporaDB components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub log: LogConfig,
    pub indexer: IndexerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            indexer: IndexerConfig::default(),
        }
    }
}

/// Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub data_dir: PathBuf,
    pub tx_topic: String,
    pub doc_topic: String,
    pub segment_max_size: u64,
    pub sync_on_write: bool,
    pub buffer_size: usize,
    pub max_batch_size: usize,
    pub group_commit_delay_us: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/log"),
            tx_topic: "tempora-tx-log".to_string(),
            doc_topic: "tempora-doc-store".to_string(),
            segment_max_size: 256 * 1024 * 1024, // 256MB
            sync_on_write: true,
            buffer_size: 64 * 1024, // 64KB
            max_batch_size: 512,
            group_commit_delay_us: 2000,
        }
    }
}

/// Retention behavior of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CleanupPolicy {
    /// Records are only removed by retention expiry.
    Delete,
    /// At most the latest record per key is retained.
    Compact,
}

impl fmt::Display for CleanupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupPolicy::Delete => write!(f, "delete"),
            CleanupPolicy::Compact => write!(f, "compact"),
        }
    }
}

/// Per-topic configuration, persisted beside the topic's segments and
/// validated whenever the topic is opened or subscribed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub partitions: u32,
    pub cleanup: CleanupPolicy,
    /// -1 means infinite retention.
    pub retention_ms: i64,
    /// Fraction of superseded records that triggers compaction.
    pub min_cleanable_dirty_ratio: f64,
}

impl TopicConfig {
    /// Required policy for the transaction topic: ordered, never compacted,
    /// retained forever.
    pub fn tx_log() -> Self {
        Self {
            partitions: 1,
            cleanup: CleanupPolicy::Delete,
            retention_ms: -1,
            min_cleanable_dirty_ratio: 1.0,
        }
    }

    /// Required policy for the document topic: compacted by content hash.
    pub fn doc_store() -> Self {
        Self {
            partitions: 1,
            cleanup: CleanupPolicy::Compact,
            retention_ms: -1,
            min_cleanable_dirty_ratio: 0.1,
        }
    }
}

/// Indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub poll_timeout: Duration,
    pub max_poll_records: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            max_poll_records: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_topic_policies() {
        let tx = TopicConfig::tx_log();
        assert_eq!(tx.cleanup, CleanupPolicy::Delete);
        assert_eq!(tx.retention_ms, -1);
        assert_eq!(tx.partitions, 1);

        let doc = TopicConfig::doc_store();
        assert_eq!(doc.cleanup, CleanupPolicy::Compact);
        assert!(doc.min_cleanable_dirty_ratio < 1.0);
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.log.tx_topic, config.log.tx_topic);
    }
}
