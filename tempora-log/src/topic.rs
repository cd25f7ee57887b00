//! A single-partition topic: a directory of segment files plus an appender
//! task. Writers submit through a channel and are acknowledged once their
//! record is durable; batching happens in the appender (group commit).
//!
//! ```text
//! Producer 1 ──┐
//! Producer 2 ──┼──► Channel ──► Appender Task ──► Batch fsync ──► acks
//! Producer 3 ──┘                                     │
//!                                                    └──► Notify (consumers)
//! ```
//!
//! Topic configuration is persisted as `topic.json` beside the segments and
//! re-validated on every open: a topic whose stored cleanup policy or
//! partition count diverges from what the caller requires refuses to open.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::info;

use tempora_core::config::{LogConfig, TopicConfig};
use tempora_core::error::{Error, Result};
use tempora_core::metrics::Metrics;
use tempora_core::types::Timestamp;

use super::iterator::RecordIterator;
use super::segment::{
    create_segment, finalize_header, read_header_last_offset, record_size, write_record,
    recover_segment, SegmentFile,
};
use super::types::{Record, RecordKind, RecordMeta, SEGMENT_EXT};

const TOPIC_CONFIG_FILE: &str = "topic.json";

struct AppendRequest {
    kind: RecordKind,
    key: Option<Bytes>,
    value: Bytes,
    response: oneshot::Sender<Result<RecordMeta>>,
}

#[derive(Debug)]
pub struct Topic {
    name: String,
    dir: PathBuf,
    config: TopicConfig,
    current: Arc<RwLock<SegmentFile>>,
    next_offset: Arc<AtomicU64>,
    append_tx: mpsc::Sender<AppendRequest>,
}

impl Topic {
    /// Open or create the topic under `root`, enforcing `required` policy.
    pub(crate) async fn open(
        root: &Path,
        name: &str,
        required: TopicConfig,
        log_config: LogConfig,
        notify: Arc<Notify>,
        metrics: Metrics,
    ) -> Result<Arc<Self>> {
        if required.partitions != 1 {
            return Err(Error::Configuration {
                message: format!(
                    "topic {} requested {} partitions; the log is single-partition",
                    name, required.partitions
                ),
            });
        }

        let dir = root.join(name);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| Error::Io {
            message: format!("failed to create topic directory {:?}", dir),
            source: e,
        })?;

        let config = Self::load_or_store_config(&dir, name, required)?;

        let (segment, next_offset) = Self::open_or_create_segment(&dir, &log_config)?;
        let current = Arc::new(RwLock::new(segment));
        let (append_tx, append_rx) = mpsc::channel::<AppendRequest>(log_config.max_batch_size * 2);

        let next_offset = Arc::new(AtomicU64::new(next_offset));

        let bg_current = Arc::clone(&current);
        let bg_config = log_config.clone();
        let bg_dir = dir.clone();
        let bg_offset = Arc::clone(&next_offset);
        tokio::spawn(async move {
            Self::append_loop(append_rx, bg_current, bg_config, bg_dir, bg_offset, notify, metrics)
                .await;
        });

        Ok(Arc::new(Self {
            name: name.to_string(),
            dir,
            config,
            current,
            next_offset,
            append_tx,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &TopicConfig {
        &self.config
    }

    /// Offset the next appended record will receive.
    pub fn end_offset(&self) -> u64 {
        self.next_offset.load(Ordering::SeqCst)
    }

    /// Append one record; resolves with its assigned offset and timestamp
    /// once the record is durable. Offsets are assigned in the appender,
    /// so concurrent producers always land in offset order on disk.
    pub async fn append(
        &self,
        kind: RecordKind,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Result<RecordMeta> {
        let (tx, rx) = oneshot::channel();
        self.append_tx
            .send(AppendRequest {
                kind,
                key,
                value,
                response: tx,
            })
            .await
            .map_err(|_| Error::Log {
                message: format!("append channel closed for topic {}", self.name),
                source: None,
            })?;

        rx.await.map_err(|_| Error::Log {
            message: format!("append response channel closed for topic {}", self.name),
            source: None,
        })?
    }

    /// Streaming read of all records with offset >= `offset`.
    pub fn read_from(&self, offset: u64) -> Result<RecordIterator> {
        self.flush()?;

        let current_path = self.current.read().path.clone();
        let mut segments = self.list_segments()?;
        segments.sort_by_key(|s| s.0);

        // Skip sealed segments that end below the start offset
        let paths: Vec<PathBuf> = segments
            .into_iter()
            .filter(|(_, path)| {
                if offset == 0 || *path == current_path {
                    return true;
                }
                read_header_last_offset(path)
                    .map(|last| last >= offset)
                    .unwrap_or(true)
            })
            .map(|(_, p)| p)
            .collect();

        RecordIterator::new(paths, offset)
    }

    /// All sealed (non-active) segment paths, in base-offset order.
    pub fn sealed_segments(&self) -> Result<Vec<PathBuf>> {
        let current_path = self.current.read().path.clone();
        let mut segments = self.list_segments()?;
        segments.sort_by_key(|s| s.0);
        Ok(segments
            .into_iter()
            .filter(|(_, p)| *p != current_path)
            .map(|(_, p)| p)
            .collect())
    }

    pub fn flush(&self) -> Result<()> {
        use std::io::Write;
        let mut segment = self.current.write();
        segment.file.flush()?;
        segment.file.get_ref().sync_all()?;
        Ok(())
    }

    fn load_or_store_config(dir: &Path, name: &str, required: TopicConfig) -> Result<TopicConfig> {
        let config_path = dir.join(TOPIC_CONFIG_FILE);
        if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path)?;
            let stored: TopicConfig = serde_json::from_str(&raw).map_err(|e| Error::Configuration {
                message: format!("unreadable topic config {:?}: {}", config_path, e),
            })?;
            validate_policy(name, &required, &stored)?;
            Ok(stored)
        } else {
            let raw = serde_json::to_string_pretty(&required).map_err(|e| Error::Configuration {
                message: format!("unencodable topic config: {}", e),
            })?;
            std::fs::write(&config_path, raw)?;
            Ok(required)
        }
    }

    fn open_or_create_segment(dir: &Path, config: &LogConfig) -> Result<(SegmentFile, u64)> {
        let mut segments = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension() == Some(std::ffi::OsStr::new(SEGMENT_EXT)) {
                segments.push(path);
            }
        }
        segments.sort();

        if let Some(latest) = segments.last() {
            recover_segment(latest, config.buffer_size)
        } else {
            Ok((create_segment(dir, 0, config.buffer_size)?, 0))
        }
    }

    fn list_segments(&self) -> Result<Vec<(u64, PathBuf)>> {
        let mut segments = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension() == Some(std::ffi::OsStr::new(SEGMENT_EXT)) {
                if let Some(stem) = path.file_stem() {
                    if let Ok(base) = stem.to_string_lossy().parse::<u64>() {
                        segments.push((base, path));
                    }
                }
            }
        }
        Ok(segments)
    }

    async fn append_loop(
        mut rx: mpsc::Receiver<AppendRequest>,
        current: Arc<RwLock<SegmentFile>>,
        config: LogConfig,
        dir: PathBuf,
        next_offset: Arc<AtomicU64>,
        notify: Arc<Notify>,
        metrics: Metrics,
    ) {
        let delay = std::time::Duration::from_micros(config.group_commit_delay_us);

        loop {
            let first = match rx.recv().await {
                Some(req) => req,
                None => break,
            };

            let mut batch = vec![first];
            let deadline = tokio::time::Instant::now() + delay;

            while batch.len() < config.max_batch_size {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(req)) => batch.push(req),
                    _ => break,
                }
            }

            let mut metas = Vec::with_capacity(batch.len());
            let result = write_batch_sync(&current, &batch, &config, &dir, &next_offset, &mut metas);
            let total_bytes: u64 = batch.iter().map(|r| r.value.len() as u64).sum();
            let count = batch.len() as u64;
            let ok = result.is_ok();

            for (i, req) in batch.into_iter().enumerate() {
                let _ = req.response.send(if ok {
                    Ok(metas[i])
                } else {
                    Err(Error::Log {
                        message: "batch append failed".to_string(),
                        source: None,
                    })
                });
            }

            if ok {
                metrics.record_produce(count, total_bytes);
                notify.notify_waiters();
            }
        }
    }
}

fn validate_policy(name: &str, required: &TopicConfig, stored: &TopicConfig) -> Result<()> {
    let matches = stored.cleanup == required.cleanup
        && stored.partitions == required.partitions
        && stored.retention_ms == required.retention_ms;
    if !matches {
        return Err(Error::LogPolicyMismatch {
            topic: name.to_string(),
            expected: policy_summary(required),
            actual: policy_summary(stored),
        });
    }
    Ok(())
}

fn policy_summary(config: &TopicConfig) -> String {
    format!(
        "cleanup={} partitions={} retention_ms={}",
        config.cleanup, config.partitions, config.retention_ms
    )
}

fn write_batch_sync(
    current: &Arc<RwLock<SegmentFile>>,
    batch: &[AppendRequest],
    config: &LogConfig,
    dir: &Path,
    next_offset: &AtomicU64,
    metas: &mut Vec<RecordMeta>,
) -> Result<()> {
    use std::io::Write;

    for req in batch {
        let record = Record {
            offset: next_offset.fetch_add(1, Ordering::SeqCst),
            timestamp: Timestamp::now(),
            kind: req.kind,
            key: req.key.clone(),
            value: req.value.clone(),
        };

        let needs_rotation = {
            let segment = current.read();
            segment.size + record_size(&record) as u64 > config.segment_max_size
        };
        if needs_rotation {
            rotate_sync(current, dir, config, record.offset)?;
        }

        let mut segment = current.write();
        write_record(&mut segment.file, &record)?;
        segment.size += record_size(&record) as u64;
        segment.record_count += 1;
        segment.last_offset = record.offset;
        metas.push(RecordMeta {
            offset: record.offset,
            timestamp: record.timestamp,
        });
    }

    if config.sync_on_write {
        let mut segment = current.write();
        segment.file.flush()?;
        segment.file.get_ref().sync_all()?;
    }
    Ok(())
}

fn rotate_sync(
    current: &Arc<RwLock<SegmentFile>>,
    dir: &Path,
    config: &LogConfig,
    next_base: u64,
) -> Result<()> {
    let mut segment = current.write();
    finalize_header(&mut segment)?;

    *segment = create_segment(dir, next_base, config.buffer_size)?;

    info!("Rotated segment, new base offset: {}", next_base);
    Ok(())
}
