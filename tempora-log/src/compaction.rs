//! # Log Compaction
//!
//! Compaction rewrites a topic's sealed segments so that at most the
//! latest record per key survives. Offsets are never reassigned: a
//! compacted partition has offset gaps, and consumers tolerate them.
//!
//! Tombstone records are data like any other: a tombstone supersedes the
//! document it evicts and itself survives compaction, which is exactly what
//! lets replaying consumers learn that the document is gone.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, info};

use tempora_core::config::{CleanupPolicy, LogConfig};
use tempora_core::error::{Error, Result};
use tempora_core::metrics::Metrics;
use tempora_core::utils::format_bytes;

use super::iterator::RecordIterator;
use super::segment::{create_segment_at, finalize_header, read_record, record_size, write_record};
use super::topic::Topic;

/// Result of a compaction run
#[derive(Debug, Clone)]
pub struct CompactionReport {
    pub segments: usize,
    pub records_retained: u64,
    pub records_dropped: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Compactor for keyed, compacted topics.
pub struct Compactor {
    log_config: LogConfig,
    metrics: Metrics,
}

impl Compactor {
    pub fn new(log_config: LogConfig, metrics: Metrics) -> Self {
        Self { log_config, metrics }
    }

    /// Compact the topic's sealed segments if their dirty ratio exceeds the
    /// topic's threshold. Returns `None` when nothing needed doing.
    ///
    /// Must run while the topic is quiescent relative to the segments being
    /// rewritten; the active segment is never touched.
    pub fn compact(&self, topic: &Topic) -> Result<Option<CompactionReport>> {
        if topic.config().cleanup != CleanupPolicy::Compact {
            return Err(Error::Compaction {
                reason: format!("topic {} is not a compacted topic", topic.name()),
            });
        }

        let sealed = topic.sealed_segments()?;
        if sealed.is_empty() {
            return Ok(None);
        }

        // Latest offset per key across the whole partition. Records in the
        // active segment participate so that a fresher record there
        // supersedes sealed copies.
        let mut latest: HashMap<Vec<u8>, u64> = HashMap::new();
        for record in topic.read_from(0)? {
            let record = record?;
            if let Some(key) = &record.key {
                latest.insert(key.to_vec(), record.offset);
            }
        }

        let (sealed_total, sealed_dirty) = self.count_dirty(&sealed, &latest)?;
        if sealed_total == 0 {
            return Ok(None);
        }
        let dirty_ratio = sealed_dirty as f64 / sealed_total as f64;
        if dirty_ratio < topic.config().min_cleanable_dirty_ratio {
            debug!(
                "dirty ratio {:.3} below threshold {:.3} for {}, skipping",
                dirty_ratio,
                topic.config().min_cleanable_dirty_ratio,
                topic.name()
            );
            return Ok(None);
        }

        info!(
            "Compacting {} sealed segments of {} (dirty ratio {:.3})",
            sealed.len(),
            topic.name(),
            dirty_ratio
        );

        let mut report = CompactionReport {
            segments: sealed.len(),
            records_retained: 0,
            records_dropped: 0,
            bytes_read: 0,
            bytes_written: 0,
        };

        for path in &sealed {
            self.rewrite_segment(path, &latest, &mut report)?;
        }

        self.metrics.record_compaction();
        info!(
            "Compaction of {} complete: {} retained, {} dropped, {} -> {}",
            topic.name(),
            report.records_retained,
            report.records_dropped,
            format_bytes(report.bytes_read),
            format_bytes(report.bytes_written)
        );
        Ok(Some(report))
    }

    fn count_dirty(
        &self,
        sealed: &[PathBuf],
        latest: &HashMap<Vec<u8>, u64>,
    ) -> Result<(u64, u64)> {
        let mut total = 0u64;
        let mut dirty = 0u64;
        for record in RecordIterator::new(sealed.to_vec(), 0)? {
            let record = record?;
            total += 1;
            if let Some(key) = &record.key {
                if latest.get(key.as_ref()) != Some(&record.offset) {
                    dirty += 1;
                }
            }
        }
        Ok((total, dirty))
    }

    /// Rewrite one segment in place, keeping only latest-per-key records.
    fn rewrite_segment(
        &self,
        path: &PathBuf,
        latest: &HashMap<Vec<u8>, u64>,
        report: &mut CompactionReport,
    ) -> Result<()> {
        let base_offset = path
            .file_stem()
            .and_then(|s| s.to_string_lossy().parse::<u64>().ok())
            .ok_or_else(|| Error::Compaction {
                reason: format!("segment file name not an offset: {:?}", path),
            })?;

        let tmp_path = path.with_extension("seg.compacting");
        let mut out = create_segment_at(&tmp_path, base_offset, self.log_config.buffer_size)?;

        let file = std::fs::File::open(path)?;
        let mut reader = std::io::BufReader::new(file);
        std::io::Seek::seek(
            &mut reader,
            std::io::SeekFrom::Start(super::types::SEGMENT_HEADER_SIZE as u64),
        )?;

        while let Ok(record) = read_record(&mut reader) {
            report.bytes_read += record_size(&record) as u64;
            let keep = match &record.key {
                Some(key) => latest.get(key.as_ref()) == Some(&record.offset),
                None => true,
            };
            if keep {
                write_record(&mut out.file, &record)?;
                out.size += record_size(&record) as u64;
                out.record_count += 1;
                out.last_offset = record.offset;
                report.bytes_written += record_size(&record) as u64;
                report.records_retained += 1;
            } else {
                report.records_dropped += 1;
            }
        }

        out.file.flush()?;
        finalize_header(&mut out)?;
        drop(out);

        std::fs::rename(&tmp_path, path).map_err(|e| Error::Io {
            message: format!("failed to swap compacted segment {:?}", path),
            source: e,
        })?;
        debug!("Rewrote segment {:?}", path);
        Ok(())
    }
}
