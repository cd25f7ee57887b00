use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::PathBuf;

use tempora_core::error::Result;

use super::segment::read_record;
use super::types::{Record, SEGMENT_HEADER_SIZE};

/// Streaming iterator over the records of one topic partition.
///
/// Walks segment files in base-offset order, skipping records below the
/// start offset. Offset gaps are expected on compacted topics.
pub struct RecordIterator {
    paths: Vec<PathBuf>,
    current_idx: usize,
    reader: Option<BufReader<File>>,
    start_offset: u64,
}

impl RecordIterator {
    pub(crate) fn new(paths: Vec<PathBuf>, start_offset: u64) -> Result<Self> {
        let mut iter = Self {
            paths,
            current_idx: 0,
            reader: None,
            start_offset,
        };
        iter.open_next_file()?;
        Ok(iter)
    }

    fn open_next_file(&mut self) -> Result<bool> {
        while self.current_idx < self.paths.len() {
            let path = &self.paths[self.current_idx];
            self.current_idx += 1;

            if let Ok(file) = File::open(path) {
                let mut reader = BufReader::new(file);
                if reader.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE as u64)).is_ok() {
                    self.reader = Some(reader);
                    return Ok(true);
                }
            }
        }
        self.reader = None;
        Ok(false)
    }
}

impl Iterator for RecordIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let reader = self.reader.as_mut()?;

            match read_record(reader) {
                Ok(record) => {
                    if record.offset < self.start_offset {
                        continue;
                    }
                    return Some(Ok(record));
                }
                Err(_) => {
                    // Read failure means end of this segment; move on
                    if let Err(e) = self.open_next_file() {
                        return Some(Err(e));
                    }
                    if self.reader.is_none() {
                        return None;
                    }
                }
            }
        }
    }
}
