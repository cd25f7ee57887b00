use bytes::Bytes;
use tempora_core::error::{Error, Result};
use tempora_core::types::Timestamp;

pub const SEGMENT_MAGIC: &[u8; 8] = b"TEMPORAL";
pub const SEGMENT_VERSION: u32 = 1;
pub const SEGMENT_HEADER_SIZE: usize = 64;
pub const RECORD_HEADER_SIZE: usize = 32;
pub const SEGMENT_EXT: &str = "seg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Data = 1,

    // A compaction-surviving marker: the key's previous contents have been
    // evicted and consumers must treat the document as gone.
    Tombstone = 2,
}

impl TryFrom<u8> for RecordKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(RecordKind::Data),
            2 => Ok(RecordKind::Tombstone),
            _ => Err(Error::Log {
                message: format!("invalid record kind: {}", value),
                source: None,
            }),
        }
    }
}

/// A record as stored on, and read back from, a topic partition.
#[derive(Debug, Clone)]
pub struct Record {
    pub offset: u64,
    pub timestamp: Timestamp,
    pub kind: RecordKind,
    pub key: Option<Bytes>,
    pub value: Bytes,
}

/// Acknowledgement returned to a producer: where the record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMeta {
    pub offset: u64,
    pub timestamp: Timestamp,
}
