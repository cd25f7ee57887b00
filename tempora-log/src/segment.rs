use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use tracing::info;

use tempora_core::error::{Error, Result};
use tempora_core::types::Timestamp;

use super::types::*;

/// In-memory struct of an open segment file.
pub(crate) struct SegmentFile {
    pub path: PathBuf,
    pub file: BufWriter<File>,
    pub size: u64,
    pub record_count: u64,
    pub base_offset: u64,
    pub last_offset: u64,
}

impl std::fmt::Debug for SegmentFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentFile")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("record_count", &self.record_count)
            .field("base_offset", &self.base_offset)
            .field("last_offset", &self.last_offset)
            .finish()
    }
}

pub(crate) fn segment_path(dir: &Path, base_offset: u64) -> PathBuf {
    dir.join(format!("{:020}.{}", base_offset, SEGMENT_EXT))
}

pub(crate) fn create_segment(dir: &Path, base_offset: u64, buffer_size: usize) -> Result<SegmentFile> {
    create_segment_at(&segment_path(dir, base_offset), base_offset, buffer_size)
}

pub(crate) fn create_segment_at(path: &Path, base_offset: u64, buffer_size: usize) -> Result<SegmentFile> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .read(true)
        .truncate(true)
        .open(path)?;

    let mut writer = BufWriter::with_capacity(buffer_size, file);

    writer.write_all(SEGMENT_MAGIC)?;
    writer.write_u32::<LittleEndian>(SEGMENT_VERSION)?;
    writer.write_u64::<LittleEndian>(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs(),
    )?;
    writer.write_u64::<LittleEndian>(base_offset)?; // Base offset
    writer.write_u64::<LittleEndian>(base_offset)?; // Last offset (updated on finalize)
    writer.write_u64::<LittleEndian>(0)?; // Record count
    writer.write_u32::<LittleEndian>(0)?; // Checksum placeholder
    writer.write_all(&[0u8; 16])?; // Reserved
    writer.flush()?;

    Ok(SegmentFile {
        path: path.to_path_buf(),
        file: writer,
        size: SEGMENT_HEADER_SIZE as u64,
        record_count: 0,
        base_offset,
        last_offset: base_offset,
    })
}

/// Open the newest segment for appending and report the next free offset.
pub(crate) fn recover_segment(path: &Path, buffer_size: usize) -> Result<(SegmentFile, u64)> {
    info!("Recovering from segment file: {:?}", path);

    let file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?; // Validate header
    if &magic != SEGMENT_MAGIC {
        return Err(Error::Log {
            message: format!("invalid segment magic in {:?}", path),
            source: None,
        });
    }

    let version = reader.read_u32::<LittleEndian>()?;
    if version != SEGMENT_VERSION {
        return Err(Error::Log {
            message: format!("unsupported segment version: {}", version),
            source: None,
        });
    }

    let _created_at = reader.read_u64::<LittleEndian>()?;
    let base_offset = reader.read_u64::<LittleEndian>()?;
    let mut last_offset = reader.read_u64::<LittleEndian>()?;
    let mut record_count = reader.read_u64::<LittleEndian>()?;
    let _checksum = reader.read_u32::<LittleEndian>()?;
    reader.read_exact(&mut [0u8; 16])?;

    // The header only reflects reality after a clean finalize; replay the
    // records to find the true tail.
    let mut records_seen = 0u64;
    while let Ok(record) = read_record(&mut reader) {
        last_offset = record.offset;
        records_seen += 1;
    }
    if records_seen > record_count {
        record_count = records_seen;
    }

    let file_size = reader.seek(SeekFrom::End(0))?;
    let mut file = reader.into_inner();
    file.seek(SeekFrom::End(0))?;
    let writer = BufWriter::with_capacity(buffer_size, file);

    let next_offset = if records_seen == 0 { base_offset } else { last_offset + 1 };

    Ok((
        SegmentFile {
            path: path.to_path_buf(),
            file: writer,
            size: file_size,
            record_count,
            base_offset,
            last_offset,
        },
        next_offset,
    ))
}

/// Update header with final offset/count before rotation.
pub(crate) fn finalize_header(segment: &mut SegmentFile) -> Result<()> {
    segment.file.flush()?;
    let file = segment.file.get_mut();

    file.seek(SeekFrom::Start(28))?; // Offset of last_offset
    file.write_u64::<LittleEndian>(segment.last_offset)?;
    file.write_u64::<LittleEndian>(segment.record_count)?;
    file.sync_all()?;
    file.seek(SeekFrom::End(0))?;

    Ok(())
}

pub(crate) fn read_header_last_offset(path: &Path) -> Result<u64> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(28))?;
    Ok(file.read_u64::<LittleEndian>()?)
}

pub(crate) fn write_record(writer: &mut impl Write, record: &Record) -> Result<()> {
    let key_len = record.key.as_ref().map(|k| k.len()).unwrap_or(0);
    if key_len > u16::MAX as usize {
        return Err(Error::Log {
            message: format!("record key too large: {} bytes", key_len),
            source: None,
        });
    }

    writer.write_u32::<LittleEndian>(record.value.len() as u32)?;
    writer.write_u64::<LittleEndian>(record.offset)?;
    writer.write_u64::<LittleEndian>(record.timestamp.millis() as u64)?;
    writer.write_u8(record.kind as u8)?;
    writer.write_u8(0)?; // Flags
    writer.write_u32::<LittleEndian>(crc32fast::hash(&record.value))?;
    writer.write_u16::<LittleEndian>(key_len as u16)?;
    writer.write_all(&[0u8; 4])?; // Reserved

    if let Some(key) = &record.key {
        writer.write_all(key)?;
    }
    writer.write_all(&record.value)?;

    Ok(())
}

pub(crate) fn read_record(reader: &mut impl Read) -> Result<Record> {
    let value_len = match reader.read_u32::<LittleEndian>() {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::Log {
                message: "EOF".to_string(),
                source: Some(Box::new(e)),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let offset = reader.read_u64::<LittleEndian>()?;
    let timestamp = reader.read_u64::<LittleEndian>()?;
    let kind = RecordKind::try_from(reader.read_u8()?)?;
    let _flags = reader.read_u8()?;
    let crc = reader.read_u32::<LittleEndian>()?;
    let key_len = reader.read_u16::<LittleEndian>()? as usize;
    reader.read_exact(&mut [0u8; 4])?;

    let key = if key_len > 0 {
        let mut key = vec![0u8; key_len];
        reader.read_exact(&mut key)?;
        Some(Bytes::from(key))
    } else {
        None
    };

    let mut value = vec![0u8; value_len];
    reader.read_exact(&mut value)?;

    if crc32fast::hash(&value) != crc {
        return Err(Error::Log {
            message: format!("CRC mismatch at offset {}", offset),
            source: None,
        });
    }

    Ok(Record {
        offset,
        timestamp: Timestamp::from_millis(timestamp as i64),
        kind,
        key,
        value: Bytes::from(value),
    })
}

pub(crate) fn record_size(record: &Record) -> usize {
    RECORD_HEADER_SIZE
        + record.key.as_ref().map(|k| k.len()).unwrap_or(0)
        + record.value.len()
}
