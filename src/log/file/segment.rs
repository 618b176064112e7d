//! Segment entry definitions
//!
//! Defines the structure of individual records in a partition segment.

use serde::{Deserialize, Serialize};

use crate::codec::ValueContainer;
use crate::error::{LogTableError, Result};
use crate::log::{LogPosition, LogRecord};

/// Header size: Offset (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Largest body accepted when reading; anything bigger is treated as corruption
pub const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

/// Payload of a segment entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRecord {
    /// Encoded key
    pub key: Vec<u8>,

    /// Encoded row; `None` for a tombstone
    pub value: Option<ValueContainer>,

    /// Append time (unix millis)
    pub timestamp: u64,
}

/// A single framed entry in a segment file
#[derive(Debug, Clone)]
pub struct SegmentEntry {
    /// Partition offset - strictly increasing by one per entry
    pub offset: u64,

    pub record: SegmentRecord,
}

impl SegmentEntry {
    pub fn new(offset: u64, record: SegmentRecord) -> Self {
        Self { offset, record }
    }

    /// Serialize to the on-disk frame: header followed by bincode body
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(&self.record)?;
        if body.len() > MAX_RECORD_SIZE as usize {
            return Err(LogTableError::Serialization(format!(
                "record of {} bytes exceeds the {} byte limit",
                body.len(),
                MAX_RECORD_SIZE
            )));
        }
        let crc = Self::compute_crc(self.offset, &body);

        let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
        frame.extend_from_slice(&self.offset.to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Split a frame header into (offset, crc, body_len)
    pub fn parse_header(header: &[u8; HEADER_SIZE]) -> (u64, u32, u32) {
        let mut offset = [0u8; 8];
        let mut crc = [0u8; 4];
        let mut len = [0u8; 4];
        offset.copy_from_slice(&header[0..8]);
        crc.copy_from_slice(&header[8..12]);
        len.copy_from_slice(&header[12..16]);
        (
            u64::from_le_bytes(offset),
            u32::from_le_bytes(crc),
            u32::from_le_bytes(len),
        )
    }

    /// Rebuild an entry from its header fields and body, verifying the CRC
    pub fn from_parts(offset: u64, crc: u32, body: &[u8]) -> Result<Self> {
        let actual = Self::compute_crc(offset, body);
        if actual != crc {
            return Err(LogTableError::SegmentCorruption(format!(
                "CRC mismatch at offset {}: stored {:08x}, computed {:08x}",
                offset, crc, actual
            )));
        }
        let record = bincode::deserialize(body).map_err(|e| {
            LogTableError::SegmentCorruption(format!("undecodable record at offset {}: {}", offset, e))
        })?;
        Ok(Self { offset, record })
    }

    /// CRC covers the offset as well, so a damaged header is detected too
    fn compute_crc(offset: u64, body: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&offset.to_le_bytes());
        hasher.update(body);
        hasher.finalize()
    }

    pub fn into_log_record(self, partition: u32) -> LogRecord {
        LogRecord {
            key: self.record.key.into(),
            value: self.record.value,
            position: LogPosition {
                partition,
                offset: self.offset,
            },
            timestamp: self.record.timestamp,
        }
    }
}
