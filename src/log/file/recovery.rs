//! Segment Recovery
//!
//! Validates a segment file after a crash and removes its torn tail.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::Result;

use super::segment::{SegmentEntry, HEADER_SIZE, MAX_RECORD_SIZE};

/// Handles segment recovery after a crash
pub struct SegmentRecovery;

/// Result of a recovery or verification pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of valid entries
    pub entries_recovered: u64,

    /// Number of complete but invalid entries found (CRC or offset mismatch)
    pub entries_corrupted: u64,

    /// Offset of the last valid entry
    pub last_offset: Option<u64>,

    /// Length of the valid prefix in bytes
    pub valid_len: u64,

    /// Bytes after the valid prefix
    pub trailing_bytes: u64,

    /// Whether the file was cut back to the valid prefix
    pub was_truncated: bool,
}

impl RecoveryResult {
    pub fn is_clean(&self) -> bool {
        self.entries_corrupted == 0 && self.trailing_bytes == 0
    }
}

impl SegmentRecovery {
    /// Recover a segment file in place.
    ///
    /// This will:
    /// 1. Read entries until the first torn, corrupted or out-of-sequence frame
    /// 2. Truncate the file to the valid prefix
    /// 3. Report what was kept and what was removed
    pub fn recover(path: &Path) -> Result<RecoveryResult> {
        let mut result = Self::scan(path)?;

        if result.trailing_bytes > 0 {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(result.valid_len)?;
            file.sync_all()?;
            result.was_truncated = true;

            tracing::warn!(
                path = %path.display(),
                removed_bytes = result.trailing_bytes,
                corrupted = result.entries_corrupted,
                last_offset = ?result.last_offset,
                "truncated segment to its last valid entry"
            );
        }

        Ok(result)
    }

    /// Verify integrity of a segment file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        Self::scan(path)
    }

    fn scan(path: &Path) -> Result<RecoveryResult> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut result = RecoveryResult::default();
        let mut expected_offset = 0u64;

        loop {
            let remaining = file_len - result.valid_len;
            if remaining < HEADER_SIZE as u64 {
                break;
            }

            let mut header = [0u8; HEADER_SIZE];
            reader.read_exact(&mut header)?;
            let (offset, crc, body_len) = SegmentEntry::parse_header(&header);

            let frame_len = HEADER_SIZE as u64 + body_len as u64;
            if body_len > MAX_RECORD_SIZE || frame_len > remaining {
                // Torn write at the tail
                break;
            }

            let mut body = vec![0u8; body_len as usize];
            reader.read_exact(&mut body)?;

            if offset != expected_offset || SegmentEntry::from_parts(offset, crc, &body).is_err() {
                result.entries_corrupted += 1;
                break;
            }

            result.entries_recovered += 1;
            result.last_offset = Some(offset);
            result.valid_len += frame_len;
            expected_offset = offset + 1;
        }

        result.trailing_bytes = file_len - result.valid_len;
        Ok(result)
    }
}
