//! Segment Reader
//!
//! Handles reading entries from a segment file, including one that is still
//! being appended to: an incomplete trailing frame is reported as "no entry
//! yet" and re-read on the next call.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{LogTableError, Result};

use super::segment::{SegmentEntry, HEADER_SIZE, MAX_RECORD_SIZE};

/// Reads entries from a segment file
pub struct SegmentReader {
    path: PathBuf,
    file: File,

    /// Byte position of the next frame
    position: u64,

    /// Entries below this offset are skipped
    start_offset: u64,
}

impl SegmentReader {
    /// Open a segment file for reading from the first entry
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_at(path, 0)
    }

    /// Open a segment file, skipping entries before `start_offset`
    pub fn open_at(path: &Path, start_offset: u64) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            position: 0,
            start_offset,
        })
    }

    /// Read the next entry, or `None` if no complete entry follows yet
    pub fn next_entry(&mut self) -> Result<Option<SegmentEntry>> {
        loop {
            let Some(entry) = self.read_frame()? else {
                return Ok(None);
            };
            if entry.offset >= self.start_offset {
                return Ok(Some(entry));
            }
        }
    }

    fn read_frame(&mut self) -> Result<Option<SegmentEntry>> {
        let file_len = self.file.metadata()?.len();
        if self.position + HEADER_SIZE as u64 > file_len {
            return Ok(None);
        }

        self.file.seek(SeekFrom::Start(self.position))?;
        let mut header = [0u8; HEADER_SIZE];
        self.file.read_exact(&mut header)?;
        let (offset, crc, body_len) = SegmentEntry::parse_header(&header);

        if body_len > MAX_RECORD_SIZE {
            return Err(LogTableError::SegmentCorruption(format!(
                "{}: frame at byte {} claims {} bytes",
                self.path.display(),
                self.position,
                body_len
            )));
        }

        let frame_len = HEADER_SIZE as u64 + body_len as u64;
        if self.position + frame_len > file_len {
            // Writer has not finished this frame yet
            return Ok(None);
        }

        let mut body = vec![0u8; body_len as usize];
        self.file.read_exact(&mut body)?;
        let entry = SegmentEntry::from_parts(offset, crc, &body)?;

        self.position += frame_len;
        Ok(Some(entry))
    }

    /// Byte position of the next frame
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Iterate over all complete entries currently in the file
    pub fn entries(self) -> SegmentIterator {
        SegmentIterator {
            reader: self,
            done: false,
        }
    }
}

/// Iterator over segment entries; stops after the first error
pub struct SegmentIterator {
    reader: SegmentReader,
    done: bool,
}

impl Iterator for SegmentIterator {
    type Item = Result<SegmentEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
