//! Segment Writer
//!
//! Handles appending entries to one partition's segment file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::SegmentSyncStrategy;
use crate::error::Result;

use super::recovery::{RecoveryResult, SegmentRecovery};
use super::segment::{SegmentEntry, SegmentRecord};

/// Appends entries to a segment file
pub struct SegmentWriter {
    path: PathBuf,

    /// Opened in append mode; every frame is written with one `write_all`
    file: File,

    /// Offset the next entry receives
    next_offset: u64,

    /// Bytes of complete entries; the file is cut back here after a failed write
    valid_len: u64,

    sync_strategy: SegmentSyncStrategy,

    /// Entries written since the last fsync
    unsynced: usize,
}

impl SegmentWriter {
    /// Open or create a segment file.
    ///
    /// Existing files are recovered first (torn tail removed) so appends
    /// continue right after the last valid entry.
    pub fn open(path: &Path, sync_strategy: SegmentSyncStrategy) -> Result<(Self, RecoveryResult)> {
        let recovery = if path.exists() {
            SegmentRecovery::recover(path)?
        } else {
            RecoveryResult::default()
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let writer = Self {
            path: path.to_path_buf(),
            file,
            next_offset: recovery.last_offset.map(|o| o + 1).unwrap_or(0),
            valid_len: recovery.valid_len,
            sync_strategy,
            unsynced: 0,
        };
        Ok((writer, recovery))
    }

    /// Append a record, returning its offset
    pub fn append(&mut self, record: SegmentRecord) -> Result<u64> {
        let offset = self.next_offset;
        let frame = SegmentEntry::new(offset, record).serialize()?;

        if let Err(e) = self.file.write_all(&frame) {
            // Cut off whatever part of the frame made it to the file
            if let Err(truncate_err) = self.file.set_len(self.valid_len) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "failed to remove partial segment entry"
                );
            }
            return Err(e.into());
        }

        self.valid_len += frame.len() as u64;
        self.next_offset += 1;
        self.unsynced += 1;

        let sync_due = match self.sync_strategy {
            SegmentSyncStrategy::EveryWrite => true,
            SegmentSyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if sync_due {
            self.sync()?;
        }

        Ok(offset)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        if self.unsynced > 0 {
            self.file.sync_data()?;
            self.unsynced = 0;
        }
        Ok(())
    }

    /// Offset the next append will receive
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
