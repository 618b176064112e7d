//! Table checkpoints
//!
//! Snapshot of a table's rows and the offsets they reflect, so a restart
//! only replays the log from those offsets.
//!
//! ## File Format
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ Header (18 bytes)                                             │
//! │   Magic: "LTCK" (4) | Version: u16 (2) | BodyLen: u64 (8)     │
//! │   BodyCRC: u32 (4)                                            │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Body: bincode(type tag, next offsets, rows in key order)      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Written to a temporary file, fsynced, then renamed over the previous
//! checkpoint.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LogTableError, Result};
use crate::log::PartitionOffsets;
use crate::model::{Key, Row};

/// Magic bytes identifying a checkpoint file
const MAGIC: &[u8; 4] = b"LTCK";

/// Current checkpoint format version
const VERSION: u16 = 1;

/// Magic (4) + Version (2) + BodyLen (8) + BodyCRC (4)
const HEADER_SIZE: usize = 18;

/// Checkpointed table state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Layout fingerprint of the descriptor the rows were decoded with
    pub type_tag: String,

    /// Next offset to read per partition
    pub offsets: PartitionOffsets,

    pub rows: Vec<(Key, Row)>,
}

impl Checkpoint {
    /// Write the checkpoint atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let body = bincode::serialize(self)?;
        let crc = crc32fast::hash(&body);

        let tmp = path.with_extension("ckpt.tmp");
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(MAGIC)?;
            writer.write_all(&VERSION.to_le_bytes())?;
            writer.write_all(&(body.len() as u64).to_le_bytes())?;
            writer.write_all(&crc.to_le_bytes())?;
            writer.write_all(&body)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load a checkpoint; `Ok(None)` when none was written yet
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;

        if bytes.len() < HEADER_SIZE {
            return Err(LogTableError::Checkpoint(format!(
                "{}: file too short ({} bytes)",
                path.display(),
                bytes.len()
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(LogTableError::Checkpoint(format!("{}: bad magic", path.display())));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(LogTableError::Checkpoint(format!(
                "{}: unsupported version {}",
                path.display(),
                version
            )));
        }

        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[6..14]);
        let body_len = u64::from_le_bytes(len) as usize;
        let mut crc = [0u8; 4];
        crc.copy_from_slice(&bytes[14..18]);
        let stored_crc = u32::from_le_bytes(crc);

        let body = &bytes[HEADER_SIZE..];
        if body.len() != body_len {
            return Err(LogTableError::Checkpoint(format!(
                "{}: body is {} bytes, header says {}",
                path.display(),
                body.len(),
                body_len
            )));
        }
        if crc32fast::hash(body) != stored_crc {
            return Err(LogTableError::Checkpoint(format!("{}: CRC mismatch", path.display())));
        }

        let checkpoint = bincode::deserialize(body)
            .map_err(|e| LogTableError::Checkpoint(format!("{}: {}", path.display(), e)))?;
        Ok(Some(checkpoint))
    }
}
