//! Log Module
//!
//! Access to a partitioned, append-only log: the durable backing store of
//! every materialized table.
//!
//! ## Contract
//! - `append` returns the record's `(partition, offset)`; offsets start at 0
//!   and grow by one per record within a partition
//! - the partition is chosen from the encoded key, so a key always lands in
//!   the same partition and per-key order is the partition's offset order
//! - a record without a value is a tombstone
//! - `subscribe` yields every record at or after the requested offsets, each
//!   partition in offset order, and keeps yielding new appends
//!
//! ## Implementations
//! - `MemoryLog`: in-process, nothing survives the process
//! - `FileLog`: one CRC-framed segment file per partition

mod file;
mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::ValueContainer;
use crate::error::Result;

pub use file::{
    FileLog, RecoveryResult, SegmentEntry, SegmentIterator, SegmentReader, SegmentRecord,
    SegmentRecovery,
};
pub use memory::MemoryLog;

/// Next offset to read, per partition
pub type PartitionOffsets = BTreeMap<u32, u64>;

/// Position of a record in a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogPosition {
    pub partition: u32,
    pub offset: u64,
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.partition, self.offset)
    }
}

/// Topic creation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u16,
}

/// A record read back from the log
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Encoded key
    pub key: Bytes,

    /// Encoded row; `None` for a tombstone
    pub value: Option<ValueContainer>,

    pub position: LogPosition,

    /// Append time (unix millis)
    pub timestamp: u64,
}

/// An open read cursor over one topic
pub trait Subscription: Send {
    /// Wait up to `timeout` for the next record
    fn poll(&mut self, timeout: Duration) -> Result<Option<LogRecord>>;
}

/// Log client used by tables and the write path
pub trait LogClient: Send + Sync {
    /// Create the topic if missing; idempotent for identical settings
    fn ensure_topic(&self, spec: &TopicSpec) -> Result<()>;

    fn partition_count(&self, topic: &str) -> Result<u32>;

    /// Append a record (or a tombstone when `value` is `None`)
    fn append(
        &self,
        topic: &str,
        key: &[u8],
        value: Option<&ValueContainer>,
        timeout: Duration,
    ) -> Result<LogPosition>;

    /// Read from the given offsets (missing partitions start at 0)
    fn subscribe(&self, topic: &str, from: &PartitionOffsets) -> Result<Box<dyn Subscription>>;

    /// Offset the next append will receive, per partition
    fn high_watermarks(&self, topic: &str) -> Result<PartitionOffsets>;

    /// Make buffered appends durable
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Stable partition for an encoded key
pub fn partition_for(key: &[u8], partitions: u32) -> u32 {
    crc32fast::hash(key) % partitions.max(1)
}

/// Check the parameters of a topic about to be created or re-ensured
pub(crate) fn check_topic_spec(existing: Option<&TopicSpec>, spec: &TopicSpec) -> Result<()> {
    use crate::error::LogTableError;

    if spec.partitions == 0 || spec.replication_factor == 0 {
        return Err(LogTableError::Config(format!(
            "topic {}: partitions and replication factor must be > 0",
            spec.name
        )));
    }
    match existing {
        Some(existing) if existing.partitions != spec.partitions => Err(LogTableError::Config(format!(
            "topic {} exists with {} partitions, requested {}",
            spec.name, existing.partitions, spec.partitions
        ))),
        _ => Ok(()),
    }
}

/// Current time in unix millis
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
