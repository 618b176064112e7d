//! Table contents and apply rules
//!
//! Pure state; locking, events and statistics live in the table itself.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::feed::ChangeKind;
use crate::log::{LogPosition, PartitionOffsets};
use crate::model::{Key, Row};

/// Result of applying one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Offset already applied
    Duplicate,

    /// A newer record for the key was already applied locally
    Superseded,

    /// Tombstone for a key that is not present
    Unchanged,

    Changed(ChangeKind),
}

impl ApplyOutcome {
    pub fn change(self) -> Option<ChangeKind> {
        match self {
            ApplyOutcome::Changed(kind) => Some(kind),
            _ => None,
        }
    }
}

/// Rows plus the offsets they reflect
#[derive(Debug, Default)]
pub(crate) struct TableData {
    rows: BTreeMap<Key, Arc<Row>>,

    /// Last ingested offset per partition
    applied: BTreeMap<u32, u64>,

    /// Keys written through locally ahead of ingestion, with the position
    /// of the local write
    ahead: HashMap<Key, LogPosition>,
}

impl TableData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from checkpointed rows and next-to-read offsets
    pub fn restore(rows: Vec<(Key, Row)>, next_offsets: &PartitionOffsets) -> Self {
        Self {
            rows: rows.into_iter().map(|(key, row)| (key, Arc::new(row))).collect(),
            applied: next_offsets
                .iter()
                .filter(|(_, next)| **next > 0)
                .map(|(p, next)| (*p, next - 1))
                .collect(),
            ahead: HashMap::new(),
        }
    }

    /// Apply a record read from the log.
    ///
    /// Offsets at or below the partition's applied offset are ignored, which
    /// makes re-delivery after a reconnect harmless.
    pub fn apply(&mut self, key: Key, row: Option<Row>, position: LogPosition) -> ApplyOutcome {
        if self.is_applied(position) {
            return ApplyOutcome::Duplicate;
        }
        self.applied.insert(position.partition, position.offset);

        if let Some(local) = self.ahead.get(&key).copied() {
            if local.partition == position.partition && local.offset >= position.offset {
                if local.offset == position.offset {
                    self.ahead.remove(&key);
                    return ApplyOutcome::Duplicate;
                }
                return ApplyOutcome::Superseded;
            }
            self.ahead.remove(&key);
        }

        self.mutate(key, row)
    }

    /// Apply a record the local writer has just appended, before ingestion
    /// reaches it
    pub fn apply_local(&mut self, key: Key, row: Option<Row>, position: LogPosition) -> ApplyOutcome {
        if self.is_applied(position) {
            return ApplyOutcome::Duplicate;
        }
        if let Some(local) = self.ahead.get(&key) {
            if local.partition == position.partition && local.offset >= position.offset {
                return ApplyOutcome::Superseded;
            }
        }

        self.ahead.insert(key.clone(), position);
        self.mutate(key, row)
    }

    /// Advance past a record without touching any row
    pub fn skip(&mut self, position: LogPosition) {
        if !self.is_applied(position) {
            self.applied.insert(position.partition, position.offset);
        }
    }

    fn is_applied(&self, position: LogPosition) -> bool {
        self.applied
            .get(&position.partition)
            .is_some_and(|applied| position.offset <= *applied)
    }

    fn mutate(&mut self, key: Key, row: Option<Row>) -> ApplyOutcome {
        match row {
            Some(row) => match self.rows.insert(key, Arc::new(row)) {
                Some(_) => ApplyOutcome::Changed(ChangeKind::Updated),
                None => ApplyOutcome::Changed(ChangeKind::Added),
            },
            None => match self.rows.remove(&key) {
                Some(_) => ApplyOutcome::Changed(ChangeKind::Removed),
                None => ApplyOutcome::Unchanged,
            },
        }
    }

    pub fn get(&self, key: &Key) -> Option<&Arc<Row>> {
        self.rows.get(key)
    }

    pub fn rows(&self) -> &BTreeMap<Key, Arc<Row>> {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Next offset to read per partition
    pub fn next_offsets(&self) -> PartitionOffsets {
        self.applied.iter().map(|(p, applied)| (*p, applied + 1)).collect()
    }
}
