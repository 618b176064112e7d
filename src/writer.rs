//! Write Coordinator
//!
//! Turns a batch of inserts, updates and deletes into log appends.
//!
//! ## Phases
//! 1. Prepare: validate and coerce every row, assign generated keys, encode.
//!    Any failure fails the whole batch before anything is appended.
//! 2. Append: one record per operation, in batch order. Failures are
//!    collected and reported together; rows appended before or after a
//!    failure stay appended.
//!
//! Appended rows become visible once the table ingests them, or right away
//! when read-your-writes is enabled.

use std::sync::Arc;
use std::time::Duration;

use crate::codec::ValueContainer;
use crate::error::{FailedRow, LogTableError, Result};
use crate::log::{LogClient, LogPosition};
use crate::model::{Key, Row, Value};
use crate::table::MaterializedTable;

// =============================================================================
// Batches
// =============================================================================

/// One operation of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert { entity: String, row: Row },

    /// Replaces the whole row stored under the row's key (or adds it)
    Update { entity: String, row: Row },

    /// Key values in key-property order
    Delete { entity: String, key: Key },
}

impl WriteOp {
    pub fn entity(&self) -> &str {
        match self {
            WriteOp::Insert { entity, .. }
            | WriteOp::Update { entity, .. }
            | WriteOp::Delete { entity, .. } => entity,
        }
    }
}

/// Ordered set of operations saved together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, entity: impl Into<String>, row: Row) -> Self {
        self.ops.push(WriteOp::Insert {
            entity: entity.into(),
            row,
        });
        self
    }

    pub fn update(mut self, entity: impl Into<String>, row: Row) -> Self {
        self.ops.push(WriteOp::Update {
            entity: entity.into(),
            row,
        });
        self
    }

    pub fn delete(mut self, entity: impl Into<String>, key: Key) -> Self {
        self.ops.push(WriteOp::Delete {
            entity: entity.into(),
            key,
        });
        self
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// A key value assigned by the store during `save`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKey {
    /// Position of the operation inside the batch
    pub index: usize,
    pub entity: String,
    pub property: String,
    pub value: i64,
}

/// Outcome of a fully appended batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveResult {
    /// Log position of each operation, in batch order
    pub positions: Vec<LogPosition>,

    /// Key of each operation, in batch order
    pub keys: Vec<Key>,

    pub generated: Vec<GeneratedKey>,
}

/// Resolves entity names to their (lazily opened) tables
pub trait TableResolver {
    fn resolve(&self, entity: &str) -> Result<Arc<MaterializedTable>>;
}

// =============================================================================
// Coordinator
// =============================================================================

/// A prepared operation, ready to append
struct PreparedRecord {
    index: usize,
    table: Arc<MaterializedTable>,
    key: Key,
    key_bytes: Vec<u8>,

    /// `None` for a delete
    row: Option<Row>,
    value: Option<ValueContainer>,
}

/// Applies write batches to the log
pub struct WriteCoordinator {
    log: Arc<dyn LogClient>,
    append_timeout: Duration,
    read_your_writes: bool,
}

impl WriteCoordinator {
    pub fn new(log: Arc<dyn LogClient>, append_timeout: Duration, read_your_writes: bool) -> Self {
        Self {
            log,
            append_timeout,
            read_your_writes,
        }
    }

    /// Save a batch.
    ///
    /// Returns `UpdateFailed` listing every row that could not be appended;
    /// other rows of the batch are not rolled back.
    pub fn save(&self, resolver: &dyn TableResolver, batch: &WriteBatch) -> Result<SaveResult> {
        let mut result = SaveResult::default();

        // Phase 1: prepare everything before the first append
        let mut prepared = Vec::with_capacity(batch.len());
        for (index, op) in batch.ops().iter().enumerate() {
            prepared.push(self.prepare(resolver, index, op, &mut result)?);
        }

        // Phase 2: append
        let mut failures = Vec::new();
        for record in prepared {
            let appended = self.log.append(
                record.table.topic(),
                &record.key_bytes,
                record.value.as_ref(),
                self.append_timeout,
            );
            match appended {
                Ok(position) => {
                    if self.read_your_writes {
                        record
                            .table
                            .apply_local(record.key.clone(), record.row, position);
                    }
                    result.positions.push(position);
                    result.keys.push(record.key);
                }
                Err(e) => {
                    failures.push(FailedRow {
                        index: record.index,
                        entity: record.table.name().to_string(),
                        key: Some(record.key),
                        cause: e.to_string(),
                    });
                }
            }
        }

        if !failures.is_empty() {
            tracing::warn!(
                failed = failures.len(),
                appended = result.positions.len(),
                "batch partially appended"
            );
            return Err(LogTableError::UpdateFailed {
                appended: result.positions.len(),
                failures,
            });
        }

        tracing::debug!(operations = batch.len(), "batch appended");
        Ok(result)
    }

    fn prepare(
        &self,
        resolver: &dyn TableResolver,
        index: usize,
        op: &WriteOp,
        result: &mut SaveResult,
    ) -> Result<PreparedRecord> {
        let table = resolver.resolve(op.entity())?;
        // Generators are seeded during hydration
        table.ensure_ready()?;

        let descriptor = Arc::clone(table.descriptor());
        let codec = Arc::clone(table.codec());

        let (key, row) = match op {
            WriteOp::Insert { row, .. } | WriteOp::Update { row, .. } => {
                let mut row = descriptor.coerce_row(row.clone())?;
                let generate = matches!(op, WriteOp::Insert { .. });
                if let Some(value) = Self::assign_generated(&table, &mut row, generate)? {
                    let property = descriptor
                        .generated_property()
                        .and_then(|i| descriptor.property(i))
                        .map(|p| p.name.clone())
                        .unwrap_or_default();
                    result.generated.push(GeneratedKey {
                        index,
                        entity: descriptor.name().to_string(),
                        property,
                        value,
                    });
                }
                (descriptor.key_of(&row)?, Some(row))
            }
            WriteOp::Delete { key, .. } => (descriptor.coerce_key(key.values().to_vec())?, None),
        };

        let value = row
            .as_ref()
            .map(|row| codec.encode(&descriptor, row))
            .transpose()?;
        let key_bytes = codec.encode_key(&key)?;

        Ok(PreparedRecord {
            index,
            table,
            key,
            key_bytes,
            row,
            value,
        })
    }

    /// Fill an unset generated key (`Null` or `0`) on insert, or record an
    /// explicit one with the generator. Returns the assigned value.
    fn assign_generated(table: &MaterializedTable, row: &mut Row, generate: bool) -> Result<Option<i64>> {
        let descriptor = table.descriptor();
        let Some(index) = descriptor.generated_property() else {
            return Ok(None);
        };
        let Some(generator) = table.generator() else {
            return Ok(None);
        };

        let current = row.get(index).cloned().unwrap_or(Value::Null);
        let unset = current.is_null() || current.as_i64() == Some(0);
        if !unset {
            if let Some(explicit) = current.as_i64() {
                generator.bump(explicit);
            }
            return Ok(None);
        }
        if !generate {
            // Updates must name the row they replace
            return Ok(None);
        }

        let value = generator.next()?;
        let property = &descriptor.properties()[index];
        let coerced = property
            .property_type
            .coerce(Value::Int(value))
            .map_err(|message| LogTableError::codec(descriptor.name(), &property.name, message))?;
        row.set(index, coerced);
        Ok(Some(value))
    }
}
