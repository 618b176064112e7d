//! Binary codec
//!
//! Positional bincode encoding: the payload is the row's value list in
//! descriptor order. Compact, but readers must agree on property order.

use crate::error::{LogTableError, Result};
use crate::model::{EntityTypeDescriptor, Key, Row, Value};

use super::{check_container, container, CodecKind, EntityCodec, ValueContainer};

/// Positional bincode codec
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl EntityCodec for BinaryCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Binary
    }

    fn encode(&self, entity: &EntityTypeDescriptor, row: &Row) -> Result<ValueContainer> {
        let row = entity.coerce_row(row.clone())?;
        let payload = bincode::serialize(row.values())
            .map_err(|e| LogTableError::codec(entity.name(), "<row>", e.to_string()))?;
        Ok(container(entity, CodecKind::Binary, payload))
    }

    fn decode(&self, entity: &EntityTypeDescriptor, value: &ValueContainer) -> Result<Row> {
        check_container(entity, CodecKind::Binary, value)?;
        let values: Vec<Value> = bincode::deserialize(&value.payload)
            .map_err(|e| LogTableError::codec(entity.name(), "<payload>", e.to_string()))?;
        entity.coerce_row(Row::new(values))
    }

    fn encode_key(&self, key: &Key) -> Result<Vec<u8>> {
        Ok(bincode::serialize(key)?)
    }

    fn decode_key(&self, entity: &EntityTypeDescriptor, bytes: &[u8]) -> Result<Key> {
        let key: Key = bincode::deserialize(bytes)
            .map_err(|e| LogTableError::codec(entity.name(), "<key>", e.to_string()))?;
        entity.coerce_key(key.into_values())
    }
}
