//! JSON codecs
//!
//! Both codecs write a JSON object keyed by property name, so readers do not
//! depend on property order. `TaggedJsonCodec` keeps each value's variant tag
//! (`{"Int": 5}`); `JsonCodec` writes plain JSON and relies on the descriptor
//! to restore types on decode. Struct and list members have no declared type,
//! so `JsonCodec` refuses members whose plain form reads back differently.

use std::collections::BTreeMap;

use serde_json::{Map, Number};

use crate::error::{LogTableError, Result};
use crate::model::{format_datetime, EntityTypeDescriptor, Key, Row, Value};

use super::{check_container, container, CodecKind, EntityCodec, ValueContainer};

// =============================================================================
// Tagged JSON
// =============================================================================

/// JSON codec whose values carry their type tags
#[derive(Debug, Clone, Copy, Default)]
pub struct TaggedJsonCodec;

impl EntityCodec for TaggedJsonCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::TaggedJson
    }

    fn encode(&self, entity: &EntityTypeDescriptor, row: &Row) -> Result<ValueContainer> {
        let row = entity.coerce_row(row.clone())?;
        for (property, value) in entity.properties().iter().zip(row.values()) {
            if let Some(f) = non_finite(value) {
                return Err(LogTableError::codec(
                    entity.name(),
                    &property.name,
                    format!("non-finite float {} has no JSON form", f),
                ));
            }
        }
        let object: BTreeMap<&str, &Value> = entity
            .properties()
            .iter()
            .map(|p| p.name.as_str())
            .zip(row.values())
            .collect();
        let payload = serde_json::to_vec(&object)
            .map_err(|e| LogTableError::codec(entity.name(), "<row>", e.to_string()))?;
        Ok(container(entity, CodecKind::TaggedJson, payload))
    }

    fn decode(&self, entity: &EntityTypeDescriptor, value: &ValueContainer) -> Result<Row> {
        check_container(entity, CodecKind::TaggedJson, value)?;
        let mut object: BTreeMap<String, Value> = serde_json::from_slice(&value.payload)
            .map_err(|e| LogTableError::codec(entity.name(), "<payload>", e.to_string()))?;
        let values = entity
            .properties()
            .iter()
            .map(|p| object.remove(&p.name).unwrap_or(Value::Null))
            .collect();
        entity.coerce_row(Row::new(values))
    }

    fn encode_key(&self, key: &Key) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(key)?)
    }

    fn decode_key(&self, entity: &EntityTypeDescriptor, bytes: &[u8]) -> Result<Key> {
        let key: Key = serde_json::from_slice(bytes)
            .map_err(|e| LogTableError::codec(entity.name(), "<key>", e.to_string()))?;
        entity.coerce_key(key.into_values())
    }
}

// =============================================================================
// Plain JSON
// =============================================================================

/// Plain structured-text codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl EntityCodec for JsonCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Json
    }

    fn encode(&self, entity: &EntityTypeDescriptor, row: &Row) -> Result<ValueContainer> {
        let row = entity.coerce_row(row.clone())?;
        let mut object = Map::new();
        for (property, value) in entity.properties().iter().zip(row.values()) {
            if let Value::Struct(_) | Value::List(_) = value {
                check_nested(value)
                    .map_err(|message| LogTableError::codec(entity.name(), &property.name, message))?;
            }
            let json = to_json(value)
                .map_err(|message| LogTableError::codec(entity.name(), &property.name, message))?;
            object.insert(property.name.clone(), json);
        }
        let payload = serde_json::to_vec(&serde_json::Value::Object(object))
            .map_err(|e| LogTableError::codec(entity.name(), "<row>", e.to_string()))?;
        Ok(container(entity, CodecKind::Json, payload))
    }

    fn decode(&self, entity: &EntityTypeDescriptor, value: &ValueContainer) -> Result<Row> {
        check_container(entity, CodecKind::Json, value)?;
        let parsed: serde_json::Value = serde_json::from_slice(&value.payload)
            .map_err(|e| LogTableError::codec(entity.name(), "<payload>", e.to_string()))?;
        let serde_json::Value::Object(mut object) = parsed else {
            return Err(LogTableError::codec(entity.name(), "<payload>", "expected a JSON object"));
        };
        let values = entity
            .properties()
            .iter()
            .map(|p| object.remove(&p.name).map(from_json).unwrap_or(Value::Null))
            .collect();
        entity.coerce_row(Row::new(values))
    }

    fn encode_key(&self, key: &Key) -> Result<Vec<u8>> {
        let parts = key
            .values()
            .iter()
            .map(to_json)
            .collect::<std::result::Result<Vec<_>, String>>()
            .map_err(LogTableError::Serialization)?;
        Ok(serde_json::to_vec(&parts)?)
    }

    fn decode_key(&self, entity: &EntityTypeDescriptor, bytes: &[u8]) -> Result<Key> {
        let parts: Vec<serde_json::Value> = serde_json::from_slice(bytes)
            .map_err(|e| LogTableError::codec(entity.name(), "<key>", e.to_string()))?;
        entity.coerce_key(parts.into_iter().map(from_json).collect())
    }
}

/// First NaN or infinity anywhere inside a value
fn non_finite(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) if !f.is_finite() => Some(*f),
        Value::Struct(fields) => fields.values().find_map(non_finite),
        Value::List(items) => items.iter().find_map(non_finite),
        _ => None,
    }
}

/// Members of a struct or list have no declared type to restore them from,
/// so only values whose plain JSON form reads back as the same variant are
/// accepted there
fn check_nested(value: &Value) -> std::result::Result<(), String> {
    let members: Vec<&Value> = match value {
        Value::Struct(fields) => fields.values().collect(),
        Value::List(items) => items.iter().collect(),
        _ => return Ok(()),
    };
    for member in members {
        match member {
            Value::Bytes(_) | Value::DateTime(_) | Value::UInt(_) => {
                return Err(format!(
                    "nested {} value has no unambiguous plain JSON form",
                    member.type_name()
                ));
            }
            Value::Struct(_) | Value::List(_) => check_nested(member)?,
            _ => {}
        }
    }
    Ok(())
}

/// Render a value as plain JSON
fn to_json(value: &Value) -> std::result::Result<serde_json::Value, String> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::UInt(u) => serde_json::Value::from(*u),
        Value::Float(f) => Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| format!("non-finite float {} has no JSON form", f))?,
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::Array(b.iter().map(|&x| serde_json::Value::from(x)).collect()),
        Value::DateTime(us) => serde_json::Value::String(
            format_datetime(*us).ok_or_else(|| format!("timestamp {}us is out of range", us))?,
        ),
        Value::Struct(fields) => {
            let mut object = Map::new();
            for (name, field) in fields {
                object.insert(name.clone(), to_json(field)?);
            }
            serde_json::Value::Object(object)
        }
        Value::List(items) => serde_json::Value::Array(
            items.iter().map(to_json).collect::<std::result::Result<_, _>>()?,
        ),
    })
}

/// Untyped conversion; the descriptor coerces the result afterwards
fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt(u)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Text(s),
        serde_json::Value::Array(items) => Value::List(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(object) => {
            Value::Struct(object.into_iter().map(|(k, v)| (k, from_json(v))).collect())
        }
    }
}
