//! Entity type descriptors
//!
//! Static schema of one entity type: ordered properties, key positions and
//! the optional store-generated integer key. A descriptor doubles as the
//! per-property coercion table used by codecs and the write path, so value
//! conversion is driven by the declared schema rather than by inspecting
//! values at runtime.

use serde::{Deserialize, Serialize};

use crate::error::{LogTableError, Result};

use super::value::parse_datetime;
use super::{Key, Row, Value};

// =============================================================================
// Property Types
// =============================================================================

/// Declared semantic type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    String,
    Bytes,
    DateTime,
    Struct,
    List,
}

impl PropertyType {
    pub fn is_integer(self) -> bool {
        self.signed_bounds().is_some() || self.unsigned_max().is_some()
    }

    /// Largest value a store-generated key of this type may take
    pub fn generator_limit(self) -> Option<i64> {
        match self {
            PropertyType::UInt64 => Some(i64::MAX),
            _ => self
                .signed_bounds()
                .map(|(_, max)| max)
                .or_else(|| self.unsigned_max().map(|max| max as i64)),
        }
    }

    fn signed_bounds(self) -> Option<(i64, i64)> {
        match self {
            PropertyType::Int8 => Some((i8::MIN as i64, i8::MAX as i64)),
            PropertyType::Int16 => Some((i16::MIN as i64, i16::MAX as i64)),
            PropertyType::Int32 => Some((i32::MIN as i64, i32::MAX as i64)),
            PropertyType::Int64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    fn unsigned_max(self) -> Option<u64> {
        match self {
            PropertyType::UInt8 => Some(u8::MAX as u64),
            PropertyType::UInt16 => Some(u16::MAX as u64),
            PropertyType::UInt32 => Some(u32::MAX as u64),
            PropertyType::UInt64 => Some(u64::MAX),
            _ => None,
        }
    }

    /// Convert a value into this type's canonical representation.
    ///
    /// Numeric mismatches are converted when the value fits; `Null` passes
    /// through (nullability is checked by the descriptor).
    pub fn coerce(self, value: Value) -> std::result::Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        if let Some((min, max)) = self.signed_bounds() {
            let wide: i128 = match value {
                Value::Int(i) => i as i128,
                Value::UInt(u) => u as i128,
                Value::Float(f) => integral_float(f, self)?,
                other => return Err(cannot_convert(&other, self)),
            };
            if wide < min as i128 || wide > max as i128 {
                return Err(format!("value {} overflows {:?}", wide, self));
            }
            return Ok(Value::Int(wide as i64));
        }

        if let Some(max) = self.unsigned_max() {
            let wide: i128 = match value {
                Value::Int(i) => i as i128,
                Value::UInt(u) => u as i128,
                Value::Float(f) => integral_float(f, self)?,
                other => return Err(cannot_convert(&other, self)),
            };
            if wide < 0 || wide > max as i128 {
                return Err(format!("value {} overflows {:?}", wide, self));
            }
            return Ok(Value::UInt(wide as u64));
        }

        match (self, value) {
            (PropertyType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),

            (PropertyType::Float32, v) => {
                let f = float_of(v, self)?;
                if f.is_finite() && f.abs() > f32::MAX as f64 {
                    return Err(format!("value {} overflows Float32", f));
                }
                Ok(Value::Float(f as f32 as f64))
            }
            (PropertyType::Float64, v) => float_of(v, self).map(Value::Float),

            (PropertyType::String, Value::Text(s)) => Ok(Value::Text(s)),

            (PropertyType::Bytes, Value::Bytes(b)) => Ok(Value::Bytes(b)),
            (PropertyType::Bytes, Value::List(items)) => items
                .into_iter()
                .map(|item| match item.as_i64() {
                    Some(byte @ 0..=255) => Ok(byte as u8),
                    _ => Err(format!("list element {} is not a byte", item)),
                })
                .collect::<std::result::Result<Vec<u8>, String>>()
                .map(Value::Bytes),

            (PropertyType::DateTime, Value::DateTime(t)) => Ok(Value::DateTime(t)),
            (PropertyType::DateTime, Value::Int(t)) => Ok(Value::DateTime(t)),
            (PropertyType::DateTime, Value::Text(s)) => parse_datetime(&s)
                .map(Value::DateTime)
                .ok_or_else(|| format!("{:?} is not an RFC 3339 timestamp", s)),

            (PropertyType::Struct, Value::Struct(m)) => Ok(Value::Struct(m)),
            (PropertyType::List, Value::List(l)) => Ok(Value::List(l)),

            (ty, other) => Err(cannot_convert(&other, ty)),
        }
    }
}

fn cannot_convert(value: &Value, ty: PropertyType) -> String {
    format!("cannot convert {} to {:?}", value.type_name(), ty)
}

fn integral_float(f: f64, ty: PropertyType) -> std::result::Result<i128, String> {
    if !f.is_finite() || f.fract() != 0.0 {
        return Err(format!("float {} is not an integral {:?}", f, ty));
    }
    if f.abs() > 1e38 {
        return Err(format!("value {} overflows {:?}", f, ty));
    }
    Ok(f as i128)
}

fn float_of(value: Value, ty: PropertyType) -> std::result::Result<f64, String> {
    match value {
        Value::Float(f) => Ok(f),
        Value::Int(i) => Ok(i as f64),
        Value::UInt(u) => Ok(u as f64),
        other => Err(cannot_convert(&other, ty)),
    }
}

// =============================================================================
// Descriptors
// =============================================================================

/// One property of an entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,

    #[serde(rename = "type")]
    pub property_type: PropertyType,

    #[serde(default)]
    pub nullable: bool,

    /// Integer key property whose value is assigned by the store on insert
    #[serde(default)]
    pub value_generated: bool,
}

/// Serialized form of a descriptor (validated on the way in)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DescriptorDef {
    name: String,
    properties: Vec<PropertyDescriptor>,
    key: Vec<String>,
}

/// Immutable schema of one entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DescriptorDef", into = "DescriptorDef")]
pub struct EntityTypeDescriptor {
    name: String,
    properties: Vec<PropertyDescriptor>,
    key: Vec<usize>,
    generated: Option<usize>,
    type_tag: String,
}

impl EntityTypeDescriptor {
    /// Start building a descriptor for the named entity type
    pub fn builder(name: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            name: name.into(),
            properties: Vec::new(),
            key: Vec::new(),
        }
    }

    /// Parse and validate a descriptor from its JSON form
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| LogTableError::Schema(e.to_string()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn property(&self, index: usize) -> Option<&PropertyDescriptor> {
        self.properties.get(index)
    }

    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    pub fn arity(&self) -> usize {
        self.properties.len()
    }

    /// Property indices forming the key, in key order
    pub fn key_indices(&self) -> &[usize] {
        &self.key
    }

    /// Index of the store-generated integer key property, if any
    pub fn generated_property(&self) -> Option<usize> {
        self.generated
    }

    /// Entity name plus a fingerprint of the property layout.
    ///
    /// Stored with every encoded row so decoders can tell when the writer
    /// used a different layout.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Validate a row against the schema and convert every value to its
    /// declared type.
    pub fn coerce_row(&self, row: Row) -> Result<Row> {
        let values = row.into_values();
        if values.len() != self.properties.len() {
            return Err(LogTableError::codec(
                &self.name,
                "<row>",
                format!(
                    "expected {} values, got {}",
                    self.properties.len(),
                    values.len()
                ),
            ));
        }

        let mut coerced = Vec::with_capacity(values.len());
        for (property, value) in self.properties.iter().zip(values) {
            coerced.push(self.coerce_property(property, value)?);
        }
        Ok(Row::new(coerced))
    }

    /// Convert raw key components to the declared key property types
    pub fn coerce_key(&self, values: Vec<Value>) -> Result<Key> {
        if values.len() != self.key.len() {
            return Err(LogTableError::codec(
                &self.name,
                "<key>",
                format!("expected {} key values, got {}", self.key.len(), values.len()),
            ));
        }

        let mut coerced = Vec::with_capacity(values.len());
        for (&index, value) in self.key.iter().zip(values) {
            let property = &self.properties[index];
            let value = self.coerce_property(property, value)?;
            if value.is_null() {
                return Err(LogTableError::codec(
                    &self.name,
                    &property.name,
                    "key value is NULL",
                ));
            }
            coerced.push(value);
        }
        Ok(Key::new(coerced))
    }

    /// Extract the key of an already-coerced row
    pub fn key_of(&self, row: &Row) -> Result<Key> {
        let mut values = Vec::with_capacity(self.key.len());
        for &index in &self.key {
            let value = row.get(index).cloned().unwrap_or(Value::Null);
            if value.is_null() {
                return Err(LogTableError::codec(
                    &self.name,
                    &self.properties[index].name,
                    "key value is NULL",
                ));
            }
            values.push(value);
        }
        Ok(Key::new(values))
    }

    fn coerce_property(&self, property: &PropertyDescriptor, value: Value) -> Result<Value> {
        let value = property
            .property_type
            .coerce(value)
            .map_err(|message| LogTableError::codec(&self.name, &property.name, message))?;

        // Generated keys may be left unset until the write path assigns them
        if value.is_null() && !property.nullable && !property.value_generated {
            return Err(LogTableError::codec(
                &self.name,
                &property.name,
                format!("NULL is not allowed for non-nullable {:?}", property.property_type),
            ));
        }
        Ok(value)
    }

    fn compute_type_tag(name: &str, properties: &[PropertyDescriptor], key: &[usize]) -> String {
        let mut hasher = crc32fast::Hasher::new();
        for property in properties {
            hasher.update(property.name.as_bytes());
            hasher.update(format!(":{:?}:{}:{};", property.property_type, property.nullable, property.value_generated).as_bytes());
        }
        for index in key {
            hasher.update(&(*index as u32).to_le_bytes());
        }
        format!("{}#{:08x}", name, hasher.finalize())
    }
}

impl TryFrom<DescriptorDef> for EntityTypeDescriptor {
    type Error = LogTableError;

    fn try_from(def: DescriptorDef) -> Result<Self> {
        let mut key = Vec::with_capacity(def.key.len());
        for name in &def.key {
            let index = def
                .properties
                .iter()
                .position(|p| &p.name == name)
                .ok_or_else(|| {
                    LogTableError::Schema(format!("{}: key property {} is not declared", def.name, name))
                })?;
            key.push(index);
        }
        DescriptorBuilder {
            name: def.name,
            properties: def.properties,
            key,
        }
        .build()
    }
}

impl From<EntityTypeDescriptor> for DescriptorDef {
    fn from(desc: EntityTypeDescriptor) -> Self {
        let key = desc
            .key
            .iter()
            .map(|&i| desc.properties[i].name.clone())
            .collect();
        DescriptorDef {
            name: desc.name,
            properties: desc.properties,
            key,
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for EntityTypeDescriptor
pub struct DescriptorBuilder {
    name: String,
    properties: Vec<PropertyDescriptor>,
    key: Vec<usize>,
}

impl DescriptorBuilder {
    /// Add a non-nullable property
    pub fn property(self, name: impl Into<String>, property_type: PropertyType) -> Self {
        self.push(name.into(), property_type, false, false, false)
    }

    /// Add a nullable property
    pub fn nullable(self, name: impl Into<String>, property_type: PropertyType) -> Self {
        self.push(name.into(), property_type, true, false, false)
    }

    /// Add a key property (appended to the key in call order)
    pub fn key(self, name: impl Into<String>, property_type: PropertyType) -> Self {
        self.push(name.into(), property_type, false, false, true)
    }

    /// Add an integer key property whose values the store generates
    pub fn generated_key(self, name: impl Into<String>, property_type: PropertyType) -> Self {
        self.push(name.into(), property_type, false, true, true)
    }

    fn push(
        mut self,
        name: String,
        property_type: PropertyType,
        nullable: bool,
        value_generated: bool,
        is_key: bool,
    ) -> Self {
        if is_key {
            self.key.push(self.properties.len());
        }
        self.properties.push(PropertyDescriptor {
            name,
            property_type,
            nullable,
            value_generated,
        });
        self
    }

    /// Validate and finish the descriptor
    pub fn build(self) -> Result<EntityTypeDescriptor> {
        let name = self.name;
        let schema_err = |msg: String| Err(LogTableError::Schema(format!("{}: {}", name, msg)));

        if name.is_empty() {
            return Err(LogTableError::Schema("entity type name is empty".to_string()));
        }
        if self.properties.is_empty() {
            return schema_err("no properties declared".to_string());
        }
        if self.key.is_empty() {
            return schema_err("no key properties declared".to_string());
        }

        for (i, property) in self.properties.iter().enumerate() {
            if self.properties[..i].iter().any(|p| p.name == property.name) {
                return schema_err(format!("duplicate property {}", property.name));
            }
        }

        for (i, &index) in self.key.iter().enumerate() {
            let Some(property) = self.properties.get(index) else {
                return schema_err(format!("key index {} out of range", index));
            };
            if self.key[..i].contains(&index) {
                return schema_err(format!("key property {} listed twice", property.name));
            }
            if property.nullable {
                return schema_err(format!("key property {} is nullable", property.name));
            }
        }

        let generated: Vec<usize> = self
            .properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.value_generated)
            .map(|(i, _)| i)
            .collect();
        if generated.len() > 1 {
            return schema_err("more than one generated property".to_string());
        }
        if let Some(&index) = generated.first() {
            let property = &self.properties[index];
            if !property.property_type.is_integer() || !self.key.contains(&index) {
                return schema_err(format!(
                    "generated property {} must be an integer key property",
                    property.name
                ));
            }
        }

        let type_tag = EntityTypeDescriptor::compute_type_tag(&name, &self.properties, &self.key);
        Ok(EntityTypeDescriptor {
            name,
            properties: self.properties,
            key: self.key,
            generated: generated.first().copied(),
            type_tag,
        })
    }
}
