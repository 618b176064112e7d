//! Model Module
//!
//! Schema and value types shared by every component.
//!
//! ## Types
//! - `Value`: one dynamically-typed property value (totally ordered)
//! - `Row`: ordered property values of one entity instance
//! - `Key`: tuple of key property values (structural equality and ordering)
//! - `EntityTypeDescriptor`: immutable schema of one entity type

mod descriptor;
mod value;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use descriptor::{DescriptorBuilder, EntityTypeDescriptor, PropertyDescriptor, PropertyType};
pub use value::{format_datetime, parse_datetime, Value};

/// Ordered property values of one entity instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Row(Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Replace the value at `index`; out-of-range indices are ignored
    pub fn set(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = value;
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Key of a row: the values at the descriptor's key positions.
///
/// Compares and hashes as a tuple, so composite keys need no textual
/// encoding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(Vec<Value>);

impl Key {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Single-component key
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}

/// Build a row from a list of values convertible into `Value`
#[macro_export]
macro_rules! row {
    ($($value:expr),* $(,)?) => {
        $crate::model::Row::new(vec![$($crate::model::Value::from($value)),*])
    };
}
