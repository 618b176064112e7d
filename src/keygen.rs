//! Integer key generator
//!
//! One atomic counter per (entity, generated property). The counter holds the
//! highest value handed out or observed; `next` returns counter + 1, so
//! values are strictly increasing and never 0.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{LogTableError, Result};
use crate::model::EntityTypeDescriptor;

/// Source of store-generated integer keys
#[derive(Debug)]
pub struct KeyGenerator {
    entity: String,
    property: String,
    counter: AtomicI64,

    /// Largest value the property's declared type can hold
    limit: i64,
}

impl KeyGenerator {
    pub fn new(entity: impl Into<String>, property: impl Into<String>, limit: i64) -> Self {
        Self {
            entity: entity.into(),
            property: property.into(),
            counter: AtomicI64::new(0),
            limit,
        }
    }

    /// Generator for the descriptor's generated property, if it has one
    pub fn for_descriptor(descriptor: &EntityTypeDescriptor) -> Option<Self> {
        let index = descriptor.generated_property()?;
        let property = descriptor.property(index)?;
        let limit = property.property_type.generator_limit()?;
        Some(Self::new(descriptor.name(), &property.name, limit))
    }

    /// Raise the counter to at least `max` (never lowers it)
    pub fn seed(&self, max: i64) {
        self.counter.fetch_max(max, Ordering::SeqCst);
    }

    /// Next unused value
    pub fn next(&self) -> Result<i64> {
        let limit = self.limit;
        self.counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_add(1).filter(|next| *next <= limit)
            })
            .map(|previous| previous + 1)
            .map_err(|_| LogTableError::KeyExhausted {
                entity: self.entity.clone(),
                property: self.property.clone(),
            })
    }

    /// Record a value seen elsewhere (explicit key or ingested row)
    pub fn bump(&self, observed: i64) {
        self.counter.fetch_max(observed, Ordering::SeqCst);
    }

    /// Highest value handed out or observed
    pub fn current(&self) -> i64 {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn property(&self) -> &str {
        &self.property
    }
}
