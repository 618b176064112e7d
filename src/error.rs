//! Error types for logtable
//!
//! Provides a unified error type for all operations.

use std::fmt;

use thiserror::Error;

use crate::model::Key;

/// Result type alias using LogTableError
pub type Result<T> = std::result::Result<T, LogTableError>;

/// A row of a write batch that could not be appended to the log
#[derive(Debug, Clone)]
pub struct FailedRow {
    /// Position of the operation inside the batch
    pub index: usize,

    /// Entity type the row belongs to
    pub entity: String,

    /// Key of the row, when it could be computed
    pub key: Option<Key>,

    /// Human-readable cause reported by the log client
    pub cause: String,
}

impl fmt::Display for FailedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "#{} {}{}: {}", self.index, self.entity, key, self.cause),
            None => write!(f, "#{} {}: {}", self.index, self.entity, self.cause),
        }
    }
}

/// Unified error type for logtable operations
#[derive(Debug, Error)]
pub enum LogTableError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Codec / Schema Errors
    // -------------------------------------------------------------------------
    #[error("Codec error on {entity}.{property}: {message}")]
    Codec {
        entity: String,
        property: String,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),

    // -------------------------------------------------------------------------
    // Log Client Errors
    // -------------------------------------------------------------------------
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Timed out after {after_ms} ms: {operation}")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Segment corruption detected: {0}")]
    SegmentCorruption(String),

    // -------------------------------------------------------------------------
    // Table Errors
    // -------------------------------------------------------------------------
    #[error("Table {0} is not ready")]
    NotReady(String),

    #[error("Table {0} is closed")]
    Closed(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    // -------------------------------------------------------------------------
    // Write Path Errors
    // -------------------------------------------------------------------------
    #[error("Update failed: {} row(s) failed to append, {appended} appended", .failures.len())]
    UpdateFailed {
        failures: Vec<FailedRow>,
        appended: usize,
    },

    #[error("Key generator for {entity}.{property} is exhausted")]
    KeyExhausted { entity: String, property: String },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LogTableError {
    /// Shorthand for a codec error on a named property
    pub fn codec(
        entity: impl Into<String>,
        property: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        LogTableError::Codec {
            entity: entity.into(),
            property: property.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LogTableError::BrokerUnavailable(_) | LogTableError::Timeout { .. } | LogTableError::Io(_)
        )
    }
}

impl From<bincode::Error> for LogTableError {
    fn from(err: bincode::Error) -> Self {
        LogTableError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for LogTableError {
    fn from(err: serde_json::Error) -> Self {
        LogTableError::Serialization(err.to_string())
    }
}
