//! Codec Module
//!
//! Converts rows to and from the opaque payloads stored in the log.
//!
//! ## Contract
//! - `encode(desc, row)` validates the row against the schema and produces a
//!   `ValueContainer`
//! - `decode(desc, container)` reproduces a row whose values are converted to
//!   each property's declared type
//! - `encode_key` / `decode_key` do the same for keys; encoded keys are also
//!   the partitioning input, so they must be deterministic
//!
//! ## Implementations
//! - `BinaryCodec`: positional bincode payload
//! - `TaggedJsonCodec`: JSON object keyed by property name, values carry
//!   their type tag
//! - `JsonCodec`: plain JSON object, types recovered from the descriptor

mod binary;
mod json;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{LogTableError, Result};
use crate::model::{EntityTypeDescriptor, Key, Row};

pub use binary::BinaryCodec;
pub use json::{JsonCodec, TaggedJsonCodec};

/// Available codec implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecKind {
    Binary,
    TaggedJson,
    Json,
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecKind::Binary => write!(f, "binary"),
            CodecKind::TaggedJson => write!(f, "tagged-json"),
            CodecKind::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for CodecKind {
    type Err = LogTableError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "binary" => Ok(CodecKind::Binary),
            "tagged-json" => Ok(CodecKind::TaggedJson),
            "json" => Ok(CodecKind::Json),
            other => Err(LogTableError::Config(format!("unknown codec: {}", other))),
        }
    }
}

/// The serialized unit stored as a log record value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueContainer {
    /// Entity type name, for polymorphic decode
    pub entity: String,

    /// Layout fingerprint of the writer's descriptor
    pub type_tag: String,

    /// Codec that produced the payload
    pub codec: CodecKind,

    /// Encoded row
    pub payload: Bytes,
}

/// Row/key codec used by tables and the write path
pub trait EntityCodec: Send + Sync + fmt::Debug {
    fn kind(&self) -> CodecKind;

    fn encode(&self, entity: &EntityTypeDescriptor, row: &Row) -> Result<ValueContainer>;

    fn decode(&self, entity: &EntityTypeDescriptor, container: &ValueContainer) -> Result<Row>;

    fn encode_key(&self, key: &Key) -> Result<Vec<u8>>;

    fn decode_key(&self, entity: &EntityTypeDescriptor, bytes: &[u8]) -> Result<Key>;
}

/// Construct the codec for a kind
pub fn codec_for(kind: CodecKind) -> Arc<dyn EntityCodec> {
    match kind {
        CodecKind::Binary => Arc::new(BinaryCodec),
        CodecKind::TaggedJson => Arc::new(TaggedJsonCodec),
        CodecKind::Json => Arc::new(JsonCodec),
    }
}

/// Wrap an encoded payload for the given descriptor
pub(crate) fn container(entity: &EntityTypeDescriptor, codec: CodecKind, payload: Vec<u8>) -> ValueContainer {
    ValueContainer {
        entity: entity.name().to_string(),
        type_tag: entity.type_tag().to_string(),
        codec,
        payload: Bytes::from(payload),
    }
}

/// Check that a container belongs to this entity and codec before decoding
pub(crate) fn check_container(
    entity: &EntityTypeDescriptor,
    codec: CodecKind,
    container: &ValueContainer,
) -> Result<()> {
    if container.entity != entity.name() {
        return Err(LogTableError::codec(
            entity.name(),
            "<container>",
            format!("payload belongs to entity {}", container.entity),
        ));
    }
    if container.codec != codec {
        return Err(LogTableError::codec(
            entity.name(),
            "<container>",
            format!("payload was written by the {} codec, not {}", container.codec, codec),
        ));
    }
    if container.type_tag != entity.type_tag() {
        // Layout changed since the record was written; per-property
        // coercion decides whether it is still readable
        tracing::debug!(
            entity = entity.name(),
            written = %container.type_tag,
            current = entity.type_tag(),
            "decoding record written with a different layout"
        );
    }
    Ok(())
}
