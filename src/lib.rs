//! # logtable
//!
//! A changelog-backed entity store:
//! - Every entity type is a topic of a partitioned, append-only log
//! - Each topic is materialized into an in-memory, key-indexed table that an
//!   ingestion thread keeps in sync with the log
//! - Writes are appended to the log; tables pick them up like any other record
//! - Store-generated integer keys, change notifications, local checkpoints
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       EntityStore                           │
//! │        (registration, lazily opened tables, lifecycle)      │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │ save(batch)                      │ get / scan
//!            ▼                                  ▼
//!   ┌─────────────────┐                 ┌─────────────────┐
//!   │ WriteCoordinator│                 │MaterializedTable│──► ChangeFeed
//!   │ keygen + codec  │                 │ (RwLock<BTree>) │   (listeners)
//!   └────────┬────────┘                 └────────▲────────┘
//!            │ append                            │ apply
//!            ▼                                   │
//!   ┌─────────────────────────────────────────────────────────────┐
//!   │                         LogClient                           │
//!   │        MemoryLog (in-process) | FileLog (segments)          │
//!   └─────────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod codec;
pub mod feed;
pub mod keygen;
pub mod log;
pub mod model;
pub mod store;
pub mod table;
pub mod writer;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use codec::{codec_for, CodecKind, EntityCodec, ValueContainer};
pub use config::{Config, ReadinessMode, SegmentSyncStrategy, StorageMode, TopicOverrides};
pub use error::{FailedRow, LogTableError, Result};
pub use feed::{ChangeEvent, ChangeKind, ChangeListener, ListenerToken};
pub use keygen::KeyGenerator;
pub use log::{FileLog, LogClient, LogPosition, MemoryLog, PartitionOffsets, TopicSpec};
pub use model::{EntityTypeDescriptor, Key, PropertyDescriptor, PropertyType, Row, Value};
pub use store::EntityStore;
pub use table::{MaterializedTable, Predicate, TableState};
pub use writer::{SaveResult, WriteBatch, WriteOp};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of logtable
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
