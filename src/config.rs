//! Configuration for logtable
//!
//! Centralized configuration with sensible defaults. A `Config` is handed to
//! `EntityStore::open` and owned by that store; nothing here is global.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::codec::CodecKind;
use crate::error::{LogTableError, Result};
use crate::log::TopicSpec;

/// Main configuration for an entity store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for local data
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── log/                       (file-backed log, one dir per topic)
    ///     └── checkpoints/{application}/ (table checkpoints, persistent mode)
    pub data_dir: PathBuf,

    /// Whether tables resume from local checkpoints or replay from offset 0
    pub storage_mode: StorageMode,

    /// Applied records between two checkpoints (persistent mode)
    pub checkpoint_interval: u64,

    /// Sync strategy for file-backed log segments
    pub segment_sync_strategy: SegmentSyncStrategy,

    // -------------------------------------------------------------------------
    // Cluster Configuration
    // -------------------------------------------------------------------------
    /// Broker addresses, passed through to external log clients
    pub cluster_addresses: Vec<String>,

    /// Logical database name; prefixes every topic name
    pub database_name: String,

    /// Application identifier; scopes checkpoints and thread names
    pub application_id: String,

    /// Partition count for topics without an override
    pub default_partitions: u32,

    /// Replication factor for topics without an override
    pub default_replication_factor: u16,

    /// Per-entity topic and codec overrides
    pub topic_overrides: HashMap<String, TopicOverrides>,

    // -------------------------------------------------------------------------
    // Table Configuration
    // -------------------------------------------------------------------------
    /// Codec for entities registered without an explicit one
    pub default_codec: CodecKind,

    /// Behavior of reads issued before a table finished hydrating
    pub readiness: ReadinessMode,

    /// Apply saved rows to the table before `save` returns
    pub read_your_writes: bool,

    /// Max wait for one ingestion poll (milliseconds)
    pub poll_interval_ms: u64,

    /// First reconnect delay after an ingestion failure (milliseconds)
    pub retry_backoff_initial_ms: u64,

    /// Upper bound for the reconnect delay (milliseconds)
    pub retry_backoff_max_ms: u64,

    // -------------------------------------------------------------------------
    // Write Configuration
    // -------------------------------------------------------------------------
    /// Timeout for a single append (milliseconds)
    pub append_timeout_ms: u64,
}

/// How tables are rebuilt on restart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Resume from the last local checkpoint, then tail the log
    Persistent,

    /// Always replay the full log from offset 0
    Ephemeral,
}

/// Segment sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentSyncStrategy {
    /// fsync after every append (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced appends (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// Reads issued before a table is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessMode {
    /// Block until ready, failing with `NotReady` after the timeout
    Block { timeout_ms: u64 },

    /// Fail immediately with `NotReady`
    Reject,
}

/// Per-entity overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicOverrides {
    pub partitions: Option<u32>,
    pub replication_factor: Option<u16>,
    pub codec: Option<CodecKind>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./logtable_data"),
            storage_mode: StorageMode::Persistent,
            checkpoint_interval: 10_000,
            segment_sync_strategy: SegmentSyncStrategy::EveryNEntries { count: 100 },
            cluster_addresses: vec!["localhost:9092".to_string()],
            database_name: "logtable".to_string(),
            application_id: "logtable".to_string(),
            default_partitions: 1,
            default_replication_factor: 1,
            topic_overrides: HashMap::new(),
            default_codec: CodecKind::Binary,
            readiness: ReadinessMode::Block { timeout_ms: 30_000 },
            read_your_writes: false,
            poll_interval_ms: 100,
            retry_backoff_initial_ms: 100,
            retry_backoff_max_ms: 5_000,
            append_timeout_ms: 5_000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings no table could run with
    pub fn validate(&self) -> Result<()> {
        if self.database_name.is_empty() {
            return Err(LogTableError::Config("database_name is empty".to_string()));
        }
        if self.application_id.is_empty() {
            return Err(LogTableError::Config("application_id is empty".to_string()));
        }
        if self.default_partitions == 0 {
            return Err(LogTableError::Config("default_partitions must be > 0".to_string()));
        }
        if self.default_replication_factor == 0 {
            return Err(LogTableError::Config(
                "default_replication_factor must be > 0".to_string(),
            ));
        }
        for (entity, overrides) in &self.topic_overrides {
            if overrides.partitions == Some(0) || overrides.replication_factor == Some(0) {
                return Err(LogTableError::Config(format!(
                    "{}: partitions and replication factor must be > 0",
                    entity
                )));
            }
        }
        if self.checkpoint_interval == 0 {
            return Err(LogTableError::Config("checkpoint_interval must be > 0".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(LogTableError::Config("poll_interval_ms must be > 0".to_string()));
        }
        if self.retry_backoff_initial_ms == 0
            || self.retry_backoff_max_ms < self.retry_backoff_initial_ms
        {
            return Err(LogTableError::Config(
                "retry backoff must satisfy 0 < initial <= max".to_string(),
            ));
        }
        if let SegmentSyncStrategy::EveryNEntries { count: 0 } = self.segment_sync_strategy {
            return Err(LogTableError::Config("sync count must be > 0".to_string()));
        }
        Ok(())
    }

    /// Topic backing an entity type: `{database_name}.{entity}`
    pub fn topic_name(&self, entity: &str) -> String {
        format!("{}.{}", self.database_name, entity)
    }

    /// Topic settings for an entity type, overrides applied
    pub fn topic_spec(&self, entity: &str) -> TopicSpec {
        let overrides = self.topic_overrides.get(entity);
        TopicSpec {
            name: self.topic_name(entity),
            partitions: overrides
                .and_then(|o| o.partitions)
                .unwrap_or(self.default_partitions),
            replication_factor: overrides
                .and_then(|o| o.replication_factor)
                .unwrap_or(self.default_replication_factor),
        }
    }

    /// Codec for an entity type, override applied
    pub fn codec_for(&self, entity: &str) -> CodecKind {
        self.topic_overrides
            .get(entity)
            .and_then(|o| o.codec)
            .unwrap_or(self.default_codec)
    }

    /// Directory of the file-backed log
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("log")
    }

    /// Checkpoint file for an entity type; `None` in ephemeral mode
    pub fn checkpoint_path(&self, entity: &str) -> Option<PathBuf> {
        match self.storage_mode {
            StorageMode::Persistent => Some(
                self.data_dir
                    .join("checkpoints")
                    .join(&self.application_id)
                    .join(format!("{}.ckpt", entity)),
            ),
            StorageMode::Ephemeral => None,
        }
    }

    pub fn append_timeout(&self) -> Duration {
        Duration::from_millis(self.append_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all local storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the storage mode (checkpoint resume vs. full replay)
    pub fn storage_mode(mut self, mode: StorageMode) -> Self {
        self.config.storage_mode = mode;
        self
    }

    /// Set the number of applied records between checkpoints
    pub fn checkpoint_interval(mut self, records: u64) -> Self {
        self.config.checkpoint_interval = records;
        self
    }

    /// Set the segment sync strategy
    pub fn segment_sync_strategy(mut self, strategy: SegmentSyncStrategy) -> Self {
        self.config.segment_sync_strategy = strategy;
        self
    }

    /// Set the broker addresses
    pub fn cluster_addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.cluster_addresses = addresses.into_iter().map(Into::into).collect();
        self
    }

    /// Set the logical database name
    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.config.database_name = name.into();
        self
    }

    /// Set the application identifier
    pub fn application_id(mut self, id: impl Into<String>) -> Self {
        self.config.application_id = id.into();
        self
    }

    /// Set the default partition count
    pub fn default_partitions(mut self, partitions: u32) -> Self {
        self.config.default_partitions = partitions;
        self
    }

    /// Set the default replication factor
    pub fn default_replication_factor(mut self, factor: u16) -> Self {
        self.config.default_replication_factor = factor;
        self
    }

    /// Override topic settings or codec for one entity type
    pub fn topic_override(mut self, entity: impl Into<String>, overrides: TopicOverrides) -> Self {
        self.config.topic_overrides.insert(entity.into(), overrides);
        self
    }

    /// Set the default codec
    pub fn default_codec(mut self, codec: CodecKind) -> Self {
        self.config.default_codec = codec;
        self
    }

    /// Set the behavior of reads before hydration completes
    pub fn readiness(mut self, mode: ReadinessMode) -> Self {
        self.config.readiness = mode;
        self
    }

    /// Enable or disable read-your-writes
    pub fn read_your_writes(mut self, enabled: bool) -> Self {
        self.config.read_your_writes = enabled;
        self
    }

    /// Set the ingestion poll interval (in milliseconds)
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set the ingestion reconnect backoff bounds (in milliseconds)
    pub fn retry_backoff_ms(mut self, initial: u64, max: u64) -> Self {
        self.config.retry_backoff_initial_ms = initial;
        self.config.retry_backoff_max_ms = max;
        self
    }

    /// Set the append timeout (in milliseconds)
    pub fn append_timeout_ms(mut self, ms: u64) -> Self {
        self.config.append_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
