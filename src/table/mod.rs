//! Table Module
//!
//! In-memory materialization of one entity type's topic.
//!
//! ## Responsibilities
//! - Hold the key → row map and the offsets it reflects
//! - Keep it in sync with the log (ingestion thread)
//! - Serve point lookups and predicate scans from a consistent snapshot
//! - Publish a change event for every effective mutation
//!
//! ## Lifecycle
//! `Uninitialized → Hydrating → Ready → Closed`. Reads before `Ready` wait or
//! fail depending on the configured `ReadinessMode`; reads after close fail.
//!
//! ## Concurrency
//! Rows live in a `BTreeMap` under a `parking_lot::RwLock`: many readers, one
//! writer at a time (the ingestion thread, or the write path applying its own
//! records). Scans copy the matching row handles out under the read lock and
//! filter them afterwards.

mod checkpoint;
mod data;
mod ingest;
mod predicate;

use std::fmt;
use std::ops::Bound;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::codec::EntityCodec;
use crate::config::{Config, ReadinessMode};
use crate::error::{LogTableError, Result};
use crate::feed::{ChangeEvent, ChangeFeed, ChangeKind};
use crate::keygen::KeyGenerator;
use crate::log::{LogClient, LogPosition, PartitionOffsets, TopicSpec};
use crate::model::{EntityTypeDescriptor, Key, Row, Value};

pub use checkpoint::Checkpoint;
pub use data::ApplyOutcome;
pub use predicate::Predicate;

use data::TableData;
use predicate::{below, ScanPlan};

// =============================================================================
// State & Options
// =============================================================================

/// Lifecycle state of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Uninitialized,
    Hydrating,
    Ready,
    Closed,
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableState::Uninitialized => write!(f, "uninitialized"),
            TableState::Hydrating => write!(f, "hydrating"),
            TableState::Ready => write!(f, "ready"),
            TableState::Closed => write!(f, "closed"),
        }
    }
}

/// Settings of one table
#[derive(Debug, Clone)]
pub struct TableOptions {
    pub topic: TopicSpec,
    pub readiness: ReadinessMode,

    /// Max wait for one ingestion poll
    pub poll_interval: Duration,

    pub retry_backoff_initial: Duration,
    pub retry_backoff_max: Duration,

    /// Records between two checkpoints
    pub checkpoint_interval: u64,

    /// `None` disables checkpoints (full replay on every open)
    pub checkpoint_path: Option<PathBuf>,
}

impl TableOptions {
    /// Defaults for a topic, no checkpoints
    pub fn new(topic: TopicSpec) -> Self {
        let defaults = Config::default();
        Self {
            topic,
            readiness: defaults.readiness,
            poll_interval: defaults.poll_interval(),
            retry_backoff_initial: Duration::from_millis(defaults.retry_backoff_initial_ms),
            retry_backoff_max: Duration::from_millis(defaults.retry_backoff_max_ms),
            checkpoint_interval: defaults.checkpoint_interval,
            checkpoint_path: None,
        }
    }

    /// Options for an entity type under a store config
    pub fn from_config(config: &Config, entity: &str) -> Self {
        Self {
            topic: config.topic_spec(entity),
            readiness: config.readiness,
            poll_interval: config.poll_interval(),
            retry_backoff_initial: Duration::from_millis(config.retry_backoff_initial_ms),
            retry_backoff_max: Duration::from_millis(config.retry_backoff_max_ms),
            checkpoint_interval: config.checkpoint_interval,
            checkpoint_path: config.checkpoint_path(entity),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
pub(crate) struct TableStats {
    records_applied: AtomicU64,
    records_skipped: AtomicU64,
    poison_records: AtomicU64,
    reconnects: AtomicU64,
    checkpoints_written: AtomicU64,
}

/// Point-in-time copy of a table's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStatsSnapshot {
    /// Records that changed (or were checked against) the table
    pub records_applied: u64,

    /// Duplicates and records superseded by a local write
    pub records_skipped: u64,

    /// Records that could not be decoded
    pub poison_records: u64,

    /// Subscribe/poll failures followed by a reconnect
    pub reconnects: u64,

    pub checkpoints_written: u64,
}

impl TableStats {
    fn snapshot(&self) -> TableStatsSnapshot {
        TableStatsSnapshot {
            records_applied: self.records_applied.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            poison_records: self.poison_records.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            checkpoints_written: self.checkpoints_written.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// State shared between a table handle and its ingestion thread
pub(crate) struct TableShared {
    descriptor: Arc<EntityTypeDescriptor>,
    entity: Arc<str>,
    codec: Arc<dyn EntityCodec>,
    data: RwLock<TableData>,

    state: Mutex<TableState>,
    state_changed: Condvar,

    stats: TableStats,
    feed: Arc<ChangeFeed>,
    generator: Option<Arc<KeyGenerator>>,

    /// Set on close; checked by the ingestion loop between polls
    shutdown: AtomicBool,
}

impl TableShared {
    /// Apply one record and publish the resulting change
    fn apply_record(&self, key: Key, row: Option<Row>, position: LogPosition, local: bool) -> ApplyOutcome {
        let generated = match (self.descriptor.generated_property(), &row) {
            (Some(index), Some(row)) => row.get(index).and_then(Value::as_i64),
            _ => None,
        };

        let mut data = self.data.write();
        let outcome = if local {
            data.apply_local(key.clone(), row, position)
        } else {
            data.apply(key.clone(), row, position)
        };

        match outcome {
            ApplyOutcome::Changed(kind) => {
                self.stats.records_applied.fetch_add(1, Ordering::Relaxed);
                if let (Some(generator), Some(value)) = (&self.generator, generated) {
                    generator.bump(value);
                }
                // Published under the write lock so events keep apply order
                self.feed.publish(&ChangeEvent {
                    entity: Arc::clone(&self.entity),
                    kind,
                    key,
                });
            }
            ApplyOutcome::Unchanged => {
                self.stats.records_applied.fetch_add(1, Ordering::Relaxed);
            }
            ApplyOutcome::Duplicate | ApplyOutcome::Superseded => {
                self.stats.records_skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
        outcome
    }

    fn is_ready(&self) -> bool {
        *self.state.lock() == TableState::Ready
    }

    /// Move `Hydrating → Ready`; false if the table was closed meanwhile
    fn mark_ready(&self) -> bool {
        let mut state = self.state.lock();
        if *state != TableState::Hydrating {
            return false;
        }
        *state = TableState::Ready;
        self.state_changed.notify_all();
        true
    }

    fn seed_generator(&self) {
        let (Some(generator), Some(index)) = (&self.generator, self.descriptor.generated_property()) else {
            return;
        };
        if let Some(max) = self.max_value(index).as_ref().and_then(Value::as_i64) {
            generator.seed(max);
        }
    }

    fn max_value(&self, index: usize) -> Option<Value> {
        let data = self.data.read();

        // Single-property key: the index is ordered by it
        if self.descriptor.key_indices() == [index] {
            return data
                .rows()
                .keys()
                .next_back()
                .and_then(|key| key.values().first().cloned());
        }

        data.rows()
            .values()
            .filter_map(|row| row.get(index))
            .filter(|value| !value.is_null())
            .max()
            .cloned()
    }

    fn checkpoint(&self) -> Checkpoint {
        let data = self.data.read();
        Checkpoint {
            type_tag: self.descriptor.type_tag().to_string(),
            offsets: data.next_offsets(),
            rows: data
                .rows()
                .iter()
                .map(|(key, row)| (key.clone(), row.as_ref().clone()))
                .collect(),
        }
    }
}

// =============================================================================
// Materialized Table
// =============================================================================

/// Queryable in-memory view of one entity type's topic
pub struct MaterializedTable {
    shared: Arc<TableShared>,
    options: TableOptions,
    ingestion: Mutex<Option<JoinHandle<()>>>,
}

impl MaterializedTable {
    /// Open a table and start hydrating it.
    ///
    /// On open:
    /// 1. Create the topic if missing
    /// 2. Restore the last checkpoint, if any and still compatible
    /// 3. Start the ingestion thread (state becomes `Hydrating`)
    pub fn open(
        log: Arc<dyn LogClient>,
        descriptor: Arc<EntityTypeDescriptor>,
        codec: Arc<dyn EntityCodec>,
        feed: Arc<ChangeFeed>,
        options: TableOptions,
    ) -> Result<Self> {
        // Step 1: Topic
        log.ensure_topic(&options.topic)?;

        // Step 2: Checkpoint
        let data = match &options.checkpoint_path {
            Some(path) => Self::restore(path, &descriptor),
            None => TableData::new(),
        };

        let generator = KeyGenerator::for_descriptor(&descriptor).map(Arc::new);
        let shared = Arc::new(TableShared {
            entity: Arc::from(descriptor.name()),
            descriptor,
            codec,
            data: RwLock::new(data),
            state: Mutex::new(TableState::Uninitialized),
            state_changed: Condvar::new(),
            stats: TableStats::default(),
            feed,
            generator,
            shutdown: AtomicBool::new(false),
        });

        // Step 3: Ingestion
        *shared.state.lock() = TableState::Hydrating;
        let handle = ingest::spawn(Arc::clone(&shared), log, &options)?;

        tracing::info!(
            entity = shared.descriptor.name(),
            topic = %options.topic.name,
            "table opened"
        );

        Ok(Self {
            shared,
            options,
            ingestion: Mutex::new(Some(handle)),
        })
    }

    fn restore(path: &std::path::Path, descriptor: &EntityTypeDescriptor) -> TableData {
        match Checkpoint::load(path) {
            Ok(Some(checkpoint)) if checkpoint.type_tag == descriptor.type_tag() => {
                tracing::info!(
                    entity = descriptor.name(),
                    rows = checkpoint.rows.len(),
                    offsets = ?checkpoint.offsets,
                    "resuming from checkpoint"
                );
                TableData::restore(checkpoint.rows, &checkpoint.offsets)
            }
            Ok(Some(checkpoint)) => {
                tracing::warn!(
                    entity = descriptor.name(),
                    stored = %checkpoint.type_tag,
                    current = descriptor.type_tag(),
                    "checkpoint layout differs, replaying the full log"
                );
                TableData::new()
            }
            Ok(None) => TableData::new(),
            Err(e) => {
                tracing::warn!(
                    entity = descriptor.name(),
                    error = %e,
                    "ignoring unreadable checkpoint, replaying the full log"
                );
                TableData::new()
            }
        }
    }

    // =========================================================================
    // Readiness
    // =========================================================================

    /// Wait until the table is ready, up to `timeout`
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            match *state {
                TableState::Ready => return Ok(()),
                TableState::Closed => return Err(self.closed()),
                _ => {}
            }
            if self
                .shared
                .state_changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return match *state {
                    TableState::Ready => Ok(()),
                    TableState::Closed => Err(self.closed()),
                    _ => Err(LogTableError::NotReady(self.name().to_string())),
                };
            }
        }
    }

    /// Gate for every read: waits or fails according to the readiness mode
    pub fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            TableState::Ready => Ok(()),
            TableState::Closed => Err(self.closed()),
            TableState::Uninitialized | TableState::Hydrating => match self.options.readiness {
                ReadinessMode::Reject => Err(LogTableError::NotReady(self.name().to_string())),
                ReadinessMode::Block { timeout_ms } => self.wait_ready(Duration::from_millis(timeout_ms)),
            },
        }
    }

    fn closed(&self) -> LogTableError {
        LogTableError::Closed(self.name().to_string())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Row stored under `key`
    pub fn get(&self, key: &Key) -> Result<Option<Row>> {
        self.ensure_ready()?;
        Ok(self.shared.data.read().get(key).map(|row| row.as_ref().clone()))
    }

    /// Rows matching `predicate` (all rows when `None`), in key order.
    ///
    /// The candidate set is fixed when `scan` is called; later changes are
    /// not observed by the returned iterator.
    pub fn scan(&self, predicate: Option<&Predicate>) -> Result<TableScan> {
        self.ensure_ready()?;

        let descriptor = &self.shared.descriptor;
        let predicate = predicate.map(|p| p.bind(descriptor));
        let plan = predicate
            .as_ref()
            .map_or(ScanPlan::Full, |p| p.plan(descriptor));

        let data = self.shared.data.read();
        let rows: Vec<Arc<Row>> = match plan {
            ScanPlan::Point(key) => data.get(&key).cloned().into_iter().collect(),
            ScanPlan::Range { lower, upper } => {
                let start = match lower {
                    Bound::Included(v) | Bound::Excluded(v) => Bound::Included(Key::new(vec![v])),
                    Bound::Unbounded => Bound::Unbounded,
                };
                data.rows()
                    .range((start, Bound::Unbounded))
                    .take_while(|(key, _)| {
                        key.values()
                            .first()
                            .is_some_and(|first| below(first, &upper))
                    })
                    .map(|(_, row)| Arc::clone(row))
                    .collect()
            }
            ScanPlan::Full => data.rows().values().cloned().collect(),
        };
        drop(data);

        Ok(TableScan {
            rows: rows.into_iter(),
            predicate,
        })
    }

    /// Largest non-null value of a property
    pub fn max_value(&self, index: usize) -> Result<Option<Value>> {
        self.ensure_ready()?;
        Ok(self.shared.max_value(index))
    }

    pub fn len(&self) -> usize {
        self.shared.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Apply a record read from the log.
    ///
    /// Idempotent per partition offset; returns the change, if any.
    pub fn apply(&self, key: Key, row: Option<Row>, position: LogPosition) -> Option<ChangeKind> {
        self.shared.apply_record(key, row, position, false).change()
    }

    /// Apply a record this process just appended, ahead of ingestion.
    ///
    /// When ingestion later reaches the same offset it is not applied twice,
    /// and older records for the key are not applied over it.
    pub fn apply_local(&self, key: Key, row: Option<Row>, position: LogPosition) -> Option<ChangeKind> {
        self.shared.apply_record(key, row, position, true).change()
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn name(&self) -> &str {
        self.shared.descriptor.name()
    }

    pub fn descriptor(&self) -> &Arc<EntityTypeDescriptor> {
        &self.shared.descriptor
    }

    pub fn codec(&self) -> &Arc<dyn EntityCodec> {
        &self.shared.codec
    }

    pub fn topic(&self) -> &str {
        &self.options.topic.name
    }

    /// Generator of the descriptor's generated key property, if any
    pub fn generator(&self) -> Option<&Arc<KeyGenerator>> {
        self.shared.generator.as_ref()
    }

    pub fn state(&self) -> TableState {
        *self.shared.state.lock()
    }

    /// Next offset to read per partition
    pub fn applied_offsets(&self) -> PartitionOffsets {
        self.shared.data.read().next_offsets()
    }

    pub fn stats(&self) -> TableStatsSnapshot {
        self.shared.stats.snapshot()
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stop ingestion and write a final checkpoint. Idempotent.
    pub fn close(&self) -> Result<()> {
        let Some(handle) = self.ingestion.lock().take() else {
            return Ok(());
        };

        self.shared.shutdown.store(true, Ordering::Release);
        {
            let mut state = self.shared.state.lock();
            *state = TableState::Closed;
            self.shared.state_changed.notify_all();
        }

        if handle.join().is_err() {
            tracing::warn!(entity = self.name(), "ingestion thread terminated abnormally");
        }

        if let Some(path) = &self.options.checkpoint_path {
            self.shared.checkpoint().save(path)?;
        }

        tracing::info!(entity = self.name(), rows = self.len(), "table closed");
        Ok(())
    }
}

impl Drop for MaterializedTable {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(entity = self.name(), error = %e, "error while closing table");
        }
    }
}

impl fmt::Debug for MaterializedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializedTable")
            .field("entity", &self.name())
            .field("topic", &self.topic())
            .field("state", &self.state())
            .field("rows", &self.len())
            .finish()
    }
}

/// Iterator over the rows selected by a scan
pub struct TableScan {
    rows: std::vec::IntoIter<Arc<Row>>,

    /// Applied to every candidate
    predicate: Option<Predicate>,
}

impl Iterator for TableScan {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        loop {
            let row = self.rows.next()?;
            if self.predicate.as_ref().map_or(true, |p| p.matches(&row)) {
                return Some(row.as_ref().clone());
            }
        }
    }
}
