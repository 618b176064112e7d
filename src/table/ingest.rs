//! Ingestion loop
//!
//! One thread per table tails the entity's topic and applies every record.
//!
//! ## Loop
//! 1. Subscribe from the table's next offsets (on first start and after any
//!    failure); while hydrating, read the high watermarks as the target and
//!    drop restored state that is ahead of them
//! 2. Poll one record, decode it, apply it
//! 3. Mark the table `Ready` once every partition reached the target
//! 4. Checkpoint every `checkpoint_interval` records
//!
//! Subscribe and poll failures drop the subscription and retry after an
//! exponential backoff. Records that fail to decode are skipped.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{LogTableError, Result};
use crate::log::{LogClient, LogRecord, PartitionOffsets, Subscription};
use crate::model::{Key, Row};

use super::data::TableData;
use super::{TableOptions, TableShared};

/// First partition whose next offset lies past the log's end
fn beyond(next: &PartitionOffsets, high: &PartitionOffsets) -> Option<(u32, u64)> {
    next.iter()
        .find(|(partition, next)| **next > high.get(partition).copied().unwrap_or(0))
        .map(|(partition, next)| (*partition, *next))
}

/// Start the ingestion thread of a table
pub(crate) fn spawn(
    shared: Arc<TableShared>,
    log: Arc<dyn LogClient>,
    options: &TableOptions,
) -> Result<JoinHandle<()>> {
    let ingestor = Ingestor {
        topic: options.topic.name.clone(),
        poll_interval: options.poll_interval,
        backoff_initial: options.retry_backoff_initial,
        backoff_max: options.retry_backoff_max,
        backoff: options.retry_backoff_initial,
        checkpoint_interval: options.checkpoint_interval,
        checkpoint_path: options.checkpoint_path.clone(),
        subscription: None,
        hydration_target: None,
        since_checkpoint: 0,
        shared,
        log,
    };

    let handle = thread::Builder::new()
        .name(format!("ingest-{}", ingestor.shared.descriptor.name()))
        .spawn(move || ingestor.run())?;
    Ok(handle)
}

struct Ingestor {
    shared: Arc<TableShared>,
    log: Arc<dyn LogClient>,
    topic: String,

    poll_interval: Duration,
    backoff_initial: Duration,
    backoff_max: Duration,

    /// Delay before the next reconnect attempt
    backoff: Duration,

    checkpoint_interval: u64,
    checkpoint_path: Option<PathBuf>,

    subscription: Option<Box<dyn Subscription>>,

    /// High watermarks to reach before the table is ready
    hydration_target: Option<PartitionOffsets>,

    /// Records ingested since the last checkpoint
    since_checkpoint: u64,
}

impl Ingestor {
    fn run(mut self) {
        tracing::debug!(topic = %self.topic, "ingestion started");

        while !self.shared.shutdown.load(Ordering::Acquire) {
            if self.subscription.is_none() {
                if let Err(e) = self.connect() {
                    self.retry_later("subscribe", &e);
                    continue;
                }
                self.check_hydrated();
            }

            let Some(subscription) = self.subscription.as_mut() else {
                continue;
            };
            match subscription.poll(self.poll_interval) {
                Ok(Some(record)) => {
                    self.backoff = self.backoff_initial;
                    self.ingest(record);
                }
                Ok(None) => {
                    self.backoff = self.backoff_initial;
                }
                Err(e) => {
                    self.subscription = None;
                    self.retry_later("poll", &e);
                    continue;
                }
            }

            self.check_hydrated();
            if self.since_checkpoint >= self.checkpoint_interval {
                self.write_checkpoint();
            }
        }

        tracing::debug!(topic = %self.topic, "ingestion stopped");
    }

    /// Subscribe from the table's current offsets
    fn connect(&mut self) -> Result<()> {
        let mut from = self.shared.data.read().next_offsets();

        if !self.shared.is_ready() {
            let target = self.log.high_watermarks(&self.topic)?;

            // A restored checkpoint may cover offsets the log no longer has;
            // new records would reuse them and be dropped as already applied
            if let Some((partition, next)) = beyond(&from, &target) {
                tracing::warn!(
                    topic = %self.topic,
                    partition,
                    checkpoint_next = next,
                    log_next = target.get(&partition).copied().unwrap_or(0),
                    "checkpoint is ahead of the log, replaying the full log"
                );
                *self.shared.data.write() = TableData::new();
                from = PartitionOffsets::new();
            }

            tracing::debug!(topic = %self.topic, ?from, ?target, "hydrating");
            self.hydration_target = Some(target);
        }

        self.subscription = Some(self.log.subscribe(&self.topic, &from)?);
        Ok(())
    }

    fn ingest(&mut self, record: LogRecord) {
        let position = record.position;
        match self.decode(&record) {
            Ok((key, row)) => {
                self.shared.apply_record(key, row, position, false);
            }
            Err(e) => {
                tracing::error!(
                    topic = %self.topic,
                    %position,
                    error = %e,
                    "skipping undecodable record"
                );
                self.shared.stats.poison_records.fetch_add(1, Ordering::Relaxed);
                self.shared.data.write().skip(position);
            }
        }
        self.since_checkpoint += 1;
    }

    fn decode(&self, record: &LogRecord) -> Result<(Key, Option<Row>)> {
        let descriptor = &self.shared.descriptor;
        let key = self.shared.codec.decode_key(descriptor, &record.key)?;
        let row = record
            .value
            .as_ref()
            .map(|container| self.shared.codec.decode(descriptor, container))
            .transpose()?;

        if let Some(row) = &row {
            let row_key = descriptor.key_of(row)?;
            if row_key != key {
                return Err(LogTableError::codec(
                    descriptor.name(),
                    "<key>",
                    format!("record key {} does not match row key {}", key, row_key),
                ));
            }
        }
        Ok((key, row))
    }

    fn check_hydrated(&mut self) {
        let Some(target) = &self.hydration_target else {
            return;
        };
        let next = self.shared.data.read().next_offsets();
        let caught_up = target
            .iter()
            .all(|(partition, high)| next.get(partition).copied().unwrap_or(0) >= *high);
        if !caught_up {
            return;
        }

        self.hydration_target = None;
        self.shared.seed_generator();
        if self.shared.mark_ready() {
            tracing::info!(
                topic = %self.topic,
                rows = self.shared.data.read().len(),
                "table ready"
            );
        }
    }

    fn retry_later(&mut self, operation: &str, error: &LogTableError) {
        self.shared.stats.reconnects.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            topic = %self.topic,
            operation,
            error = %error,
            retry_in_ms = self.backoff.as_millis() as u64,
            "ingestion failed, reconnecting"
        );

        // Sleep in short steps so close() is not held up by a long backoff
        let deadline = Instant::now() + self.backoff;
        let step = self.poll_interval.min(Duration::from_millis(50));
        while !self.shared.shutdown.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(step.min(deadline - now));
        }

        self.backoff = (self.backoff * 2).min(self.backoff_max);
    }

    fn write_checkpoint(&mut self) {
        self.since_checkpoint = 0;
        let Some(path) = &self.checkpoint_path else {
            return;
        };
        match self.shared.checkpoint().save(path) {
            Ok(()) => {
                self.shared.stats.checkpoints_written.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(topic = %self.topic, path = %path.display(), "checkpoint written");
            }
            Err(e) => {
                tracing::warn!(topic = %self.topic, error = %e, "checkpoint failed");
            }
        }
    }
}
