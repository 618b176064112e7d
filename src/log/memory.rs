//! In-memory log
//!
//! A process-local broker: topics are vectors of records guarded by one
//! mutex per topic, and subscribers park on a condvar until new records
//! arrive. Suitable for ephemeral stores and tests; it can also inject
//! broker failures to exercise retry paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::codec::ValueContainer;
use crate::error::{LogTableError, Result};

use super::{
    check_topic_spec, now_millis, partition_for, LogClient, LogPosition, LogRecord,
    PartitionOffsets, Subscription, TopicSpec,
};

/// In-process partitioned log
#[derive(Default)]
pub struct MemoryLog {
    topics: RwLock<HashMap<String, Arc<MemoryTopic>>>,
    faults: Arc<FaultInjector>,
}

struct MemoryTopic {
    spec: TopicSpec,

    /// One record vector per partition; index == offset
    partitions: Mutex<Vec<Vec<LogRecord>>>,

    /// Signalled on every append
    appended: Condvar,
}

#[derive(Default)]
struct FaultInjector {
    failing_appends: AtomicUsize,
    failing_polls: AtomicUsize,
    unavailable: AtomicBool,
}

impl FaultInjector {
    /// Consume one pending failure from a counter
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_append(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) || Self::take(&self.failing_appends) {
            return Err(LogTableError::BrokerUnavailable("append rejected".to_string()));
        }
        Ok(())
    }

    fn check_read(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) || Self::take(&self.failing_polls) {
            return Err(LogTableError::BrokerUnavailable("fetch rejected".to_string()));
        }
        Ok(())
    }
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` appends fail with `BrokerUnavailable`
    pub fn fail_next_appends(&self, count: usize) {
        self.faults.failing_appends.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` subscription polls fail with `BrokerUnavailable`
    pub fn fail_next_polls(&self, count: usize) {
        self.faults.failing_polls.store(count, Ordering::SeqCst);
    }

    /// Fail every append, subscribe and poll until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Names of all topics
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Total records (tombstones included) across all partitions of a topic
    pub fn record_count(&self, topic: &str) -> Result<usize> {
        let topic = self.topic(topic)?;
        let partitions = topic.partitions.lock();
        Ok(partitions.iter().map(Vec::len).sum())
    }

    fn topic(&self, name: &str) -> Result<Arc<MemoryTopic>> {
        self.topics
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| LogTableError::UnknownTopic(name.to_string()))
    }
}

impl LogClient for MemoryLog {
    fn ensure_topic(&self, spec: &TopicSpec) -> Result<()> {
        let mut topics = self.topics.write();
        check_topic_spec(topics.get(&spec.name).map(|t| &t.spec), spec)?;
        if !topics.contains_key(&spec.name) {
            tracing::debug!(topic = %spec.name, partitions = spec.partitions, "creating in-memory topic");
            topics.insert(
                spec.name.clone(),
                Arc::new(MemoryTopic {
                    spec: spec.clone(),
                    partitions: Mutex::new(vec![Vec::new(); spec.partitions as usize]),
                    appended: Condvar::new(),
                }),
            );
        }
        Ok(())
    }

    fn partition_count(&self, topic: &str) -> Result<u32> {
        Ok(self.topic(topic)?.spec.partitions)
    }

    fn append(
        &self,
        topic: &str,
        key: &[u8],
        value: Option<&ValueContainer>,
        timeout: Duration,
    ) -> Result<LogPosition> {
        self.faults.check_append()?;
        let topic = self.topic(topic)?;
        let partition = partition_for(key, topic.spec.partitions);

        let position = {
            let mut partitions = topic.partitions.try_lock_for(timeout).ok_or_else(|| {
                LogTableError::Timeout {
                    operation: format!("append to {}", topic.spec.name),
                    after_ms: timeout.as_millis() as u64,
                }
            })?;
            let records = &mut partitions[partition as usize];
            let position = LogPosition {
                partition,
                offset: records.len() as u64,
            };
            records.push(LogRecord {
                key: Bytes::copy_from_slice(key),
                value: value.cloned(),
                position,
                timestamp: now_millis(),
            });
            position
        };

        topic.appended.notify_all();
        Ok(position)
    }

    fn subscribe(&self, topic: &str, from: &PartitionOffsets) -> Result<Box<dyn Subscription>> {
        self.faults.check_read()?;
        let topic = self.topic(topic)?;
        let next = (0..topic.spec.partitions)
            .map(|p| from.get(&p).copied().unwrap_or(0))
            .collect();
        Ok(Box::new(MemorySubscription {
            topic,
            next,
            cursor: 0,
            faults: Arc::clone(&self.faults),
        }))
    }

    fn high_watermarks(&self, topic: &str) -> Result<PartitionOffsets> {
        let topic = self.topic(topic)?;
        let partitions = topic.partitions.lock();
        Ok(partitions
            .iter()
            .enumerate()
            .map(|(p, records)| (p as u32, records.len() as u64))
            .collect())
    }
}

/// Read cursor over a MemoryLog topic
struct MemorySubscription {
    topic: Arc<MemoryTopic>,

    /// Next offset per partition
    next: Vec<u64>,

    /// Partition to inspect first on the next poll (round-robin fairness)
    cursor: usize,

    faults: Arc<FaultInjector>,
}

impl Subscription for MemorySubscription {
    fn poll(&mut self, timeout: Duration) -> Result<Option<LogRecord>> {
        self.faults.check_read()?;
        let deadline = Instant::now() + timeout;
        let mut partitions = self.topic.partitions.lock();

        loop {
            let count = partitions.len();
            for i in 0..count {
                let p = (self.cursor + i) % count;
                let next = self.next[p] as usize;
                if let Some(record) = partitions[p].get(next) {
                    let record = record.clone();
                    self.next[p] += 1;
                    self.cursor = (p + 1) % count;
                    return Ok(Some(record));
                }
            }

            if self.topic.appended.wait_until(&mut partitions, deadline).timed_out() {
                return Ok(None);
            }
        }
    }
}
