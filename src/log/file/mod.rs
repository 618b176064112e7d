//! File-backed log
//!
//! Each topic is a directory holding its settings and one segment file per
//! partition:
//!
//! ```text
//! {root}/
//!   └── {topic}/
//!         ├── topic.meta            (bincode TopicSpec)
//!         ├── partition-00000.log
//!         └── partition-00001.log
//! ```
//!
//! ## Segment Entry Format
//! ```text
//! ┌──────────────┬─────────┬──────────┬────────────────────────────┐
//! │ Offset (8)   │ CRC (4) │ Len (4)  │ bincode(SegmentRecord)     │
//! └──────────────┴─────────┴──────────┴────────────────────────────┘
//! ```
//!
//! On open every segment is recovered: a torn or corrupted tail is cut off
//! so appends continue after the last valid entry.

mod reader;
mod recovery;
mod segment;
mod writer;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::codec::ValueContainer;
use crate::config::SegmentSyncStrategy;
use crate::error::{LogTableError, Result};

use super::{
    check_topic_spec, now_millis, partition_for, LogClient, LogPosition, LogRecord,
    PartitionOffsets, Subscription, TopicSpec,
};

pub use reader::{SegmentIterator, SegmentReader};
pub use recovery::{RecoveryResult, SegmentRecovery};
pub use segment::{SegmentEntry, SegmentRecord};

use writer::SegmentWriter;

const META_FILE: &str = "topic.meta";

/// Partitioned log stored in local segment files
pub struct FileLog {
    root: PathBuf,
    sync_strategy: SegmentSyncStrategy,

    /// Upper bound on how long a subscriber sleeps before re-checking its
    /// segments; catches appends made by other processes
    poll_interval: Duration,

    topics: RwLock<HashMap<String, Arc<FileTopic>>>,
}

struct FileTopic {
    spec: TopicSpec,
    dir: PathBuf,

    /// One writer per partition
    writers: Vec<Mutex<SegmentWriter>>,

    signal: Arc<AppendSignal>,
}

/// Wakes subscribers of a topic after an append
#[derive(Default)]
struct AppendSignal {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl AppendSignal {
    fn notify(&self) {
        *self.generation.lock() += 1;
        self.cond.notify_all();
    }

    fn current(&self) -> u64 {
        *self.generation.lock()
    }

    /// Wait until the generation moves past `seen` or the timeout elapses
    fn wait(&self, seen: u64, timeout: Duration) {
        let mut generation = self.generation.lock();
        if *generation == seen {
            self.cond.wait_for(&mut generation, timeout);
        }
    }
}

impl FileLog {
    /// Open the log under `root`, recovering every existing topic
    pub fn open(
        root: impl AsRef<Path>,
        sync_strategy: SegmentSyncStrategy,
        poll_interval: Duration,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let mut topics = HashMap::new();
        for dir_entry in fs::read_dir(&root)? {
            let dir = dir_entry?.path();
            if !dir.join(META_FILE).is_file() {
                continue;
            }
            let spec = Self::read_topic_spec(&dir)?;
            let topic = FileTopic::open(dir, spec, sync_strategy)?;
            topics.insert(topic.spec.name.clone(), Arc::new(topic));
        }

        tracing::info!(root = %root.display(), topics = topics.len(), "file log opened");

        Ok(Self {
            root,
            sync_strategy,
            poll_interval,
            topics: RwLock::new(topics),
        })
    }

    /// Settings of every topic, sorted by name
    pub fn topics(&self) -> Vec<TopicSpec> {
        let mut specs: Vec<TopicSpec> = self.topics.read().values().map(|t| t.spec.clone()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Directory of a topic under a log root
    pub fn topic_dir(root: &Path, topic: &str) -> PathBuf {
        root.join(topic)
    }

    /// Segment file of one partition inside a topic directory
    pub fn segment_path(topic_dir: &Path, partition: u32) -> PathBuf {
        topic_dir.join(format!("partition-{:05}.log", partition))
    }

    /// Read topic settings without opening (and recovering) its segments
    pub fn read_topic_spec(topic_dir: &Path) -> Result<TopicSpec> {
        let bytes = fs::read(topic_dir.join(META_FILE))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    fn write_topic_spec(topic_dir: &Path, spec: &TopicSpec) -> Result<()> {
        let tmp = topic_dir.join(format!("{}.tmp", META_FILE));
        fs::write(&tmp, bincode::serialize(spec)?)?;
        fs::rename(&tmp, topic_dir.join(META_FILE))?;
        Ok(())
    }

    fn topic(&self, name: &str) -> Result<Arc<FileTopic>> {
        self.topics
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| LogTableError::UnknownTopic(name.to_string()))
    }
}

impl FileTopic {
    fn open(dir: PathBuf, spec: TopicSpec, sync_strategy: SegmentSyncStrategy) -> Result<Self> {
        let mut writers = Vec::with_capacity(spec.partitions as usize);
        for partition in 0..spec.partitions {
            let path = FileLog::segment_path(&dir, partition);
            let (writer, recovery) = SegmentWriter::open(&path, sync_strategy)?;
            if recovery.entries_recovered > 0 {
                tracing::debug!(
                    topic = %spec.name,
                    partition,
                    entries = recovery.entries_recovered,
                    "segment recovered"
                );
            }
            writers.push(Mutex::new(writer));
        }

        Ok(Self {
            spec,
            dir,
            writers,
            signal: Arc::new(AppendSignal::default()),
        })
    }
}

impl LogClient for FileLog {
    fn ensure_topic(&self, spec: &TopicSpec) -> Result<()> {
        if spec.name.is_empty()
            || spec.name.starts_with('.')
            || spec.name.contains(['/', '\\'])
        {
            return Err(LogTableError::Config(format!(
                "invalid topic name for a file log: {:?}",
                spec.name
            )));
        }

        let mut topics = self.topics.write();
        check_topic_spec(topics.get(&spec.name).map(|t| &t.spec), spec)?;
        if topics.contains_key(&spec.name) {
            return Ok(());
        }

        let dir = Self::topic_dir(&self.root, &spec.name);
        fs::create_dir_all(&dir)?;
        Self::write_topic_spec(&dir, spec)?;
        let topic = FileTopic::open(dir, spec.clone(), self.sync_strategy)?;

        tracing::info!(topic = %spec.name, partitions = spec.partitions, "topic created");
        topics.insert(spec.name.clone(), Arc::new(topic));
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
        let topic = self.topic(topic)?;
        let partition = partition_for(key, topic.spec.partitions);

        let offset = {
            let mut writer = topic.writers[partition as usize]
                .try_lock_for(timeout)
                .ok_or_else(|| LogTableError::Timeout {
                    operation: format!("append to {}", topic.spec.name),
                    after_ms: timeout.as_millis() as u64,
                })?;
            writer.append(SegmentRecord {
                key: key.to_vec(),
                value: value.cloned(),
                timestamp: now_millis(),
            })?
        };

        topic.signal.notify();
        Ok(LogPosition { partition, offset })
    }

    fn subscribe(&self, topic: &str, from: &PartitionOffsets) -> Result<Box<dyn Subscription>> {
        let topic = self.topic(topic)?;
        let mut readers = Vec::with_capacity(topic.spec.partitions as usize);
        for partition in 0..topic.spec.partitions {
            let start = from.get(&partition).copied().unwrap_or(0);
            let path = Self::segment_path(&topic.dir, partition);
            readers.push(SegmentReader::open_at(&path, start)?);
        }

        Ok(Box::new(FileSubscription {
            readers,
            cursor: 0,
            signal: Arc::clone(&topic.signal),
            poll_interval: self.poll_interval,
        }))
    }

    fn high_watermarks(&self, topic: &str) -> Result<PartitionOffsets> {
        let topic = self.topic(topic)?;
        Ok(topic
            .writers
            .iter()
            .enumerate()
            .map(|(p, writer)| (p as u32, writer.lock().next_offset()))
            .collect())
    }

    fn flush(&self) -> Result<()> {
        let topics: Vec<Arc<FileTopic>> = self.topics.read().values().cloned().collect();
        for topic in topics {
            for writer in &topic.writers {
                writer.lock().sync()?;
            }
        }
        Ok(())
    }
}

/// Tails the segment files of one topic
struct FileSubscription {
    /// One reader per partition; index == partition
    readers: Vec<SegmentReader>,

    /// Partition to inspect first on the next poll (round-robin fairness)
    cursor: usize,

    signal: Arc<AppendSignal>,
    poll_interval: Duration,
}

impl Subscription for FileSubscription {
    fn poll(&mut self, timeout: Duration) -> Result<Option<LogRecord>> {
        let deadline = Instant::now() + timeout;
        let count = self.readers.len();

        loop {
            let seen = self.signal.current();
            for i in 0..count {
                let p = (self.cursor + i) % count;
                if let Some(entry) = self.readers[p].next_entry()? {
                    self.cursor = (p + 1) % count;
                    return Ok(Some(entry.into_log_record(p as u32)));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.signal.wait(seen, self.poll_interval.min(deadline - now));
        }
    }
}
