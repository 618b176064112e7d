//! Shared helpers for table tests

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use logtable::codec::{codec_for, EntityCodec};
use logtable::feed::ChangeFeed;
use logtable::log::{LogClient, LogPosition, MemoryLog, TopicSpec};
use logtable::model::{EntityTypeDescriptor, Key, PropertyType, Row, Value};
use logtable::table::TableOptions;
use logtable::{row, ChangeEvent, CodecKind, MaterializedTable};

pub const TOPIC: &str = "test.Note";
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Note(Id: Int64 key, Title: String, Stars: Int32 nullable)
pub fn note_descriptor() -> Arc<EntityTypeDescriptor> {
    Arc::new(
        EntityTypeDescriptor::builder("Note")
            .key("Id", PropertyType::Int64)
            .property("Title", PropertyType::String)
            .nullable("Stars", PropertyType::Int32)
            .build()
            .unwrap(),
    )
}

pub fn note(id: i64, title: &str, stars: Option<i32>) -> Row {
    row![id, title, stars]
}

pub fn codec() -> Arc<dyn EntityCodec> {
    codec_for(CodecKind::Binary)
}

/// Fast polling and short backoffs so failure tests finish quickly
pub fn options(partitions: u32) -> TableOptions {
    let mut options = TableOptions::new(TopicSpec {
        name: TOPIC.to_string(),
        partitions,
        replication_factor: 1,
    });
    options.poll_interval = Duration::from_millis(10);
    options.retry_backoff_initial = Duration::from_millis(5);
    options.retry_backoff_max = Duration::from_millis(20);
    options
}

pub fn setup_log(partitions: u32) -> Arc<MemoryLog> {
    let log = Arc::new(MemoryLog::new());
    log.ensure_topic(&options(partitions).topic).unwrap();
    log
}

pub fn open_table(log: Arc<dyn LogClient>, options: TableOptions) -> MaterializedTable {
    open_table_with_feed(log, options, Arc::new(ChangeFeed::new("test")))
}

pub fn open_table_with_feed(
    log: Arc<dyn LogClient>,
    options: TableOptions,
    feed: Arc<ChangeFeed>,
) -> MaterializedTable {
    MaterializedTable::open(log, note_descriptor(), codec(), feed, options).unwrap()
}

/// Encode and append a row the way the write path does
pub fn append_row(log: &dyn LogClient, row: &Row) -> LogPosition {
    let desc = note_descriptor();
    let codec = codec();
    let key = desc.key_of(row).unwrap();
    let container = codec.encode(&desc, row).unwrap();
    log.append(TOPIC, &codec.encode_key(&key).unwrap(), Some(&container), TIMEOUT)
        .unwrap()
}

pub fn append_tombstone(log: &dyn LogClient, id: i64) -> LogPosition {
    let key = codec().encode_key(&Key::single(id)).unwrap();
    log.append(TOPIC, &key, None, TIMEOUT).unwrap()
}

/// Poll `condition` until it holds or `TIMEOUT` passes
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Register a listener that records every event
pub fn collect_events(feed: &ChangeFeed) -> Arc<Mutex<Vec<ChangeEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    feed.register(move |event: &ChangeEvent| {
        sink.lock().push(event.clone());
        Ok(())
    })
    .unwrap();
    events
}

pub fn title_of(row: &Row) -> &str {
    row.get(1).and_then(Value::as_str).unwrap()
}
