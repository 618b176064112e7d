//! Shared helpers for store tests

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use logtable::config::ConfigBuilder;
use logtable::model::{EntityTypeDescriptor, PropertyType, Row, Value};
use logtable::{row, Config, EntityStore, MemoryLog, StorageMode};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Blog(Id: Int32 generated key, Title: String, Rating: Float32 nullable)
pub fn blog() -> EntityTypeDescriptor {
    EntityTypeDescriptor::builder("Blog")
        .generated_key("Id", PropertyType::Int32)
        .property("Title", PropertyType::String)
        .nullable("Rating", PropertyType::Float32)
        .build()
        .unwrap()
}

/// Blog row with the key left for the store to generate
pub fn new_blog(title: &str) -> Row {
    row![Value::Null, title, Value::Null]
}

pub fn blog_row(id: i32, title: &str) -> Row {
    row![id, title, Value::Null]
}

/// Fast polling and short backoffs
pub fn base_config() -> ConfigBuilder {
    Config::builder()
        .database_name("blogdb")
        .application_id("tests")
        .poll_interval_ms(10)
        .retry_backoff_ms(5, 20)
        .append_timeout_ms(1_000)
}

/// In-memory store with nothing written to disk
pub fn memory_store(configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> (Arc<MemoryLog>, EntityStore) {
    let log = Arc::new(MemoryLog::new());
    let config = configure(base_config().storage_mode(StorageMode::Ephemeral)).build();
    let store = EntityStore::open_with_log(config, log.clone()).unwrap();
    store.register(blog()).unwrap();
    (log, store)
}

/// File-backed store under a fresh temp directory
pub fn setup_temp_store() -> (TempDir, EntityStore) {
    let dir = TempDir::new().unwrap();
    let store = open_file_store(&dir);
    (dir, store)
}

pub fn open_file_store(dir: &TempDir) -> EntityStore {
    let config = base_config().data_dir(dir.path()).build();
    let store = EntityStore::open(config).unwrap();
    store.register(blog()).unwrap();
    store
}

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

pub fn row_count(store: &EntityStore, entity: &str) -> usize {
    store.scan(entity, None).unwrap().count()
}

pub fn title_of(row: &Row) -> String {
    row.get(1).and_then(Value::as_str).unwrap().to_string()
}
