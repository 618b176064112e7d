//! Tests for store registration, configuration and shutdown
//!
//! These tests verify:
//! - Entity registration is idempotent and rejects conflicting layouts
//! - Topic names, overrides and codecs follow the configuration
//! - Invalid configurations are refused at open
//! - A persistent store reopens with its data and checkpoints
//! - Listeners registered on the store see applied changes
//! - A closed store refuses further work

use std::sync::Arc;

use parking_lot::Mutex;

use logtable::log::LogClient;
use logtable::model::{EntityTypeDescriptor, Key, PropertyType};
use logtable::{
    ChangeEvent, ChangeKind, CodecKind, Config, EntityStore, LogTableError, StorageMode,
    TopicOverrides, WriteBatch,
};

use super::support::*;

// =============================================================================
// Registration Tests
// =============================================================================

#[test]
fn test_register_is_idempotent() {
    let (_log, store) = memory_store(|c| c);

    let again = store.register(blog()).unwrap();
    assert_eq!(again.type_tag(), blog().type_tag());
    assert_eq!(store.entities(), vec!["Blog".to_string()]);
}

#[test]
fn test_register_conflicting_layout() {
    let (_log, store) = memory_store(|c| c);

    let changed = EntityTypeDescriptor::builder("Blog")
        .generated_key("Id", PropertyType::Int64)
        .property("Title", PropertyType::String)
        .build()
        .unwrap();
    assert!(matches!(store.register(changed), Err(LogTableError::Schema(_))));
    assert_eq!(store.descriptor("Blog").unwrap().type_tag(), blog().type_tag());
}

#[test]
fn test_unknown_descriptor() {
    let (_log, store) = memory_store(|c| c);
    assert!(matches!(
        store.descriptor("Nope"),
        Err(LogTableError::UnknownEntity(_))
    ));
}

#[test]
fn test_concurrent_first_use_opens_one_table_per_entity() {
    let (_log, store) = memory_store(|c| c);
    let comment = EntityTypeDescriptor::builder("Comment")
        .key("Id", PropertyType::Int64)
        .property("Body", PropertyType::String)
        .build()
        .unwrap();
    store.register(comment).unwrap();
    let store = Arc::new(store);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            let entity = if i % 2 == 0 { "Blog" } else { "Comment" };
            std::thread::spawn(move || store.table(entity).unwrap())
        })
        .collect();
    let tables: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Every caller of an entity got the same table
    for (i, table) in tables.iter().enumerate() {
        assert!(Arc::ptr_eq(table, &tables[i % 2]));
    }
    assert_eq!(tables[0].name(), "Blog");
    assert_eq!(tables[1].name(), "Comment");

    tables[1].wait_ready(TIMEOUT).unwrap();
    store.close().unwrap();
    assert_eq!(tables[0].state(), logtable::TableState::Closed);
    assert_eq!(tables[1].state(), logtable::TableState::Closed);
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[test]
fn test_topic_naming_and_overrides() {
    let (log, store) = memory_store(|c| {
        c.default_partitions(2).topic_override(
            "Blog",
            TopicOverrides {
                partitions: Some(6),
                codec: Some(CodecKind::Json),
                ..Default::default()
            },
        )
    });

    let table = store.table("Blog").unwrap();
    assert_eq!(table.topic(), "blogdb.Blog");
    assert_eq!(table.codec().kind(), CodecKind::Json);
    assert_eq!(log.partition_count("blogdb.Blog").unwrap(), 6);
}

#[test]
fn test_invalid_config_refused() {
    let bad = [
        base_config().default_partitions(0).build(),
        base_config().database_name("").build(),
        base_config().retry_backoff_ms(50, 10).build(),
        base_config().checkpoint_interval(0).build(),
    ];
    for config in bad {
        assert!(matches!(
            EntityStore::open_in_memory(config),
            Err(LogTableError::Config(_))
        ));
    }
}

#[test]
fn test_each_codec_round_trips_through_store() {
    for codec in [CodecKind::Binary, CodecKind::TaggedJson, CodecKind::Json] {
        let (_log, store) = memory_store(|c| c.default_codec(codec).read_your_writes(true));

        let result = store
            .save(&WriteBatch::new().insert("Blog", new_blog("codec")))
            .unwrap();
        let key = result.keys[0].clone();

        // Wait for ingestion to apply the record itself, not just the local copy
        let table = store.table("Blog").unwrap();
        assert!(wait_until(|| table.applied_offsets().values().sum::<u64>() == 1));
        assert_eq!(table.stats().poison_records, 0, "{} codec", codec);
        assert_eq!(title_of(&store.get("Blog", key).unwrap().unwrap()), "codec");
    }
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_file_store_reopens_with_data() {
    let (dir, store) = setup_temp_store();
    let result = store
        .save(
            &WriteBatch::new()
                .insert("Blog", new_blog("one"))
                .insert("Blog", new_blog("two")),
        )
        .unwrap();
    assert!(wait_until(|| row_count(&store, "Blog") == 2));
    store.close().unwrap();

    let checkpoint = dir.path().join("checkpoints").join("tests").join("Blog.ckpt");
    assert!(checkpoint.is_file());

    let store = open_file_store(&dir);
    assert_eq!(row_count(&store, "Blog"), 2);
    let row = store.get("Blog", result.keys[1].clone()).unwrap().unwrap();
    assert_eq!(title_of(&row), "two");
}

#[test]
fn test_ephemeral_file_store_writes_no_checkpoints() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = base_config()
        .data_dir(dir.path())
        .storage_mode(StorageMode::Ephemeral)
        .build();
    {
        let store = EntityStore::open(config.clone()).unwrap();
        store.register(blog()).unwrap();
        store.save(&WriteBatch::new().insert("Blog", new_blog("x"))).unwrap();
        store.close().unwrap();
    }
    assert!(!dir.path().join("checkpoints").exists());

    // Full replay still finds the row
    let store = EntityStore::open(config).unwrap();
    store.register(blog()).unwrap();
    assert_eq!(row_count(&store, "Blog"), 1);
}

#[test]
fn test_checkpoints_over_a_fresh_log_do_not_hide_writes() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = || base_config().data_dir(dir.path()).build();
    {
        let store = EntityStore::open_with_log(config(), Arc::new(logtable::MemoryLog::new())).unwrap();
        store.register(blog()).unwrap();
        let batch = (0..3).fold(WriteBatch::new(), |b, i| b.insert("Blog", new_blog(&format!("old{}", i))));
        store.save(&batch).unwrap();
        assert!(wait_until(|| row_count(&store, "Blog") == 3));
        store.close().unwrap();
    }

    // The checkpoint stays on disk, the in-memory log is gone
    let store = EntityStore::open_with_log(config(), Arc::new(logtable::MemoryLog::new())).unwrap();
    store.register(blog()).unwrap();
    assert_eq!(row_count(&store, "Blog"), 0);

    let result = store
        .save(&WriteBatch::new().insert("Blog", new_blog("fresh")))
        .unwrap();
    let key = result.keys[0].clone();
    assert!(wait_until(|| store.get("Blog", key.clone()).unwrap().is_some()));
    assert_eq!(title_of(&store.get("Blog", key).unwrap().unwrap()), "fresh");
    assert_eq!(row_count(&store, "Blog"), 1);
}

// =============================================================================
// Listener Tests
// =============================================================================

#[test]
fn test_store_listener_sees_changes() {
    let (_log, store) = memory_store(|c| c);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let token = store
        .register_listener(move |event: &ChangeEvent| {
            sink.lock().push((event.kind, event.key.clone()));
            Ok(())
        })
        .unwrap();

    store.save(&WriteBatch::new().insert("Blog", new_blog("a"))).unwrap();
    store.save(&WriteBatch::new().update("Blog", blog_row(1, "b"))).unwrap();
    store.save(&WriteBatch::new().delete("Blog", Key::single(1))).unwrap();

    assert!(wait_until(|| events.lock().len() == 3));
    let key = Key::single(1);
    assert_eq!(
        *events.lock(),
        vec![
            (ChangeKind::Added, key.clone()),
            (ChangeKind::Updated, key.clone()),
            (ChangeKind::Removed, key),
        ]
    );

    assert!(store.unregister_listener(token));
    assert!(!store.unregister_listener(token));
}

// =============================================================================
// Shutdown Tests
// =============================================================================

#[test]
fn test_closed_store_refuses_work() {
    let (_log, store) = memory_store(|c| c);
    let table = store.table("Blog").unwrap();

    store.close().unwrap();
    store.close().unwrap();

    assert!(matches!(
        store.save(&WriteBatch::new().insert("Blog", new_blog("late"))),
        Err(LogTableError::Closed(_))
    ));
    assert!(matches!(store.table("Blog"), Err(LogTableError::Closed(_))));
    assert!(matches!(store.register(blog()), Err(LogTableError::Closed(_))));
    assert!(matches!(
        table.get(&Key::single(1)),
        Err(LogTableError::Closed(_))
    ));
}

#[test]
fn test_default_config_is_valid() {
    assert!(Config::default().validate().is_ok());
}
