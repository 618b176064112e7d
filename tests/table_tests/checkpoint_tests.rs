//! Tests for table checkpoints
//!
//! These tests verify:
//! - Closing a table writes a checkpoint of its rows and offsets
//! - Reopening resumes from the checkpoint and replays only the rest
//! - Incompatible or unreadable checkpoints fall back to a full replay
//! - A checkpoint ahead of the log is dropped so new records are not lost
//! - Periodic checkpoints during ingestion

use std::fs;

use tempfile::TempDir;

use logtable::log::LogClient;
use logtable::model::Key;
use logtable::table::{Checkpoint, TableOptions};

use super::support::*;

// =============================================================================
// Helper Functions
// =============================================================================

fn checkpointed_options(dir: &TempDir) -> TableOptions {
    let mut options = options(2);
    options.checkpoint_path = Some(dir.path().join("checkpoints").join("Note.ckpt"));
    options
}

// =============================================================================
// Resume Tests
// =============================================================================

#[test]
fn test_close_writes_checkpoint() {
    let dir = TempDir::new().unwrap();
    let log = setup_log(2);
    for id in 0..10 {
        append_row(&*log, &note(id, "x", None));
    }

    let options = checkpointed_options(&dir);
    let path = options.checkpoint_path.clone().unwrap();
    let table = open_table(log, options);
    table.wait_ready(TIMEOUT).unwrap();
    table.close().unwrap();

    let checkpoint = Checkpoint::load(&path).unwrap().unwrap();
    assert_eq!(checkpoint.type_tag, note_descriptor().type_tag());
    assert_eq!(checkpoint.rows.len(), 10);
    assert_eq!(checkpoint.offsets.values().sum::<u64>(), 10);

    // Rows are stored in key order
    let keys: Vec<Key> = checkpoint.rows.iter().map(|(key, _)| key.clone()).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

#[test]
fn test_reopen_resumes_from_checkpoint() {
    let dir = TempDir::new().unwrap();
    let log = setup_log(2);
    for id in 0..10 {
        append_row(&*log, &note(id, "before", None));
    }

    {
        let table = open_table(log.clone(), checkpointed_options(&dir));
        table.wait_ready(TIMEOUT).unwrap();
        table.close().unwrap();
    }

    // Written while no table was open
    append_row(&*log, &note(3, "after", None));
    append_tombstone(&*log, 4);

    let table = open_table(log.clone(), checkpointed_options(&dir));
    table.wait_ready(TIMEOUT).unwrap();

    assert_eq!(table.len(), 9);
    assert_eq!(title_of(&table.get(&Key::single(3i64)).unwrap().unwrap()), "after");
    assert_eq!(table.get(&Key::single(4i64)).unwrap(), None);

    // Only the two records after the checkpoint were read
    assert_eq!(table.stats().records_applied, 2);
}

#[test]
fn test_layout_change_replays_full_log() {
    let dir = TempDir::new().unwrap();
    let log = setup_log(2);
    for id in 0..5 {
        append_row(&*log, &note(id, "x", None));
    }

    let options = checkpointed_options(&dir);
    let path = options.checkpoint_path.clone().unwrap();
    Checkpoint {
        type_tag: "Note#deadbeef".to_string(),
        offsets: log.high_watermarks(TOPIC).unwrap(),
        rows: Vec::new(),
    }
    .save(&path)
    .unwrap();

    let table = open_table(log, options);
    table.wait_ready(TIMEOUT).unwrap();

    assert_eq!(table.len(), 5);
    assert_eq!(table.stats().records_applied, 5);
}

#[test]
fn test_unreadable_checkpoint_replays_full_log() {
    let dir = TempDir::new().unwrap();
    let log = setup_log(2);
    for id in 0..5 {
        append_row(&*log, &note(id, "x", None));
    }

    let options = checkpointed_options(&dir);
    let path = options.checkpoint_path.clone().unwrap();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"not a checkpoint").unwrap();

    let table = open_table(log, options);
    table.wait_ready(TIMEOUT).unwrap();
    assert_eq!(table.len(), 5);
}

#[test]
fn test_checkpoint_ahead_of_log_is_discarded() {
    let dir = TempDir::new().unwrap();
    {
        let log = setup_log(2);
        for id in 0..10 {
            append_row(&*log, &note(id, "old", None));
        }
        let table = open_table(log, checkpointed_options(&dir));
        table.wait_ready(TIMEOUT).unwrap();
        table.close().unwrap();
    }

    // Same checkpoint, but the log starts over from offset 0
    let log = setup_log(2);
    let table = open_table(log.clone(), checkpointed_options(&dir));
    table.wait_ready(TIMEOUT).unwrap();
    assert!(table.is_empty());
    assert!(table.applied_offsets().is_empty());

    // Records at offsets the checkpoint claimed are applied, not skipped
    append_row(&*log, &note(42, "fresh", None));
    append_row(&*log, &note(1, "again", None));
    assert!(wait_until(|| table.len() == 2));
    assert_eq!(title_of(&table.get(&Key::single(42i64)).unwrap().unwrap()), "fresh");
    assert_eq!(title_of(&table.get(&Key::single(1i64)).unwrap().unwrap()), "again");
    assert_eq!(table.stats().records_skipped, 0);
}

#[test]
fn test_checkpoint_partly_ahead_of_log_is_discarded() {
    let dir = TempDir::new().unwrap();
    let log = setup_log(2);
    for id in 0..10 {
        append_row(&*log, &note(id, "x", None));
    }

    let options = checkpointed_options(&dir);
    let path = options.checkpoint_path.clone().unwrap();
    let mut offsets = log.high_watermarks(TOPIC).unwrap();
    *offsets.get_mut(&0).unwrap() += 3;
    Checkpoint {
        type_tag: note_descriptor().type_tag().to_string(),
        offsets,
        rows: vec![(Key::single(999i64), note(999, "ghost", None))],
    }
    .save(&path)
    .unwrap();

    let table = open_table(log, options);
    table.wait_ready(TIMEOUT).unwrap();

    // Rebuilt from the log alone
    assert_eq!(table.len(), 10);
    assert_eq!(table.get(&Key::single(999i64)).unwrap(), None);
}

// =============================================================================
// Periodic Checkpoint Tests
// =============================================================================

#[test]
fn test_periodic_checkpoints() {
    let dir = TempDir::new().unwrap();
    let log = setup_log(2);

    let mut options = checkpointed_options(&dir);
    options.checkpoint_interval = 5;
    let path = options.checkpoint_path.clone().unwrap();

    let table = open_table(log.clone(), options);
    table.wait_ready(TIMEOUT).unwrap();
    for id in 0..12 {
        append_row(&*log, &note(id, "x", None));
    }

    assert!(wait_until(|| table.stats().checkpoints_written >= 2));
    let checkpoint = Checkpoint::load(&path).unwrap().unwrap();
    assert!(checkpoint.rows.len() >= 10);
}

#[test]
fn test_no_checkpoint_without_path() {
    let log = setup_log(2);
    append_row(&*log, &note(1, "x", None));

    let mut options = options(2);
    options.checkpoint_interval = 1;
    let table = open_table(log, options);
    table.wait_ready(TIMEOUT).unwrap();
    table.close().unwrap();

    assert_eq!(table.stats().checkpoints_written, 0);
}
