//! Tests for MemoryLog
//!
//! These tests verify:
//! - Topic creation is idempotent and validates settings
//! - Offsets are dense per partition and keys stick to one partition
//! - Subscriptions read history, then tail new appends
//! - Injected faults surface as transient errors

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use logtable::log::{partition_for, LogClient, MemoryLog, PartitionOffsets, TopicSpec};
use logtable::{CodecKind, LogTableError, ValueContainer};

// =============================================================================
// Helper Functions
// =============================================================================

const TIMEOUT: Duration = Duration::from_secs(1);

pub fn topic(name: &str, partitions: u32) -> TopicSpec {
    TopicSpec {
        name: name.to_string(),
        partitions,
        replication_factor: 1,
    }
}

pub fn payload(text: &str) -> ValueContainer {
    ValueContainer {
        entity: "Note".to_string(),
        type_tag: "Note#00000000".to_string(),
        codec: CodecKind::Json,
        payload: bytes::Bytes::copy_from_slice(text.as_bytes()),
    }
}

fn setup_log(partitions: u32) -> MemoryLog {
    let log = MemoryLog::new();
    log.ensure_topic(&topic("db.notes", partitions)).unwrap();
    log
}

// =============================================================================
// Topic Tests
// =============================================================================

#[test]
fn test_ensure_topic_idempotent() {
    let log = setup_log(4);

    log.ensure_topic(&topic("db.notes", 4)).unwrap();
    assert_eq!(log.partition_count("db.notes").unwrap(), 4);
    assert_eq!(log.topics(), vec!["db.notes".to_string()]);
}

#[test]
fn test_ensure_topic_partition_mismatch() {
    let log = setup_log(4);
    assert!(matches!(
        log.ensure_topic(&topic("db.notes", 8)),
        Err(LogTableError::Config(_))
    ));
}

#[test]
fn test_ensure_topic_rejects_zero_partitions() {
    let log = MemoryLog::new();
    assert!(log.ensure_topic(&topic("db.empty", 0)).is_err());
}

#[test]
fn test_unknown_topic() {
    let log = MemoryLog::new();
    assert!(matches!(
        log.append("missing", b"k", None, TIMEOUT),
        Err(LogTableError::UnknownTopic(_))
    ));
    assert!(log.subscribe("missing", &PartitionOffsets::new()).is_err());
}

// =============================================================================
// Append Tests
// =============================================================================

#[test]
fn test_offsets_are_dense_per_partition() {
    let log = setup_log(3);

    let mut positions = Vec::new();
    for i in 0..30 {
        let key = format!("key-{}", i);
        positions.push(log.append("db.notes", key.as_bytes(), Some(&payload("x")), TIMEOUT).unwrap());
    }

    let watermarks = log.high_watermarks("db.notes").unwrap();
    for partition in 0..3 {
        let mut offsets: Vec<u64> = positions
            .iter()
            .filter(|p| p.partition == partition)
            .map(|p| p.offset)
            .collect();
        offsets.sort_unstable();
        let expected: Vec<u64> = (0..offsets.len() as u64).collect();
        assert_eq!(offsets, expected);
        assert_eq!(watermarks[&partition], offsets.len() as u64);
    }
    assert_eq!(log.record_count("db.notes").unwrap(), 30);
}

#[test]
fn test_same_key_same_partition() {
    let log = setup_log(8);

    let a = log.append("db.notes", b"stable", Some(&payload("1")), TIMEOUT).unwrap();
    let b = log.append("db.notes", b"stable", None, TIMEOUT).unwrap();

    assert_eq!(a.partition, b.partition);
    assert_eq!(a.partition, partition_for(b"stable", 8));
    assert_eq!(b.offset, a.offset + 1);
}

// =============================================================================
// Subscription Tests
// =============================================================================

#[test]
fn test_subscribe_reads_history_in_order() {
    let log = setup_log(1);
    for i in 0..5 {
        log.append("db.notes", b"k", Some(&payload(&i.to_string())), TIMEOUT).unwrap();
    }

    let mut sub = log.subscribe("db.notes", &PartitionOffsets::new()).unwrap();
    for i in 0..5u64 {
        let record = sub.poll(TIMEOUT).unwrap().unwrap();
        assert_eq!(record.position.offset, i);
        assert_eq!(record.value.unwrap().payload, i.to_string().as_bytes());
    }
    assert!(sub.poll(Duration::from_millis(20)).unwrap().is_none());
}

#[test]
fn test_subscribe_from_offsets() {
    let log = setup_log(1);
    for _ in 0..5 {
        log.append("db.notes", b"k", Some(&payload("x")), TIMEOUT).unwrap();
    }

    let mut from = PartitionOffsets::new();
    from.insert(0, 3);
    let mut sub = log.subscribe("db.notes", &from).unwrap();

    assert_eq!(sub.poll(TIMEOUT).unwrap().unwrap().position.offset, 3);
    assert_eq!(sub.poll(TIMEOUT).unwrap().unwrap().position.offset, 4);
}

#[test]
fn test_subscription_tails_new_appends() {
    let log = Arc::new(setup_log(2));
    let mut sub = log.subscribe("db.notes", &PartitionOffsets::new()).unwrap();

    let writer = {
        let log = Arc::clone(&log);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            log.append("db.notes", b"late", None, TIMEOUT).unwrap()
        })
    };

    let record = sub.poll(Duration::from_secs(5)).unwrap().unwrap();
    let appended = writer.join().unwrap();
    assert_eq!(record.position, appended);
    assert!(record.value.is_none());
}

// =============================================================================
// Fault Injection Tests
// =============================================================================

#[test]
fn test_failed_appends_are_transient() {
    let log = setup_log(1);
    log.fail_next_appends(2);

    for _ in 0..2 {
        let err = log.append("db.notes", b"k", None, TIMEOUT).unwrap_err();
        assert!(err.is_transient());
    }
    assert!(log.append("db.notes", b"k", None, TIMEOUT).is_ok());
    assert_eq!(log.record_count("db.notes").unwrap(), 1);
}

#[test]
fn test_failed_polls_then_recover() {
    let log = setup_log(1);
    log.append("db.notes", b"k", Some(&payload("x")), TIMEOUT).unwrap();

    let mut sub = log.subscribe("db.notes", &PartitionOffsets::new()).unwrap();
    log.fail_next_polls(1);

    assert!(sub.poll(TIMEOUT).is_err());
    assert!(sub.poll(TIMEOUT).unwrap().is_some());
}

#[test]
fn test_unavailable_broker() {
    let log = setup_log(1);
    log.set_unavailable(true);

    assert!(matches!(
        log.append("db.notes", b"k", None, TIMEOUT),
        Err(LogTableError::BrokerUnavailable(_))
    ));
    assert!(log.subscribe("db.notes", &PartitionOffsets::new()).is_err());

    log.set_unavailable(false);
    assert!(log.append("db.notes", b"k", None, TIMEOUT).is_ok());
}
