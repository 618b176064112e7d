//! Tests for segment recovery
//!
//! These tests verify:
//! - A torn tail is reported by verify and removed by recovery
//! - A corrupted entry stops the valid prefix
//! - Reopening the log recovers and keeps appending after the prefix
//! - Readers refuse frames whose checksum does not match

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use logtable::log::{FileLog, LogClient, SegmentReader, SegmentRecovery};
use logtable::{LogTableError, SegmentSyncStrategy};

use super::memory_tests::{payload, topic};

// =============================================================================
// Helper Functions
// =============================================================================

const TIMEOUT: Duration = Duration::from_secs(1);

fn open_log(dir: &TempDir) -> FileLog {
    FileLog::open(dir.path(), SegmentSyncStrategy::EveryWrite, Duration::from_millis(10)).unwrap()
}

/// Write `count` records to a single-partition topic and return the segment path
fn setup_segment(dir: &TempDir, count: usize) -> PathBuf {
    let log = open_log(dir);
    log.ensure_topic(&topic("db.notes", 1)).unwrap();
    for i in 0..count {
        log.append("db.notes", b"k", Some(&payload(&format!("record-{}", i))), TIMEOUT)
            .unwrap();
    }
    FileLog::segment_path(&FileLog::topic_dir(dir.path(), "db.notes"), 0)
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).unwrap().len()
}

/// Byte length of each frame, from a clean file
fn frame_lengths(path: &Path) -> Vec<u64> {
    let mut reader = SegmentReader::open(path).unwrap();
    let mut lengths = Vec::new();
    let mut last = 0;
    while reader.next_entry().unwrap().is_some() {
        lengths.push(reader.position() - last);
        last = reader.position();
    }
    lengths
}

// =============================================================================
// Clean File Tests
// =============================================================================

#[test]
fn test_verify_clean_segment() {
    let dir = TempDir::new().unwrap();
    let path = setup_segment(&dir, 5);

    let report = SegmentRecovery::verify(&path).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.entries_recovered, 5);
    assert_eq!(report.last_offset, Some(4));
    assert_eq!(report.valid_len, file_len(&path));
    assert!(!report.was_truncated);
}

#[test]
fn test_verify_empty_segment() {
    let dir = TempDir::new().unwrap();
    let path = setup_segment(&dir, 0);

    let report = SegmentRecovery::verify(&path).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.entries_recovered, 0);
    assert_eq!(report.last_offset, None);
}

// =============================================================================
// Torn Tail Tests
// =============================================================================

#[test]
fn test_torn_tail_verify_then_recover() {
    let dir = TempDir::new().unwrap();
    let path = setup_segment(&dir, 3);
    let clean_len = file_len(&path);

    // Half a header
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[7u8; 9]).unwrap();
    drop(file);

    let report = SegmentRecovery::verify(&path).unwrap();
    assert_eq!(report.entries_recovered, 3);
    assert_eq!(report.entries_corrupted, 0);
    assert_eq!(report.trailing_bytes, 9);
    assert!(!report.is_clean());
    assert_eq!(file_len(&path), clean_len + 9);

    let report = SegmentRecovery::recover(&path).unwrap();
    assert!(report.was_truncated);
    assert_eq!(file_len(&path), clean_len);
    assert!(SegmentRecovery::verify(&path).unwrap().is_clean());
}

#[test]
fn test_truncated_frame_is_torn_tail() {
    let dir = TempDir::new().unwrap();
    let path = setup_segment(&dir, 4);
    let lengths = frame_lengths(&path);

    // Cut the last frame in half
    let cut = file_len(&path) - lengths[3] / 2;
    OpenOptions::new().write(true).open(&path).unwrap().set_len(cut).unwrap();

    let report = SegmentRecovery::recover(&path).unwrap();
    assert_eq!(report.entries_recovered, 3);
    assert_eq!(report.entries_corrupted, 0);
    assert_eq!(report.last_offset, Some(2));
    assert_eq!(file_len(&path), lengths[..3].iter().sum::<u64>());
}

#[test]
fn test_reopen_after_torn_tail_continues_offsets() {
    let dir = TempDir::new().unwrap();
    let path = setup_segment(&dir, 3);

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0u8; 20]).unwrap();
    drop(file);

    let log = open_log(&dir);
    assert_eq!(log.high_watermarks("db.notes").unwrap()[&0], 3);

    let position = log.append("db.notes", b"k", None, TIMEOUT).unwrap();
    assert_eq!(position.offset, 3);
    assert!(SegmentRecovery::verify(&path).unwrap().is_clean());
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_corrupted_entry_stops_prefix() {
    let dir = TempDir::new().unwrap();
    let path = setup_segment(&dir, 4);
    let lengths = frame_lengths(&path);

    // Flip a byte inside the body of the second frame
    let body_byte = lengths[0] + 16 + 3;
    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(body_byte)).unwrap();
    file.write_all(&[0xAB]).unwrap();
    drop(file);

    let report = SegmentRecovery::verify(&path).unwrap();
    assert_eq!(report.entries_recovered, 1);
    assert_eq!(report.entries_corrupted, 1);
    assert_eq!(report.last_offset, Some(0));
    assert_eq!(report.valid_len, lengths[0]);

    let report = SegmentRecovery::recover(&path).unwrap();
    assert!(report.was_truncated);
    assert_eq!(file_len(&path), lengths[0]);
}

#[test]
fn test_reader_reports_crc_mismatch() {
    let dir = TempDir::new().unwrap();
    let path = setup_segment(&dir, 2);

    // Corrupt the body of the first frame
    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(16 + 2)).unwrap();
    file.write_all(&[0xFF, 0xEE]).unwrap();
    drop(file);

    let mut reader = SegmentReader::open(&path).unwrap();
    assert!(matches!(
        reader.next_entry(),
        Err(LogTableError::SegmentCorruption(_))
    ));

    let results: Vec<_> = SegmentReader::open(&path).unwrap().entries().collect();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());
}

#[test]
fn test_out_of_sequence_offset_counts_as_corruption() {
    let dir = TempDir::new().unwrap();
    let path = setup_segment(&dir, 2);
    let lengths = frame_lengths(&path);

    // Rewrite the second frame's offset field
    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(lengths[0])).unwrap();
    file.write_all(&7u64.to_le_bytes()).unwrap();
    drop(file);

    let report = SegmentRecovery::verify(&path).unwrap();
    assert_eq!(report.entries_recovered, 1);
    assert_eq!(report.entries_corrupted, 1);
}
