//! Tests for table queries
//!
//! These tests verify:
//! - Point, range and full scans return the right rows in key order
//! - Predicate constants are converted to the declared property types
//! - NULL only matches an explicit null test
//! - Scans are not affected by changes made after they started
//! - max_value over key and non-key properties

use logtable::model::{Key, Value};
use logtable::{MaterializedTable, Predicate};

use super::support::*;

// =============================================================================
// Helper Functions
// =============================================================================

/// Table with ids 1..=20; Stars = id % 5, NULL for multiples of 7
fn setup_table() -> MaterializedTable {
    let log = setup_log(3);
    for id in 1..=20i64 {
        let stars = if id % 7 == 0 { None } else { Some((id % 5) as i32) };
        append_row(&*log, &note(id, &format!("note {}", id), stars));
    }
    let table = open_table(log, options(3));
    table.wait_ready(TIMEOUT).unwrap();
    table
}

fn ids(table: &MaterializedTable, predicate: Option<&Predicate>) -> Vec<i64> {
    table
        .scan(predicate)
        .unwrap()
        .map(|row| row.get(0).and_then(Value::as_i64).unwrap())
        .collect()
}

// =============================================================================
// Access Path Tests
// =============================================================================

#[test]
fn test_full_scan_in_key_order() {
    let table = setup_table();
    assert_eq!(ids(&table, None), (1..=20).collect::<Vec<_>>());
}

#[test]
fn test_point_lookup() {
    let table = setup_table();

    assert_eq!(ids(&table, Some(&Predicate::eq(0, 7))), vec![7]);
    assert!(ids(&table, Some(&Predicate::eq(0, 99))).is_empty());
}

#[test]
fn test_point_lookup_converts_constant() {
    let table = setup_table();

    // UInt and Float constants against an Int64 key
    assert_eq!(ids(&table, Some(&Predicate::eq(0, 7u64))), vec![7]);
    assert_eq!(ids(&table, Some(&Predicate::eq(0, 7.0))), vec![7]);
}

#[test]
fn test_key_range() {
    let table = setup_table();

    assert_eq!(ids(&table, Some(&Predicate::between(0, 5, 8))), vec![5, 6, 7, 8]);
    assert_eq!(ids(&table, Some(&Predicate::greater_than(0, 17))), vec![18, 19, 20]);
    assert_eq!(ids(&table, Some(&Predicate::less_than(0, 3))), vec![1, 2]);
}

#[test]
fn test_range_with_residual_filter() {
    let table = setup_table();
    let predicate = Predicate::between(0, 1, 10).and(Predicate::eq(2, 3));

    assert_eq!(ids(&table, Some(&predicate)), vec![3, 8]);
}

#[test]
fn test_non_key_filter() {
    let table = setup_table();

    assert_eq!(ids(&table, Some(&Predicate::eq(2, 0))), vec![5, 10, 15, 20]);
    assert_eq!(
        ids(&table, Some(&Predicate::In(2, vec![Value::Int(4), Value::Int(1)]))),
        vec![1, 4, 6, 9, 11, 16, 19]
    );
}

// =============================================================================
// Logic Tests
// =============================================================================

#[test]
fn test_null_semantics() {
    let table = setup_table();

    assert_eq!(ids(&table, Some(&Predicate::IsNull(2))), vec![7, 14]);

    // A NULL is neither equal nor unequal to anything
    let not_two = Predicate::eq(2, 2).not().and(Predicate::IsNull(2).not());
    let result = ids(&table, Some(&not_two));
    assert!(!result.contains(&7));
    assert!(!result.contains(&2));
    assert_eq!(result.len(), 20 - 2 - 3);

    assert!(ids(&table, Some(&Predicate::eq(2, Value::Null))).is_empty());
}

#[test]
fn test_or_and_custom() {
    let table = setup_table();

    let predicate = Predicate::eq(0, 1).or(Predicate::eq(0, 20));
    assert_eq!(ids(&table, Some(&predicate)), vec![1, 20]);

    let titled = Predicate::custom(|row| title_of(row).ends_with('3'));
    assert_eq!(ids(&table, Some(&titled)), vec![3, 13]);
}

// =============================================================================
// Consistency Tests
// =============================================================================

#[test]
fn test_scan_does_not_see_later_changes() {
    let log = setup_log(1);
    for id in 1..=3 {
        append_row(&*log, &note(id, "x", None));
    }
    let table = open_table(log.clone(), options(1));
    table.wait_ready(TIMEOUT).unwrap();

    let scan = table.scan(None).unwrap();
    append_row(&*log, &note(4, "x", None));
    append_tombstone(&*log, 1);
    assert!(wait_until(|| table.len() == 3 && table.get(&Key::single(4i64)).unwrap().is_some()));

    let ids: Vec<i64> = scan.map(|row| row.get(0).and_then(Value::as_i64).unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn test_max_value() {
    let table = setup_table();

    assert_eq!(table.max_value(0).unwrap(), Some(Value::Int(20)));
    assert_eq!(table.max_value(2).unwrap(), Some(Value::Int(4)));
    assert_eq!(table.max_value(1).unwrap(), Some(Value::from("note 9")));
}

#[test]
fn test_max_value_empty_table() {
    let log = setup_log(1);
    let table = open_table(log, options(1));
    table.wait_ready(TIMEOUT).unwrap();

    assert_eq!(table.max_value(0).unwrap(), None);
}
