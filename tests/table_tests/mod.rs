//! Materialized table integration tests

mod support;

mod checkpoint_tests;
mod scan_tests;
