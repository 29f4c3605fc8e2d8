//! Shared storage integration tests.
//!
//! Tests the EntityStore interface against all implementations.
//! Each implementation module imports these test functions and runs them.

pub mod entity_store_tests;
