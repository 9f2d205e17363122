//! Test Helper Utilities
//!
//! Shared builders and database setup for mdb-reconcile integration tests

#![allow(dead_code)]

pub mod builders;
pub mod db_utils;

pub use builders::{category, manager_with, number, number_text, set_of, text, EQUIPMENT};
pub use db_utils::{create_test_store, row_count};
