//! mdb-reconcile library interface
//!
//! Reconciles measured equipment parameters against the Mother DB: chunked
//! parallel comparison, candidate classification, conflict resolution and
//! statistical quality control, orchestrated as load → analyze → commit.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod source;

pub use crate::config::{ReconcileConfig, TomlConfig};
pub use crate::db::{InMemoryStore, MotherDbSnapshot, MotherDbStore, SqliteStore};
pub use crate::error::{ReconcileError, ReconcileResult};
pub use crate::services::MotherDbManager;
pub use crate::source::{JsonParameterSource, ParameterSource};
