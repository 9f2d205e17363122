//! Error types for mdb-reconcile
//!
//! Error taxonomy:
//! - `Data`: malformed input rejected at the load boundary. Incomplete records
//!   inside a comparison are recovered locally and never surface as this error.
//! - `Config`: invalid configuration, raised when a manager is built.
//! - `Concurrency`: worker pool failure; the session is aborted and partial
//!   outcomes are discarded.
//! - `Persistence`: the store rejected a read or a whole commit.

use crate::models::SessionState;
use thiserror::Error;

/// Reconciliation error type
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Malformed or inconsistent input data
    #[error("Data error: {0}")]
    Data(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Worker pool failure (worker panic, lost chunk, join failure)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Store rejected the operation
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Operation not allowed in the session's current state
    #[error("Operation '{operation}' not allowed in state {from:?}")]
    InvalidState {
        from: SessionState,
        operation: &'static str,
    },

    /// Another session holds the equipment lock
    #[error("Equipment '{0}' already has an active session")]
    EquipmentBusy(String),

    /// Session cancelled before the comparison finished
    #[error("Session cancelled")]
    Cancelled,

    /// mdb-common error
    #[error(transparent)]
    Common(#[from] mdb_common::Error),
}

impl From<sqlx::Error> for ReconcileError {
    fn from(err: sqlx::Error) -> Self {
        ReconcileError::Persistence(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ReconcileError {
    fn from(err: tokio::task::JoinError) -> Self {
        ReconcileError::Concurrency(format!("Comparison task failed: {}", err))
    }
}

/// Result type for reconciliation operations
pub type ReconcileResult<T> = Result<T, ReconcileError>;
