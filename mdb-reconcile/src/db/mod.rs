//! Mother DB persistence
//!
//! The reconciliation core only depends on the [`MotherDbStore`] contract:
//! read a frozen snapshot, write a batch of records with per-record status.
//! Two implementations ship with the crate:
//! - [`memory::InMemoryStore`] for tests and dry runs
//! - [`sqlite::SqliteStore`] backed by `sqlx` SQLite

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use crate::error::ReconcileResult;
use crate::models::{MotherDbStatus, ParameterRecord, RecordKey};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Read-only view of the stored parameters of one equipment
///
/// Taken once per session and never mutated; commits produce a new version.
#[derive(Debug, Clone, PartialEq)]
pub struct MotherDbSnapshot {
    pub equipment_id: String,
    pub version: u64,
    records: BTreeMap<RecordKey, ParameterRecord>,
}

impl MotherDbSnapshot {
    pub fn new(
        equipment_id: impl Into<String>,
        version: u64,
        records: impl IntoIterator<Item = ParameterRecord>,
    ) -> Self {
        Self {
            equipment_id: equipment_id.into(),
            version,
            records: records.into_iter().map(|r| (r.key(), r)).collect(),
        }
    }

    pub fn empty(equipment_id: impl Into<String>) -> Self {
        Self::new(equipment_id, 0, Vec::new())
    }

    pub fn get(&self, key: &RecordKey) -> Option<&ParameterRecord> {
        self.records.get(key)
    }

    /// Records in key order
    pub fn records(&self) -> impl Iterator<Item = &ParameterRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn status(&self) -> MotherDbStatus {
        let records: Vec<ParameterRecord> = self.records.values().cloned().collect();
        MotherDbStatus::from_records(&self.equipment_id, self.version, &records)
    }
}

/// Outcome of writing one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordCommitStatus {
    pub key: RecordKey,
    /// None on success
    pub error: Option<String>,
}

impl RecordCommitStatus {
    pub fn ok(key: RecordKey) -> Self {
        Self { key, error: None }
    }

    pub fn failed(key: RecordKey, error: impl Into<String>) -> Self {
        Self {
            key,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-record result of a commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitResult {
    /// New store version (None when nothing was written)
    pub version: Option<u64>,
    /// One entry per submitted record, in submission order
    pub statuses: Vec<RecordCommitStatus>,
}

impl CommitResult {
    pub fn saved_count(&self) -> usize {
        self.statuses.iter().filter(|s| s.is_ok()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.statuses.len() - self.saved_count()
    }
}

/// Persistence collaborator contract
///
/// `Err` from `commit` means the whole batch was rejected; per-record failures
/// are reported in [`CommitResult::statuses`].
#[async_trait]
pub trait MotherDbStore: Send + Sync {
    async fn current_snapshot(&self, equipment_id: &str) -> ReconcileResult<MotherDbSnapshot>;

    async fn commit(
        &self,
        equipment_id: &str,
        records: Vec<ParameterRecord>,
    ) -> ReconcileResult<CommitResult>;

    async fn status(&self, equipment_id: &str) -> ReconcileResult<MotherDbStatus> {
        Ok(self.current_snapshot(equipment_id).await?.status())
    }
}

/// Check a record before it is written
pub(crate) fn validate_for_commit(
    equipment_id: &str,
    record: &ParameterRecord,
) -> Result<(), String> {
    if record.equipment_id != equipment_id {
        return Err(format!(
            "record belongs to equipment '{}', commit is for '{}'",
            record.equipment_id, equipment_id
        ));
    }
    if record.parameter_name.trim().is_empty() {
        return Err("empty parameter name".to_string());
    }
    if record.value.is_none() {
        return Err("record has no value".to_string());
    }
    if let Some(n) = record.numeric_value() {
        if !n.is_finite() {
            return Err(format!("non-finite value {}", n));
        }
    }
    Ok(())
}

/// Open (or create) the SQLite Mother DB and ensure its schema
pub async fn init_database_pool(db_path: &Path) -> ReconcileResult<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(mdb_common::Error::from)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new Mother DB: {}", db_path.display());
    } else {
        info!("Opened existing Mother DB: {}", db_path.display());
    }

    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    sqlite::create_schema(&pool).await?;
    Ok(pool)
}
