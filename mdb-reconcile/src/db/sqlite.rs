//! SQLite Mother DB store
//!
//! Tables:
//! - `mother_db_values`: one row per `(equipment_id, parameter_name)`, value as
//!   JSON, upserted on commit
//! - `mother_db_versions`: one row per successful commit
//!
//! A commit runs in one transaction. Each record is its own statement, so a
//! rejected row is reported and the rest of the batch still lands.

use super::{validate_for_commit, CommitResult, MotherDbSnapshot, MotherDbStore, RecordCommitStatus};
use crate::error::{ReconcileError, ReconcileResult};
use crate::models::status::{HIGH_CONFIDENCE, LOW_CONFIDENCE};
use crate::models::{MotherDbStatus, ParameterRecord, ParameterValue, SpecRange};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

/// Create tables if needed (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> ReconcileResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mother_db_values (
            equipment_id TEXT NOT NULL,
            parameter_name TEXT NOT NULL CHECK (length(trim(parameter_name)) > 0),
            value_json TEXT NOT NULL,
            unit TEXT,
            source_file TEXT NOT NULL DEFAULT '',
            sequence_index INTEGER NOT NULL DEFAULT 0,
            spec_min REAL,
            spec_max REAL,
            confidence REAL CHECK (confidence IS NULL OR (confidence >= 0 AND confidence <= 1)),
            version INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (equipment_id, parameter_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mother_db_versions (
            equipment_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            record_count INTEGER NOT NULL,
            committed_at TEXT NOT NULL,
            PRIMARY KEY (equipment_id, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn current_version(&self, equipment_id: &str) -> ReconcileResult<u64> {
        let version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM mother_db_versions WHERE equipment_id = ?",
        )
        .bind(equipment_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(version as u64)
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> ReconcileResult<ParameterRecord> {
    let equipment_id: String = row.try_get("equipment_id")?;
    let parameter_name: String = row.try_get("parameter_name")?;
    let value_json: String = row.try_get("value_json")?;
    let value: ParameterValue = serde_json::from_str(&value_json).map_err(|e| {
        ReconcileError::Persistence(format!(
            "stored value of {}/{} is unreadable: {}",
            equipment_id, parameter_name, e
        ))
    })?;
    let spec_min: Option<f64> = row.try_get("spec_min")?;
    let spec_max: Option<f64> = row.try_get("spec_max")?;
    let sequence_index: i64 = row.try_get("sequence_index")?;

    Ok(ParameterRecord {
        equipment_id,
        parameter_name,
        value: Some(value),
        unit: row.try_get("unit")?,
        source_file: row.try_get("source_file")?,
        sequence_index: sequence_index as u64,
        spec_range: match (spec_min, spec_max) {
            (Some(min), Some(max)) => Some(SpecRange { min, max }),
            _ => None,
        },
        confidence: row.try_get("confidence")?,
    })
}

#[async_trait]
impl MotherDbStore for SqliteStore {
    async fn current_snapshot(&self, equipment_id: &str) -> ReconcileResult<MotherDbSnapshot> {
        let version = self.current_version(equipment_id).await?;
        let rows = sqlx::query(
            "SELECT * FROM mother_db_values WHERE equipment_id = ? ORDER BY parameter_name",
        )
        .bind(equipment_id)
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<ReconcileResult<Vec<_>>>()?;
        Ok(MotherDbSnapshot::new(equipment_id, version, records))
    }

    async fn commit(
        &self,
        equipment_id: &str,
        records: Vec<ParameterRecord>,
    ) -> ReconcileResult<CommitResult> {
        let mut tx = self.pool.begin().await?;

        let current: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM mother_db_versions WHERE equipment_id = ?",
        )
        .bind(equipment_id)
        .fetch_one(&mut *tx)
        .await?;
        let next_version = current + 1;
        let now = Utc::now().to_rfc3339();

        let mut statuses = Vec::with_capacity(records.len());
        for record in &records {
            let key = record.key();
            if let Err(error) = validate_for_commit(equipment_id, record) {
                statuses.push(RecordCommitStatus::failed(key, error));
                continue;
            }
            let value_json = match serde_json::to_string(&record.value) {
                Ok(json) => json,
                Err(e) => {
                    statuses.push(RecordCommitStatus::failed(key, e.to_string()));
                    continue;
                }
            };

            let written = sqlx::query(
                r#"
                INSERT INTO mother_db_values (
                    equipment_id, parameter_name, value_json, unit, source_file,
                    sequence_index, spec_min, spec_max, confidence, version, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(equipment_id, parameter_name) DO UPDATE SET
                    value_json = excluded.value_json,
                    unit = excluded.unit,
                    source_file = excluded.source_file,
                    sequence_index = excluded.sequence_index,
                    spec_min = excluded.spec_min,
                    spec_max = excluded.spec_max,
                    confidence = excluded.confidence,
                    version = excluded.version,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&record.equipment_id)
            .bind(&record.parameter_name)
            .bind(value_json)
            .bind(&record.unit)
            .bind(&record.source_file)
            .bind(record.sequence_index as i64)
            .bind(record.spec_range.map(|r| r.min))
            .bind(record.spec_range.map(|r| r.max))
            .bind(record.confidence)
            .bind(next_version)
            .bind(&now)
            .execute(&mut *tx)
            .await;

            match written {
                Ok(_) => statuses.push(RecordCommitStatus::ok(key)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Row rejected by SQLite");
                    statuses.push(RecordCommitStatus::failed(key, e.to_string()));
                }
            }
        }

        let saved = statuses.iter().filter(|s| s.is_ok()).count();
        let version = if saved > 0 {
            sqlx::query(
                "INSERT INTO mother_db_versions (equipment_id, version, record_count, committed_at) VALUES (?, ?, ?, ?)",
            )
            .bind(equipment_id)
            .bind(next_version)
            .bind(saved as i64)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Some(next_version as u64)
        } else {
            tx.rollback().await?;
            None
        };

        info!(
            equipment_id,
            saved,
            failed = statuses.len() - saved,
            ?version,
            "Mother DB commit"
        );
        Ok(CommitResult { version, statuses })
    }

    async fn status(&self, equipment_id: &str) -> ReconcileResult<MotherDbStatus> {
        let version = self.current_version(equipment_id).await?;
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN confidence >= ? THEN 1 ELSE 0 END), 0) AS high,
                COALESCE(SUM(CASE WHEN confidence < ? THEN 1 ELSE 0 END), 0) AS low,
                AVG(confidence) AS average
            FROM mother_db_values
            WHERE equipment_id = ?
            "#,
        )
        .bind(HIGH_CONFIDENCE)
        .bind(LOW_CONFIDENCE)
        .bind(equipment_id)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let high: i64 = row.try_get("high")?;
        let low: i64 = row.try_get("low")?;
        Ok(MotherDbStatus {
            equipment_id: equipment_id.to_string(),
            version,
            total_parameters: total as usize,
            high_confidence_count: high as usize,
            low_confidence_count: low as usize,
            average_confidence: row.try_get("average")?,
        })
    }
}
