//! Database Test Utilities

use mdb_reconcile::db::init_database_pool;
use mdb_reconcile::SqliteStore;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Create a temporary Mother DB with its schema
///
/// Returns (TempDir, SqliteStore) - TempDir must be kept alive for duration of test
pub async fn create_test_store() -> anyhow::Result<(TempDir, SqliteStore)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_mother_db.sqlite");
    let pool = init_database_pool(&db_path).await?;
    Ok((temp_dir, SqliteStore::new(pool)))
}

pub async fn row_count(pool: &SqlitePool, table: &str) -> i64 {
    let query = format!("SELECT COUNT(*) FROM {}", table);
    sqlx::query_scalar(&query)
        .fetch_one(pool)
        .await
        .expect("count query")
}
