use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

use crate::db;

/// Create the schema on `pool`. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per stored chunk or tutorial. `seq` keeps insertion order
    // stable across upserts.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            document TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(collection, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Open the database at `path`, migrate it, and close it again.
pub async fn migrate_path(path: &Path) -> Result<()> {
    let pool = db::connect(path).await?;
    run_migrations(&pool).await?;
    pool.close().await;
    Ok(())
}
