//! SQLite-backed [`VectorStore`].
//!
//! Every record lives in the single `records` table, keyed by
//! `(collection, id)`, with its embedding as a little-endian `f32` BLOB.
//! Queries are brute-force cosine distance over the collection's rows.
//! Each `add` runs in one transaction, so a rejected or failed batch
//! writes nothing.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use knowledge_harness_core::embedding::{blob_to_vec, vec_to_blob};
use knowledge_harness_core::models::{Metadata, SearchHit};
use knowledge_harness_core::store::{rank_by_distance, validate_batch, CollectionInfo, Record, VectorStore};
use knowledge_harness_core::{Error, Result};

use crate::{db, migrate};

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

fn storage_err(e: sqlx::Error) -> Error {
    Error::storage(format!("sqlite: {}", e))
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the database at `path` and make sure the schema exists.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn rows(&self, collection: &str) -> Result<Vec<Record>> {
        sqlx::query(
            "SELECT id, document, metadata_json, embedding FROM records WHERE collection = ? ORDER BY seq",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?
        .iter()
        .map(decode_record)
        .collect()
    }
}

fn decode_record(row: &SqliteRow) -> Result<Record> {
    let metadata_json: String = row.try_get("metadata_json").map_err(storage_err)?;
    let metadata: Metadata = serde_json::from_str(&metadata_json)
        .map_err(|e| Error::storage(format!("corrupt metadata: {}", e)))?;
    let blob: Vec<u8> = row.try_get("embedding").map_err(storage_err)?;
    Ok(Record {
        id: row.try_get("id").map_err(storage_err)?,
        document: row.try_get("document").map_err(storage_err)?,
        embedding: blob_to_vec(&blob),
        metadata,
    })
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn add(&self, collection: &str, records: Vec<Record>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM records WHERE collection = ? LIMIT 1")
                .bind(collection)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_err)?;
        let dims = validate_batch(collection, &records, existing.map(|d| d as usize))?;

        let now = chrono::Utc::now().timestamp();
        for record in &records {
            let metadata_json = serde_json::to_string(&record.metadata)
                .map_err(|e| Error::storage(format!("metadata not serializable: {}", e)))?;
            sqlx::query(
                r#"
                INSERT INTO records (collection, id, document, metadata_json, embedding, dims, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    document = excluded.document,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    dims = excluded.dims
                "#,
            )
            .bind(collection)
            .bind(&record.id)
            .bind(&record.document)
            .bind(&metadata_json)
            .bind(vec_to_blob(&record.embedding))
            .bind(dims as i64)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        let row = sqlx::query(
            "SELECT id, document, metadata_json, embedding FROM records WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.as_ref().map(decode_record).transpose()
    }

    async fn find_by_metadata(
        &self,
        collection: &str,
        key: &str,
        value: &Value,
    ) -> Result<Vec<Record>> {
        Ok(self
            .rows(collection)
            .await?
            .into_iter()
            .filter(|r| r.metadata.get(key) == Some(value))
            .collect())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let records = self.rows(collection).await?;
        rank_by_distance(embedding, &records, limit)
    }

    async fn list(&self, collection: &str) -> Result<Vec<Record>> {
        self.rows(collection).await
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let mut removed = 0u64;
        for id in ids {
            removed += sqlx::query("DELETE FROM records WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?
                .rows_affected();
        }
        tx.commit().await.map_err(storage_err)?;
        Ok(removed as usize)
    }

    async fn collections(&self) -> Result<Vec<CollectionInfo>> {
        let rows = sqlx::query(
            "SELECT collection, COUNT(*) AS n, MAX(dims) AS dims FROM records GROUP BY collection ORDER BY collection",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|row| {
                let records: i64 = row.try_get("n").map_err(storage_err)?;
                let dims: Option<i64> = row.try_get("dims").map_err(storage_err)?;
                Ok(CollectionInfo {
                    name: row.try_get("collection").map_err(storage_err)?,
                    records: records as usize,
                    dims: dims.map(|d| d as usize),
                })
            })
            .collect()
    }
}
