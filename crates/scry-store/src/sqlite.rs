//! On-disk vector backend on top of `SQLite`.
//!
//! Vectors are stored as little-endian `f32` blobs and scored by brute-force
//! cosine similarity at query time. Every write is committed before the call
//! returns, so data survives process restarts without an explicit persist.

use std::collections::HashMap;
use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::vector_store::{
    BoxFuture, EmbeddingRecord, Persistence, ScoredRecord, VectorBackend, VectorFilter,
    VectorStoreError, cosine_similarity, matches_filter, rank,
};

#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`VectorStoreError::Connection`] if the database cannot be opened
    /// or migrated.
    pub async fn open(path: &str) -> Result<Self, VectorStoreError> {
        let in_memory = path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
            }
            format!("sqlite:{path}?mode=rwc")
        };

        let opts = SqliteConnectOptions::from_str(&url)
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `sqlite::memory:` is a separate database.
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await
            .map_err(|e| VectorStoreError::Connection(format!("failed to open {path}: {e}")))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| VectorStoreError::Connection(format!("migration failed: {e}")))?;

        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

impl VectorBackend for SqliteVectorStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn persistence(&self) -> Persistence {
        Persistence::Local
    }

    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let size = i64::try_from(vector_size)
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            sqlx::query("INSERT OR IGNORE INTO vector_collections (name, vector_size) VALUES (?, ?)")
                .bind(&collection)
                .bind(size)
                .execute(&self.pool)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(())
        })
    }

    fn add(
        &self,
        collection: &str,
        records: Vec<EmbeddingRecord>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let exists: Option<(i64,)> =
                sqlx::query_as("SELECT vector_size FROM vector_collections WHERE name = ?")
                    .bind(&collection)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            if exists.is_none() {
                return Err(VectorStoreError::Upsert(format!(
                    "collection {collection} not found"
                )));
            }

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            for r in records {
                let metadata = serde_json::to_string(&r.metadata)
                    .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
                sqlx::query(
                    "INSERT OR REPLACE INTO vector_records (collection, id, vector, metadata) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(&collection)
                .bind(&r.id)
                .bind(encode_vector(&r.vector))
                .bind(metadata)
                .execute(&mut *tx)
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            }
            tx.commit()
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            Ok(())
        })
    }

    fn query(
        &self,
        collection: &str,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredRecord>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let rows: Vec<(String, Vec<u8>, String)> = sqlx::query_as(
                "SELECT id, vector, metadata FROM vector_records WHERE collection = ?",
            )
            .bind(&collection)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VectorStoreError::Search(e.to_string()))?;

            let filter = filter.unwrap_or_default();
            let mut scored = Vec::with_capacity(rows.len());
            for (id, blob, metadata) in rows {
                let metadata: HashMap<String, serde_json::Value> = serde_json::from_str(&metadata)
                    .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
                if !matches_filter(&metadata, &filter) {
                    continue;
                }
                scored.push(ScoredRecord {
                    id,
                    score: cosine_similarity(&vector, &decode_vector(&blob)),
                    metadata,
                });
            }
            Ok(rank(scored, top_k))
        })
    }

    fn clear(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            sqlx::query("DELETE FROM vector_records WHERE collection = ?")
                .bind(&collection)
                .execute(&mut *tx)
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            sqlx::query("DELETE FROM vector_collections WHERE name = ?")
                .bind(&collection)
                .execute(&mut *tx)
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            tx.commit()
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            Ok(())
        })
    }

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<usize, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let row: (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM vector_records WHERE collection = ?")
                    .bind(&collection)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            usize::try_from(row.0).map_err(|e| VectorStoreError::Collection(e.to_string()))
        })
    }

    fn persist(&self) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, vector: Vec<f32>, file: &str) -> EmbeddingRecord {
        EmbeddingRecord {
            id: id.into(),
            vector,
            metadata: HashMap::from([
                ("file_path".into(), serde_json::json!(file)),
                ("start_line".into(), serde_json::json!(0)),
            ]),
        }
    }

    #[test]
    fn vector_blob_roundtrip() {
        let v = vec![0.25_f32, -1.5, 3.0];
        let blob = encode_vector(&v);
        assert_eq!(blob.len(), 12);
        assert_eq!(decode_vector(&blob), v);
    }

    #[tokio::test]
    async fn add_query_count_clear() {
        let store = SqliteVectorStore::open(":memory:").await.unwrap();
        store.ensure_collection("code", 2).await.unwrap();
        store
            .add(
                "code",
                vec![
                    record("a", vec![1.0, 0.0], "a.rs"),
                    record("b", vec![0.0, 1.0], "b.rs"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(store.count("code").await.unwrap(), 2);

        let hits = store.query("code", vec![0.1, 0.9], 5, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "b");
        assert_eq!(hits[0].metadata["file_path"], serde_json::json!("b.rs"));

        store.clear("code").await.unwrap();
        assert_eq!(store.count("code").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn add_without_collection_fails() {
        let store = SqliteVectorStore::open(":memory:").await.unwrap();
        let err = store
            .add("missing", vec![record("a", vec![1.0], "a.rs")])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::Upsert(_)));
    }

    #[tokio::test]
    async fn query_applies_filter() {
        let store = SqliteVectorStore::open(":memory:").await.unwrap();
        store.ensure_collection("code", 2).await.unwrap();
        store
            .add(
                "code",
                vec![
                    record("a", vec![1.0, 0.0], "a.rs"),
                    record("b", vec![1.0, 0.1], "b.rs"),
                ],
            )
            .await
            .unwrap();
        let hits = store
            .query(
                "code",
                vec![1.0, 0.0],
                5,
                Some(VectorFilter::text_eq("file_path", "b.rs")),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index/vectors.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteVectorStore::open(path).await.unwrap();
            store.ensure_collection("code", 2).await.unwrap();
            store
                .add("code", vec![record("a", vec![1.0, 0.0], "a.rs")])
                .await
                .unwrap();
            store.pool().close().await;
        }

        let reopened = SqliteVectorStore::open(path).await.unwrap();
        assert_eq!(reopened.persistence(), Persistence::Local);
        assert_eq!(reopened.count("code").await.unwrap(), 1);
    }
}
