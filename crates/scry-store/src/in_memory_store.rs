use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::vector_store::{
    BoxFuture, EmbeddingRecord, Persistence, ScoredRecord, VectorBackend, VectorFilter,
    VectorStoreError, cosine_similarity, matches_filter, rank,
};

#[derive(Clone, Serialize, Deserialize)]
struct StoredPoint {
    vector: Vec<f32>,
    payload: HashMap<String, serde_json::Value>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
struct InMemoryCollection {
    points: HashMap<String, StoredPoint>,
}

/// Process-local backend.
///
/// Data lives as long as the value unless a snapshot path is configured, in
/// which case [`VectorBackend::persist`] writes every collection as JSON and
/// [`InMemoryVectorStore::with_snapshot`] reloads it.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
    snapshot: Option<PathBuf>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            snapshot: None,
        }
    }

    /// Open a store backed by a JSON snapshot file. A missing file starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn with_snapshot(path: impl AsRef<Path>) -> Result<Self, VectorStoreError> {
        let path = path.as_ref().to_path_buf();
        let collections = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| VectorStoreError::Connection(format!("{}: {e}", path.display())))?;
            serde_json::from_str(&raw)
                .map_err(|e| VectorStoreError::Serialization(e.to_string()))?
        } else {
            HashMap::new()
        };
        Ok(Self {
            collections: RwLock::new(collections),
            snapshot: Some(path),
        })
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore")
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}

impl VectorBackend for InMemoryVectorStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn persistence(&self) -> Persistence {
        if self.snapshot.is_some() {
            Persistence::Local
        } else {
            Persistence::Ephemeral
        }
    }

    fn ensure_collection(
        &self,
        collection: &str,
        _vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            cols.entry(collection).or_default();
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
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            let col = cols.get_mut(&collection).ok_or_else(|| {
                VectorStoreError::Upsert(format!("collection {collection} not found"))
            })?;
            for r in records {
                col.points.insert(
                    r.id,
                    StoredPoint {
                        vector: r.vector,
                        payload: r.metadata,
                    },
                );
            }
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
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;
            let Some(col) = cols.get(&collection) else {
                return Ok(Vec::new());
            };

            let empty_filter = VectorFilter::default();
            let f = filter.as_ref().unwrap_or(&empty_filter);

            let scored: Vec<ScoredRecord> = col
                .points
                .iter()
                .filter(|(_, sp)| matches_filter(&sp.payload, f))
                .map(|(id, sp)| ScoredRecord {
                    id: id.clone(),
                    score: cosine_similarity(&vector, &sp.vector),
                    metadata: sp.payload.clone(),
                })
                .collect();

            Ok(rank(scored, top_k))
        })
    }

    fn clear(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            cols.remove(&collection);
            Ok(())
        })
    }

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<usize, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(cols.get(&collection).map_or(0, |c| c.points.len()))
        })
    }

    fn persist(&self) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        Box::pin(async move {
            let Some(path) = &self.snapshot else {
                return Ok(());
            };
            let json = {
                let cols = self
                    .collections
                    .read()
                    .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
                serde_json::to_string(&*cols)
                    .map_err(|e| VectorStoreError::Serialization(e.to_string()))?
            };
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
            }
            tokio::fs::write(path, json)
                .await
                .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
            tracing::debug!(path = %path.display(), "in-memory vector snapshot written");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, vector: Vec<f32>, file: &str) -> EmbeddingRecord {
        EmbeddingRecord {
            id: id.into(),
            vector,
            metadata: HashMap::from([("file_path".into(), serde_json::json!(file))]),
        }
    }

    #[tokio::test]
    async fn ensure_collection_idempotent() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("test", 3).await.unwrap();
        store
            .add("test", vec![record("a", vec![1.0, 0.0, 0.0], "a.rs")])
            .await
            .unwrap();
        store.ensure_collection("test", 3).await.unwrap();
        assert_eq!(store.count("test").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn add_requires_collection() {
        let store = InMemoryVectorStore::new();
        let err = store
            .add("missing", vec![record("a", vec![1.0], "a.rs")])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::Upsert(_)));
    }

    #[tokio::test]
    async fn add_and_query() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("test", 3).await.unwrap();
        store
            .add(
                "test",
                vec![
                    record("a", vec![1.0, 0.0, 0.0], "a.rs"),
                    record("b", vec![0.0, 1.0, 0.0], "b.rs"),
                ],
            )
            .await
            .unwrap();

        let results = store
            .query("test", vec![1.0, 0.0, 0.0], 2, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert!((results[0].score - 1.0).abs() < f32::EPSILON);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn query_with_filter() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("test", 3).await.unwrap();
        store
            .add(
                "test",
                vec![
                    record("a", vec![1.0, 0.0, 0.0], "a.rs"),
                    record("b", vec![0.9, 0.1, 0.0], "b.rs"),
                ],
            )
            .await
            .unwrap();

        let results = store
            .query(
                "test",
                vec![1.0, 0.0, 0.0],
                10,
                Some(VectorFilter::text_eq("file_path", "b.rs")),
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "b");
    }

    #[tokio::test]
    async fn query_missing_collection_is_empty() {
        let store = InMemoryVectorStore::new();
        let results = store.query("nope", vec![1.0], 5, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn clear_drops_records() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("test", 1).await.unwrap();
        store
            .add("test", vec![record("a", vec![1.0], "a.rs")])
            .await
            .unwrap();
        store.clear("test").await.unwrap();
        assert_eq!(store.count("test").await.unwrap(), 0);
        store.clear("test").await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/vectors.json");

        let store = InMemoryVectorStore::with_snapshot(&path).unwrap();
        assert_eq!(store.persistence(), Persistence::Local);
        store.ensure_collection("code", 2).await.unwrap();
        store
            .add("code", vec![record("a", vec![0.5, 0.5], "a.rs")])
            .await
            .unwrap();
        store.persist().await.unwrap();

        let reopened = InMemoryVectorStore::with_snapshot(&path).unwrap();
        assert_eq!(reopened.count("code").await.unwrap(), 1);
        let hits = reopened.query("code", vec![0.5, 0.5], 1, None).await.unwrap();
        assert_eq!(hits[0].metadata["file_path"], serde_json::json!("a.rs"));
    }

    #[tokio::test]
    async fn persist_without_snapshot_is_noop() {
        let store = InMemoryVectorStore::default();
        assert_eq!(store.persistence(), Persistence::Ephemeral);
        store.persist().await.unwrap();
    }

    #[test]
    fn debug_format() {
        let dbg = format!("{:?}", InMemoryVectorStore::new());
        assert!(dbg.contains("InMemoryVectorStore"));
    }
}
