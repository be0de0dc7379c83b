//! Backend selection.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::in_memory_store::InMemoryVectorStore;
use crate::qdrant_ops::QdrantBackend;
use crate::sqlite::SqliteVectorStore;
use crate::vector_store::{VectorBackend, VectorStoreError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    #[default]
    Sqlite,
    Qdrant,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "sqlite" | "local" => Ok(Self::Sqlite),
            "qdrant" | "remote" => Ok(Self::Qdrant),
            other => Err(format!("unknown vector backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
    /// JSON snapshot for the in-memory backend; `None` keeps it ephemeral.
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

fn default_sqlite_path() -> String {
    ".scry/vectors.db".into()
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            sqlite_path: default_sqlite_path(),
            qdrant_url: default_qdrant_url(),
            snapshot_path: None,
        }
    }
}

/// Open the backend selected by `config`.
///
/// # Errors
///
/// Returns [`VectorStoreError::Connection`] if the backend cannot be opened.
pub async fn open_backend(config: &VectorConfig) -> Result<Arc<dyn VectorBackend>, VectorStoreError> {
    let backend: Arc<dyn VectorBackend> = match config.backend {
        BackendKind::Memory => match &config.snapshot_path {
            Some(path) => Arc::new(InMemoryVectorStore::with_snapshot(path)?),
            None => Arc::new(InMemoryVectorStore::new()),
        },
        BackendKind::Sqlite => Arc::new(SqliteVectorStore::open(&config.sqlite_path).await?),
        BackendKind::Qdrant => Arc::new(QdrantBackend::new(&config.qdrant_url)?),
    };
    tracing::debug!(backend = backend.name(), "vector backend opened");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_from_str() {
        assert_eq!("memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!(" SQLite ".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert_eq!("remote".parse::<BackendKind>().unwrap(), BackendKind::Qdrant);
        assert_eq!(
            "chroma".parse::<BackendKind>().unwrap_err(),
            "unknown vector backend: chroma"
        );
    }

    #[test]
    fn deserialize_with_defaults() {
        let config: VectorConfig = serde_json::from_value(serde_json::json!({
            "backend": "qdrant"
        }))
        .unwrap();
        assert_eq!(config.backend, BackendKind::Qdrant);
        assert_eq!(config.qdrant_url, "http://localhost:6334");
        assert_eq!(config.sqlite_path, ".scry/vectors.db");
    }

    #[tokio::test]
    async fn open_memory_backend() {
        let config = VectorConfig {
            backend: BackendKind::Memory,
            ..VectorConfig::default()
        };
        let backend = open_backend(&config).await.unwrap();
        assert_eq!(backend.name(), "memory");
    }

    #[tokio::test]
    async fn open_sqlite_backend_in_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let config = VectorConfig {
            backend: BackendKind::Sqlite,
            sqlite_path: dir.path().join("v.db").to_string_lossy().into_owned(),
            ..VectorConfig::default()
        };
        let backend = open_backend(&config).await.unwrap();
        assert_eq!(backend.name(), "sqlite");
    }
}
