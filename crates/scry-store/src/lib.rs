//! Vector storage backends for scry.
//!
//! Every backend implements [`VectorBackend`]: add a batch of records, query
//! top-k by cosine similarity, clear a collection. Which one is used is a
//! configuration decision ([`VectorConfig`]), never a code change.

pub mod config;
pub mod in_memory_store;
pub mod qdrant_ops;
pub mod sqlite;
pub mod vector_store;

pub use config::{BackendKind, VectorConfig, open_backend};
pub use in_memory_store::InMemoryVectorStore;
pub use qdrant_ops::QdrantBackend;
pub use sqlite::SqliteVectorStore;
pub use vector_store::{
    BoxFuture, EmbeddingRecord, FieldCondition, FieldValue, Persistence, ScoredRecord, VectorBackend,
    VectorFilter, VectorStoreError,
};
