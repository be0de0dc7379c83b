//! Error types for scry-index.

use crate::embedding::EmbedError;

/// Errors that can occur during registry, extraction and indexing operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// A language with this name is already registered and overwrite was not requested.
    #[error("language already registered: {0}")]
    DuplicateLanguage(String),

    /// The language definition is unusable (e.g. no extensions).
    #[error("invalid language spec for {name}: {reason}")]
    InvalidLanguageSpec { name: String, reason: String },

    /// No language with this name is registered.
    #[error("unknown language: {0}")]
    UnknownLanguage(String),

    /// A pattern file could not be read or did not compile against its grammar.
    #[error("failed to load patterns for {language}: {reason}")]
    GrammarLoad { language: String, reason: String },

    /// Tree-sitter parsing error.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Neither construction nor any later call supplied an embedding function.
    #[error("no embedding function supplied for collection {0}")]
    MissingEmbeddingFunction(String),

    /// The configured vector backend cannot be reached.
    #[error("vector backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Embedding function error.
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    /// Any other vector backend error.
    #[error("vector store error: {0}")]
    VectorStore(scry_store::VectorStoreError),

    /// IO error reading source files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An entry the directory walk could not read.
    #[error("walk error: {0}")]
    Walk(ignore::Error),

    /// Invalid search pattern.
    #[error("invalid pattern: {0}")]
    Pattern(String),
}

impl From<scry_store::VectorStoreError> for IndexError {
    fn from(err: scry_store::VectorStoreError) -> Self {
        match err {
            scry_store::VectorStoreError::Connection(msg) => Self::BackendUnavailable(msg),
            other => Self::VectorStore(other),
        }
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_become_backend_unavailable() {
        let err: IndexError = scry_store::VectorStoreError::Connection("refused".into()).into();
        assert!(matches!(err, IndexError::BackendUnavailable(ref m) if m == "refused"));
    }

    #[test]
    fn other_store_errors_are_wrapped() {
        let err: IndexError = scry_store::VectorStoreError::Search("boom".into()).into();
        assert!(matches!(err, IndexError::VectorStore(_)));
        assert_eq!(err.to_string(), "vector store error: search error: boom");
    }
}
