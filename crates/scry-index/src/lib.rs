//! Code intelligence over a source repository: query-driven symbol
//! extraction for many languages, symbol-aware chunking, budgeted context
//! assembly and semantic search over interchangeable vector backends.
//!
//! Data flows leaves first: [`GrammarRegistry`] → [`SymbolExtractor`] →
//! [`RepoMapper`] → chunker → [`VectorSearcher`] (build/search) or
//! [`context::assemble`] (prompt context).

pub mod chunker;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod languages;
pub mod registry;
pub mod repo_map;
pub mod searcher;

pub use chunker::{Chunk, ChunkStrategy, chunk_by_lines, chunk_by_symbols};
pub use config::Config;
pub use context::{AssembledContext, ContextAssembler, assemble, chunk_header};
pub use embedding::{
    BatchFnEmbedder, EmbedBatchFuture, EmbedError, EmbedFuture, EmbedMode, Embedder,
    EmbeddingAdapter, FnEmbedder,
};
pub use error::{IndexError, Result};
pub use extractor::{Symbol, SymbolExtractor, SymbolKind};
pub use registry::{GrammarRegistry, GrammarSource, LanguagePlugin, LanguageSpec};
pub use repo_map::{FileNode, RepoMapper, RepoSymbols, ScanWarning, TextMatch};
pub use searcher::{IndexReport, SearchHit, SearcherConfig, VectorSearcher};
