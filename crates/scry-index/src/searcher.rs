//! Vector index over a repository: walk → chunk → embed → store, and
//! semantic search back out.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use scry_store::{EmbeddingRecord, ScoredRecord, VectorBackend, VectorFilter};

use crate::chunker::{Chunk, ChunkStrategy, chunk_by_lines, chunk_by_symbols};
use crate::embedding::{Embedder, EmbeddingAdapter};
use crate::error::{IndexError, Result};
use crate::repo_map::{RepoMapper, ScanWarning, WORKTREE_REF};

/// Settings for one index identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearcherConfig {
    pub collection: String,
    /// Chunk window in lines.
    pub max_lines: usize,
    /// Texts per embedding call.
    pub batch_size: usize,
    /// Files larger than this are skipped.
    pub max_file_bytes: u64,
}

impl Default for SearcherConfig {
    fn default() -> Self {
        Self {
            collection: "scry_code".into(),
            max_lines: 60,
            batch_size: 32,
            max_file_bytes: 1024 * 1024,
        }
    }
}

/// Summary of an indexing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub chunks_indexed: usize,
    pub warnings: Vec<ScanWarning>,
    pub duration_ms: u64,
}

/// A search result with decoded payload. Lines are 0-indexed, `end_line` inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub file_path: String,
    pub score: f32,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub symbol: Option<String>,
    pub kind: Option<String>,
}

impl From<SearchHit> for Chunk {
    fn from(hit: SearchHit) -> Self {
        Self {
            file_path: hit.file_path,
            start_line: hit.start_line,
            end_line: hit.end_line,
            text: hit.content,
            symbols: hit.symbol.into_iter().collect(),
        }
    }
}

struct PendingChunk {
    chunk: Chunk,
    kind: Option<String>,
}

/// Builds and queries one collection of a [`VectorBackend`].
pub struct VectorSearcher {
    mapper: Arc<RepoMapper>,
    backend: Arc<dyn VectorBackend>,
    config: SearcherConfig,
    embedder: RwLock<Option<Arc<EmbeddingAdapter>>>,
}

impl std::fmt::Debug for VectorSearcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorSearcher")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl VectorSearcher {
    #[must_use]
    pub fn new(
        mapper: Arc<RepoMapper>,
        backend: Arc<dyn VectorBackend>,
        config: SearcherConfig,
    ) -> Self {
        Self {
            mapper,
            backend,
            config,
            embedder: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn with_embedder(self, embedder: Arc<dyn Embedder>) -> Self {
        self.set_embedder(embedder);
        self
    }

    /// Replace the embedding function. The batch/single mode is probed anew.
    pub fn set_embedder(&self, embedder: Arc<dyn Embedder>) {
        let adapter = Arc::new(EmbeddingAdapter::new(embedder));
        *self.embedder.write().unwrap_or_else(PoisonError::into_inner) = Some(adapter);
    }

    #[must_use]
    pub fn config(&self) -> &SearcherConfig {
        &self.config
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn VectorBackend> {
        &self.backend
    }

    fn adapter(&self) -> Result<Arc<EmbeddingAdapter>> {
        self.embedder
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| IndexError::MissingEmbeddingFunction(self.config.collection.clone()))
    }

    /// Rebuild the collection from every supported file under `root`.
    ///
    /// The collection is cleared first, so rebuilding an unchanged tree
    /// leaves the record count unchanged. Unreadable and oversized files are
    /// skipped and reported.
    ///
    /// # Errors
    ///
    /// - [`IndexError::MissingEmbeddingFunction`] if no embedder was supplied
    /// - [`IndexError::BackendUnavailable`] if the backend cannot be reached
    /// - embedding or other backend failures
    pub async fn build_index(&self, root: &Path, chunk_by: ChunkStrategy) -> Result<IndexReport> {
        let adapter = self.adapter()?;
        let start = std::time::Instant::now();
        let mut report = IndexReport::default();

        self.backend.clear(&self.config.collection).await?;

        let registry = self.mapper.extractor().registry();
        let (nodes, unreadable) = self.mapper.walk_tree(root, WORKTREE_REF)?;
        for warning in unreadable {
            skip(&mut report, warning.path, warning.message);
        }
        let files: Vec<_> = nodes
            .into_iter()
            .filter(|n| !n.is_dir && registry.is_supported(Path::new(&n.path)))
            .collect();
        tracing::info!(
            collection = %self.config.collection,
            total = files.len(),
            strategy = %chunk_by,
            "indexing started"
        );

        let mut pending = Vec::new();
        for node in files {
            report.files_scanned += 1;
            if node.size.is_some_and(|s| s > self.config.max_file_bytes) {
                skip(&mut report, node.path, "file exceeds size limit".into());
                continue;
            }
            let source = match tokio::fs::read_to_string(root.join(&node.path)).await {
                Ok(source) => source,
                Err(e) => {
                    skip(&mut report, node.path, e.to_string());
                    continue;
                }
            };
            let chunks = self.chunk_file(&node.path, &source, chunk_by);
            if !chunks.is_empty() {
                report.files_indexed += 1;
            }
            tracing::debug!(file = %node.path, chunks = chunks.len(), "file chunked");
            pending.extend(chunks);
        }

        report.chunks_indexed = self.store_chunks(&adapter, pending).await?;
        self.backend.persist().await?;
        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            collection = %self.config.collection,
            files = report.files_indexed,
            skipped = report.files_skipped,
            chunks = report.chunks_indexed,
            duration_ms = report.duration_ms,
            "indexing complete"
        );
        Ok(report)
    }

    /// Add caller-prepared chunks to the collection without clearing it.
    ///
    /// # Errors
    ///
    /// Same as [`Self::build_index`].
    pub async fn index_chunks(&self, chunks: Vec<Chunk>) -> Result<IndexReport> {
        let adapter = self.adapter()?;
        let start = std::time::Instant::now();
        let mut files: Vec<&str> = chunks.iter().map(|c| c.file_path.as_str()).collect();
        files.sort_unstable();
        files.dedup();
        let mut report = IndexReport {
            files_scanned: files.len(),
            files_indexed: files.len(),
            ..IndexReport::default()
        };

        let pending = chunks
            .into_iter()
            .map(|chunk| PendingChunk { chunk, kind: None })
            .collect();
        report.chunks_indexed = self.store_chunks(&adapter, pending).await?;
        self.backend.persist().await?;
        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        Ok(report)
    }

    fn chunk_file(&self, rel_path: &str, source: &str, chunk_by: ChunkStrategy) -> Vec<PendingChunk> {
        match chunk_by {
            ChunkStrategy::Lines => chunk_by_lines(rel_path, source, self.config.max_lines)
                .into_iter()
                .map(|chunk| PendingChunk { chunk, kind: None })
                .collect(),
            ChunkStrategy::Symbols => {
                let symbols = self
                    .mapper
                    .extractor()
                    .extract_from_path(Path::new(rel_path), source)
                    .unwrap_or_else(|e| {
                        tracing::warn!(file = rel_path, error = %e, "extraction failed, chunking by lines");
                        Vec::new()
                    });
                let kinds: HashMap<&str, &str> = symbols
                    .iter()
                    .filter(|s| s.kind.is_definition())
                    .map(|s| (s.name.as_str(), s.kind.as_str()))
                    .collect();
                chunk_by_symbols(rel_path, source, &symbols, self.config.max_lines)
                    .into_iter()
                    .map(|chunk| {
                        let kind = chunk
                            .symbols
                            .first()
                            .and_then(|name| kinds.get(name.as_str()))
                            .map(|k| (*k).to_string());
                        PendingChunk { chunk, kind }
                    })
                    .collect()
            }
        }
    }

    async fn store_chunks(
        &self,
        adapter: &EmbeddingAdapter,
        pending: Vec<PendingChunk>,
    ) -> Result<usize> {
        let collection = &self.config.collection;
        let mut stored = 0;
        let mut ensured = false;

        for batch in pending.chunks(self.config.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|p| p.chunk.text.clone()).collect();
            let vectors = adapter.embed_all(&texts).await?;

            if !ensured {
                let size = vectors.first().map_or(0, Vec::len);
                self.backend
                    .ensure_collection(collection, u64::try_from(size).unwrap_or(u64::MAX))
                    .await?;
                ensured = true;
            }

            let records: Vec<EmbeddingRecord> = batch
                .iter()
                .zip(vectors)
                .map(|(p, vector)| chunk_record(p, vector))
                .collect();
            stored += records.len();
            self.backend.add(collection, records).await?;
            tracing::debug!(collection = %collection, stored, "batch stored");
        }
        Ok(stored)
    }

    /// Top `top_k` chunks closest to `query`, best first.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::MissingEmbeddingFunction`] without an embedder,
    /// or the embedding/backend failure.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        self.search_filtered(query, top_k, None).await
    }

    /// [`Self::search`] restricted by a payload filter, e.g.
    /// `VectorFilter::text_eq("file_path", "src/lib.rs")`.
    ///
    /// # Errors
    ///
    /// See [`Self::search`].
    pub async fn search_filtered(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<VectorFilter>,
    ) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let adapter = self.adapter()?;
        let vector = adapter.embed_one(query).await?;
        let records = self
            .backend
            .query(&self.config.collection, vector, top_k, filter)
            .await?;

        let mut hits: Vec<SearchHit> = records.into_iter().filter_map(decode_hit).collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Number of records in the collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend count fails.
    pub async fn indexed_count(&self) -> Result<usize> {
        Ok(self.backend.count(&self.config.collection).await?)
    }
}

fn skip(report: &mut IndexReport, path: String, message: String) {
    tracing::warn!(file = %path, reason = %message, "file skipped");
    report.files_skipped += 1;
    report.warnings.push(ScanWarning { path, message });
}

fn chunk_record(pending: &PendingChunk, vector: Vec<f32>) -> EmbeddingRecord {
    let chunk = &pending.chunk;
    let metadata = HashMap::from([
        ("file_path".to_string(), serde_json::json!(chunk.file_path)),
        ("start_line".to_string(), serde_json::json!(chunk.start_line)),
        ("end_line".to_string(), serde_json::json!(chunk.end_line)),
        ("symbol".to_string(), serde_json::json!(chunk.symbols.first())),
        ("kind".to_string(), serde_json::json!(pending.kind)),
        ("content".to_string(), serde_json::json!(chunk.text)),
    ]);
    EmbeddingRecord {
        id: uuid::Uuid::new_v4().to_string(),
        vector,
        metadata,
    }
}

fn decode_hit(record: ScoredRecord) -> Option<SearchHit> {
    let hit = payload_hit(&record);
    if hit.is_none() {
        tracing::warn!(id = %record.id, "record without chunk payload ignored");
    }
    hit
}

fn payload_hit(record: &ScoredRecord) -> Option<SearchHit> {
    let meta = &record.metadata;
    let text = |key: &str| meta.get(key).and_then(|v| v.as_str()).map(str::to_owned);
    let line = |key: &str| {
        meta.get(key)
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| usize::try_from(v).ok())
    };
    Some(SearchHit {
        file_path: text("file_path")?,
        score: record.score,
        content: text("content")?,
        start_line: line("start_line")?,
        end_line: line("end_line")?,
        symbol: text("symbol"),
        kind: text("kind"),
    })
}
