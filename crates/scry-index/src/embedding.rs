//! Embedding function contract and the batch/single adapter.
//!
//! Callers supply an [`Embedder`]; the indexer only talks to it through an
//! [`EmbeddingAdapter`], which tries one batch call first and falls back to
//! per-text calls when the embedder has no batch support. The working mode
//! is remembered for the lifetime of the adapter.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The embedder only accepts one text per call.
    #[error("batch embedding not supported")]
    BatchUnsupported,

    #[error("embedding count mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("embedding provider error: {0}")]
    Provider(String),
}

pub type EmbedFuture = Pin<Box<dyn Future<Output = Result<Vec<f32>, EmbedError>> + Send>>;

pub type EmbedBatchFuture =
    Pin<Box<dyn Future<Output = Result<Vec<Vec<f32>>, EmbedError>> + Send>>;

/// Text to vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> EmbedFuture;

    /// One vector per input, in input order.
    fn embed_batch(&self, texts: &[String]) -> EmbedBatchFuture {
        let _ = texts;
        Box::pin(async { Err(EmbedError::BatchUnsupported) })
    }
}

/// Embedder backed by a single-text closure.
pub struct FnEmbedder<F> {
    f: F,
}

impl<F> FnEmbedder<F>
where
    F: Fn(&str) -> EmbedFuture + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Embedder for FnEmbedder<F>
where
    F: Fn(&str) -> EmbedFuture + Send + Sync,
{
    fn embed(&self, text: &str) -> EmbedFuture {
        (self.f)(text)
    }
}

/// Embedder backed by a batch closure.
pub struct BatchFnEmbedder<F> {
    f: F,
}

impl<F> BatchFnEmbedder<F>
where
    F: Fn(Vec<String>) -> EmbedBatchFuture + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Embedder for BatchFnEmbedder<F>
where
    F: Fn(Vec<String>) -> EmbedBatchFuture + Send + Sync,
{
    fn embed(&self, text: &str) -> EmbedFuture {
        let fut = (self.f)(vec![text.to_owned()]);
        Box::pin(async move {
            let mut vectors = fut.await?;
            if vectors.len() != 1 {
                return Err(EmbedError::LengthMismatch {
                    expected: 1,
                    got: vectors.len(),
                });
            }
            Ok(vectors.remove(0))
        })
    }

    fn embed_batch(&self, texts: &[String]) -> EmbedBatchFuture {
        (self.f)(texts.to_vec())
    }
}

/// Calling convention that worked for an embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    Batch,
    Single,
}

const MODE_UNKNOWN: u8 = 0;
const MODE_BATCH: u8 = 1;
const MODE_SINGLE: u8 = 2;

/// Wraps an [`Embedder`] and caches whether it takes batches.
pub struct EmbeddingAdapter {
    inner: Arc<dyn Embedder>,
    mode: AtomicU8,
}

impl std::fmt::Debug for EmbeddingAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingAdapter")
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

impl EmbeddingAdapter {
    #[must_use]
    pub fn new(inner: Arc<dyn Embedder>) -> Self {
        Self {
            inner,
            mode: AtomicU8::new(MODE_UNKNOWN),
        }
    }

    /// `None` until the first batch has been embedded.
    #[must_use]
    pub fn mode(&self) -> Option<EmbedMode> {
        match self.mode.load(Ordering::Relaxed) {
            MODE_BATCH => Some(EmbedMode::Batch),
            MODE_SINGLE => Some(EmbedMode::Single),
            _ => None,
        }
    }

    /// # Errors
    ///
    /// Propagates the embedder's error.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.inner.embed(text).await
    }

    /// Embed `texts`, one vector per text.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::LengthMismatch`] if a batch call returns the
    /// wrong number of vectors, or the embedder's own error.
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if self.mode.load(Ordering::Relaxed) != MODE_SINGLE {
            match self.inner.embed_batch(texts).await {
                Ok(vectors) => {
                    if vectors.len() != texts.len() {
                        return Err(EmbedError::LengthMismatch {
                            expected: texts.len(),
                            got: vectors.len(),
                        });
                    }
                    self.mode.store(MODE_BATCH, Ordering::Relaxed);
                    return Ok(vectors);
                }
                Err(EmbedError::BatchUnsupported) => {
                    tracing::debug!("embedder has no batch support, falling back to single calls");
                    self.mode.store(MODE_SINGLE, Ordering::Relaxed);
                }
                Err(e) => return Err(e),
            }
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.inner.embed(text).await?);
        }
        Ok(vectors)
    }
}
