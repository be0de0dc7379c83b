//! Backend contract shared by every vector store implementation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    /// The backend could not be reached or opened.
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// One embedded item as handed to a backend.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub must: Vec<FieldCondition>,
    pub must_not: Vec<FieldCondition>,
}

impl VectorFilter {
    /// Filter that keeps records whose `field` equals `value`.
    #[must_use]
    pub fn text_eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            must: vec![FieldCondition {
                field: field.into(),
                value: FieldValue::Text(value.into()),
            }],
            must_not: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldCondition {
    pub field: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
}

/// A record returned by [`VectorBackend::query`].
///
/// `score` is cosine similarity for every shipped backend: higher means closer.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub id: String,
    pub score: f32,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Where a backend keeps its data between process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Lost on drop unless the backend supports an explicit snapshot.
    Ephemeral,
    /// Durable in a local file.
    Local,
    /// Durable on a remote service.
    Remote,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Storage capability required by the indexer.
///
/// Collections are addressed by name; one collection is one index identity.
pub trait VectorBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn persistence(&self) -> Persistence;

    /// Create the collection if missing. Idempotent.
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn add(
        &self,
        collection: &str,
        records: Vec<EmbeddingRecord>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Top-k nearest records, best first. A missing collection yields no hits.
    fn query(
        &self,
        collection: &str,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredRecord>, VectorStoreError>>;

    /// Drop every record of the collection. Clearing a missing collection is a no-op.
    fn clear(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<usize, VectorStoreError>>;

    /// Flush state to durable storage where the backend has any.
    fn persist(&self) -> BoxFuture<'_, Result<(), VectorStoreError>>;
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub(crate) fn matches_filter(
    payload: &HashMap<String, serde_json::Value>,
    filter: &VectorFilter,
) -> bool {
    for cond in &filter.must {
        let Some(val) = payload.get(&cond.field) else {
            return false;
        };
        if !field_matches(val, &cond.value) {
            return false;
        }
    }
    for cond in &filter.must_not {
        if let Some(val) = payload.get(&cond.field)
            && field_matches(val, &cond.value)
        {
            return false;
        }
    }
    true
}

fn field_matches(val: &serde_json::Value, expected: &FieldValue) -> bool {
    match expected {
        FieldValue::Integer(i) => val.as_i64() == Some(*i),
        FieldValue::Text(s) => val.as_str() == Some(s.as_str()),
    }
}

/// Sort best-first and keep `top_k`.
pub(crate) fn rank(mut scored: Vec<ScoredRecord>, top_k: usize) -> Vec<ScoredRecord> {
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(top_k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(id: &str, score: f32) -> ScoredRecord {
        ScoredRecord {
            id: id.into(),
            score,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn cosine_similarity_identical() {
        let a = [0.3, 0.4, 0.5];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn cosine_similarity_zero_vector() {
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn filter_must_and_must_not() {
        let payload = HashMap::from([
            ("file_path".to_string(), serde_json::json!("src/lib.rs")),
            ("start_line".to_string(), serde_json::json!(4)),
        ]);
        assert!(matches_filter(
            &payload,
            &VectorFilter::text_eq("file_path", "src/lib.rs")
        ));
        assert!(!matches_filter(
            &payload,
            &VectorFilter::text_eq("file_path", "src/main.rs")
        ));

        let exclude = VectorFilter {
            must: vec![],
            must_not: vec![FieldCondition {
                field: "start_line".into(),
                value: FieldValue::Integer(4),
            }],
        };
        assert!(!matches_filter(&payload, &exclude));
    }

    #[test]
    fn rank_orders_and_truncates() {
        let ranked = rank(
            vec![scored("a", 0.1), scored("b", 0.9), scored("c", 0.5)],
            2,
        );
        let ids: Vec<_> = ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);
    }

    mod proptest_ranking {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(200))]

            #[test]
            fn rank_is_sorted_and_bounded(
                scores in proptest::collection::vec(-1.0f32..1.0, 0..40),
                top_k in 0usize..50,
            ) {
                let input: Vec<_> = scores
                    .iter()
                    .enumerate()
                    .map(|(i, s)| scored(&i.to_string(), *s))
                    .collect();
                let ranked = rank(input, top_k);
                prop_assert_eq!(ranked.len(), scores.len().min(top_k));
                prop_assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
                let best = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                if let Some(first) = ranked.first() {
                    prop_assert_eq!(first.score, best);
                }
            }
        }
    }
}
