//! Retrieval engine: embed a query, ask the index for its nearest records
//! and turn them into ranked [`SearchResult`]s.
//!
//! The relevance threshold passed to [`Retriever::search`] is advisory. It
//! is logged next to the distance statistics but never removes results;
//! callers that want hard filtering apply [`filter_by_threshold`] afterwards.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::embedding::{embed_query, Embedder};
use crate::index::{IndexError, IndexHit, VectorIndex};
use crate::models::SearchResult;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query embedding failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    /// Hits returned by the index without a `chunk_id` in their metadata.
    pub dropped: usize,
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Up to `top_k` results, ascending by distance, ranked from 1.
    ///
    /// An empty query, `top_k == 0` or an empty index give an empty outcome.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        threshold: Option<f32>,
    ) -> Result<SearchOutcome, SearchError> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(SearchOutcome::default());
        }
        if self.index.count().await? == 0 {
            tracing::info!("Vector index is empty");
            return Ok(SearchOutcome::default());
        }

        let vector = embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(SearchError::Embedding)?;
        let hits = self.index.nearest(&vector, top_k).await?;

        let outcome = to_outcome(hits);
        if outcome.dropped > 0 {
            tracing::warn!(dropped = outcome.dropped, "Dropped hits without chunk_id");
        }
        log_distances(&outcome.results, threshold);
        Ok(outcome)
    }
}

fn to_outcome(hits: Vec<IndexHit>) -> SearchOutcome {
    let mut outcome = SearchOutcome::default();
    for hit in hits {
        let Some(chunk_id) = hit
            .metadata
            .get("chunk_id")
            .and_then(|v| v.as_str())
            .filter(|id| !id.trim().is_empty())
        else {
            tracing::debug!(id = %hit.id, "Hit has no chunk_id");
            outcome.dropped += 1;
            continue;
        };
        let source = ["source_file", "source"]
            .iter()
            .find_map(|key| hit.metadata.get(*key).and_then(|v| v.as_str()))
            .unwrap_or("unknown");
        outcome.results.push(SearchResult {
            rank: outcome.results.len() + 1,
            chunk_id: chunk_id.to_string(),
            source: source.to_string(),
            distance: hit.distance,
        });
    }
    outcome
}

fn log_distances(results: &[SearchResult], threshold: Option<f32>) {
    if results.is_empty() {
        return;
    }
    let min = results.iter().map(|r| r.distance).fold(f32::INFINITY, f32::min);
    let max = results.iter().map(|r| r.distance).fold(f32::NEG_INFINITY, f32::max);
    let avg = results.iter().map(|r| r.distance).sum::<f32>() / results.len() as f32;
    tracing::debug!(results = results.len(), min, max, avg, "Search distances");

    if let Some(t) = threshold {
        let above = results.iter().filter(|r| r.distance > t).count();
        tracing::debug!(threshold = t, above, "Relevance threshold is advisory; nothing removed");
    }
}

/// Keep results with `distance <= threshold`, re-ranking from 1.
pub fn filter_by_threshold(results: Vec<SearchResult>, threshold: f32) -> Vec<SearchResult> {
    results
        .into_iter()
        .filter(|r| r.distance <= threshold)
        .enumerate()
        .map(|(idx, r)| SearchResult { rank: idx + 1, ..r })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::index::MemoryIndex;
    use crate::models::{EmbeddingRecord, Metadata};

    const DIMS: usize = 256;

    fn record(embedder: &HashEmbedder, id: &str, text: &str) -> EmbeddingRecord {
        let mut metadata = Metadata::new();
        metadata.insert("chunk_id".into(), id.into());
        metadata.insert("source_file".into(), format!("{}.pdf", id).into());
        EmbeddingRecord {
            id: id.to_string(),
            text: text.to_string(),
            vector: embedder.encode(text),
            metadata,
            content_hash: String::new(),
            model: embedder.model_name().to_string(),
        }
    }

    async fn retriever_with(texts: &[(&str, &str)]) -> (Arc<MemoryIndex>, Retriever) {
        let embedder = Arc::new(HashEmbedder::new(DIMS).unwrap());
        let index = Arc::new(MemoryIndex::new());
        let records: Vec<_> = texts
            .iter()
            .map(|(id, text)| record(&embedder, id, text))
            .collect();
        index.upsert(&records).await.unwrap();
        (index.clone(), Retriever::new(embedder, index))
    }

    #[tokio::test]
    async fn top_k_shape() {
        let (_, retriever) = retriever_with(&[
            ("c0", "graph neural networks for molecules"),
            ("c1", "protein folding with deep learning"),
            ("c2", "molecules and graph kernels"),
            ("c3", "medieval trade routes"),
            ("c4", "soil chemistry of wetlands"),
        ])
        .await;

        let outcome = retriever
            .search("graph networks for molecules", 3, None)
            .await
            .unwrap();
        let results = outcome.results;
        assert_eq!(results.len(), 3);
        assert_eq!(
            results.iter().map(|r| r.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert_eq!(results[0].chunk_id, "c0");
        assert_eq!(results[0].source, "c0.pdf");
    }

    #[tokio::test]
    async fn empty_index_gives_no_results() {
        let (_, retriever) = retriever_with(&[]).await;
        let outcome = retriever.search("anything", 5, Some(0.1)).await.unwrap();
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.dropped, 0);
    }

    #[tokio::test]
    async fn threshold_does_not_filter() {
        let (_, retriever) = retriever_with(&[("a", "alpha beta"), ("b", "gamma delta")]).await;
        let outcome = retriever.search("alpha beta", 2, Some(0.0)).await.unwrap();
        assert_eq!(outcome.results.len(), 2);

        let filtered = filter_by_threshold(outcome.results, 0.5);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].chunk_id, "a");
        assert_eq!(filtered[0].rank, 1);
    }

    #[tokio::test]
    async fn hits_without_chunk_id_are_dropped() {
        let embedder = HashEmbedder::new(DIMS).unwrap();
        let (index, retriever) = retriever_with(&[("a", "alpha")]).await;
        let mut orphan = record(&embedder, "orphan", "alpha");
        orphan.metadata.remove("chunk_id");
        index.upsert(&[orphan]).await.unwrap();

        let outcome = retriever.search("alpha", 5, None).await.unwrap();
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].rank, 1);
    }

    #[test]
    fn source_falls_back_to_unknown() {
        let mut metadata = Metadata::new();
        metadata.insert("chunk_id".into(), "x_sent0".into());
        let outcome = to_outcome(vec![IndexHit {
            id: "x_sent0".into(),
            text: String::new(),
            metadata,
            distance: 0.2,
        }]);
        assert_eq!(outcome.results[0].source, "unknown");
    }
}
