//! Persistent vector store keyed by chunk id.
//!
//! [`VectorIndex`] is the seam between the sync/retrieval logic and the
//! storage engine. [`SqliteIndex`] backs real projects
//! (`vectorstore/index.sqlite`); [`MemoryIndex`] backs tests. Both rank by
//! cosine distance with a brute-force scan, which is ample for a single
//! literature collection.
//!
//! Upserts replace an existing record with the same id (last write wins),
//! so the index never holds more than one record per chunk id.

mod memory;
mod sqlite;

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

use crate::models::{EmbeddingRecord, Metadata};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector index unavailable: {0}")]
    Unavailable(String),
    #[error("vector for '{id}' has {actual} dimensions; index holds {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },
    #[error("corrupt index record '{id}': {reason}")]
    Corrupt { id: String, reason: String },
}

impl From<sqlx::Error> for IndexError {
    fn from(e: sqlx::Error) -> Self {
        IndexError::Unavailable(e.to_string())
    }
}

/// What a stored record was computed from; lets a sync skip unchanged chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub content_hash: String,
    pub model: String,
}

/// A stored id and the `source_file` it was chunked from, when recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedId {
    pub id: String,
    pub source_file: Option<String>,
}

/// One nearest-neighbour result.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    /// Cosine distance to the query: 0 is identical, 2 is opposite.
    pub distance: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace records by id. Returns how many were written.
    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<usize, IndexError>;

    /// Fingerprints of the given ids that are present in the index.
    async fn fingerprints(&self, ids: &[String]) -> Result<HashMap<String, Fingerprint>, IndexError>;

    /// Up to `k` records closest to `query`, ascending by distance.
    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;

    /// Every stored id, sorted.
    async fn ids(&self) -> Result<Vec<IndexedId>, IndexError>;

    /// Remove the given ids. Unknown ids are ignored. Returns how many went.
    async fn delete(&self, ids: &[String]) -> Result<usize, IndexError>;

    async fn clear(&self) -> Result<(), IndexError>;
}

/// Sort ascending by distance (ties by id) and keep the first `k`.
pub(crate) fn rank_hits(mut hits: Vec<IndexHit>, k: usize) -> Vec<IndexHit> {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}

/// Reject a batch whose vectors disagree with `expected` or with each other.
pub(crate) fn check_dims(
    records: &[EmbeddingRecord],
    expected: Option<usize>,
) -> Result<Option<usize>, IndexError> {
    let mut dims = expected;
    for record in records {
        match dims {
            Some(d) if d != record.vector.len() => {
                return Err(IndexError::DimensionMismatch {
                    id: record.id.clone(),
                    expected: d,
                    actual: record.vector.len(),
                })
            }
            Some(_) => {}
            None => dims = Some(record.vector.len()),
        }
    }
    Ok(dims)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, distance: f32) -> IndexHit {
        IndexHit {
            id: id.to_string(),
            text: String::new(),
            metadata: Metadata::new(),
            distance,
        }
    }

    #[test]
    fn rank_orders_by_distance_then_id() {
        let ranked = rank_hits(vec![hit("z", 0.5), hit("b", 0.1), hit("a", 0.5)], 2);
        let ids: Vec<&str> = ranked.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn mixed_dims_in_one_batch_rejected() {
        let records = vec![
            test_support::record("a", vec![1.0, 0.0]),
            test_support::record("b", vec![1.0]),
        ];
        assert!(check_dims(&records, None).is_err());
        assert_eq!(check_dims(&records[..1], None).unwrap(), Some(2));
    }
}
