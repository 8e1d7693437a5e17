//! In-memory [`VectorIndex`] for tests and throwaway sessions.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{check_dims, rank_hits, Fingerprint, IndexError, IndexHit, IndexedId, VectorIndex};
use crate::embedding::cosine_distance;
use crate::models::EmbeddingRecord;

#[derive(Default)]
pub struct MemoryIndex {
    records: RwLock<BTreeMap<String, EmbeddingRecord>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> IndexError {
    IndexError::Unavailable("in-memory index lock poisoned".to_string())
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<usize, IndexError> {
        let mut stored = self.records.write().map_err(poisoned)?;
        let existing = stored.values().next().map(|r| r.vector.len());
        check_dims(records, existing)?;
        for record in records {
            stored.insert(record.id.clone(), record.clone());
        }
        Ok(records.len())
    }

    async fn fingerprints(&self, ids: &[String]) -> Result<HashMap<String, Fingerprint>, IndexError> {
        let stored = self.records.read().map_err(poisoned)?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                stored.get(id).map(|r| {
                    (
                        id.clone(),
                        Fingerprint {
                            content_hash: r.content_hash.clone(),
                            model: r.model.clone(),
                        },
                    )
                })
            })
            .collect())
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError> {
        let stored = self.records.read().map_err(poisoned)?;
        if let Some(first) = stored.values().next() {
            if first.vector.len() != query.len() {
                return Err(IndexError::DimensionMismatch {
                    id: "<query>".to_string(),
                    expected: first.vector.len(),
                    actual: query.len(),
                });
            }
        }
        let hits = stored
            .values()
            .map(|r| IndexHit {
                id: r.id.clone(),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                distance: cosine_distance(query, &r.vector),
            })
            .collect();
        Ok(rank_hits(hits, k))
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.records.read().map_err(poisoned)?.len())
    }

    async fn ids(&self) -> Result<Vec<IndexedId>, IndexError> {
        let stored = self.records.read().map_err(poisoned)?;
        Ok(stored
            .values()
            .map(|r| IndexedId {
                id: r.id.clone(),
                source_file: r
                    .metadata
                    .get("source_file")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            })
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, IndexError> {
        let mut stored = self.records.write().map_err(poisoned)?;
        Ok(ids.iter().filter(|id| stored.remove(*id).is_some()).count())
    }

    async fn clear(&self) -> Result<(), IndexError> {
        self.records.write().map_err(poisoned)?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::test_support::exercise;

    #[tokio::test]
    async fn memory_index_contract() {
        exercise(&MemoryIndex::new()).await;
    }
}
