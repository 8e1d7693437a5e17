//! Embedding index sync: brings the vector index in line with the chunk
//! files on disk.
//!
//! A sync reads chunk files in file-name order and:
//!
//! - rejects chunks whose id is empty or whitespace ([`RecordRejection`]);
//!   they never reach the index and the rest of the batch carries on,
//! - keeps the first occurrence of each chunk id and reports later ones as
//!   duplicates,
//! - skips chunks whose text hash and embedding model match what the index
//!   already holds,
//! - embeds the rest one batch at a time and upserts them,
//! - prunes indexed records whose chunk id no chunk file in scope still holds.
//!   With `only_stems`, the scope is the records whose `source_file` has one
//!   of those stems.
//!
//! Within one sync the first occurrence of an id wins. Across syncs the
//! index upsert replaces, so the latest sync wins.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::chunk_file::{list_chunk_files, read_chunk_file, ChunkFileError};
use crate::embedding::Embedder;
use crate::index::{IndexError, IndexedId, VectorIndex};
use crate::manifest::content_hash;
use crate::models::{Chunk, EmbeddingRecord, SyncStats};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    ChunkFile(#[from] ChunkFileError),
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("embedder returned {actual} vectors for {expected} texts")]
    VectorCount { expected: usize, actual: usize },
}

/// A chunk that was refused by the sync. Reported, never silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordRejection {
    /// `position` is the chunk's 0-based index inside `file`.
    EmptyChunkId { file: PathBuf, position: usize },
}

impl std::fmt::Display for RecordRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordRejection::EmptyChunkId { file, position } => write!(
                f,
                "empty chunk id at position {} in {}",
                position,
                file.display()
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub stats: SyncStats,
    pub duplicate_ids: Vec<String>,
    pub rejected: Vec<RecordRejection>,
}

struct Candidate {
    chunk: Chunk,
    hash: String,
}

pub struct IndexSync {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
}

impl IndexSync {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, batch_size: usize) -> Self {
        Self {
            embedder,
            index,
            batch_size: batch_size.max(1),
        }
    }

    /// Sync every chunk file in `chunks_dir`, or only those of `only_stems`.
    pub async fn sync(
        &self,
        chunks_dir: &Path,
        only_stems: Option<&HashSet<String>>,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates: Vec<Candidate> = Vec::new();

        for path in list_chunk_files(chunks_dir, only_stems)? {
            for (position, chunk) in read_chunk_file(&path)?.into_iter().enumerate() {
                if chunk.chunk_id.trim().is_empty() {
                    tracing::warn!(file = %path.display(), position, "Rejected chunk with empty id");
                    report.rejected.push(RecordRejection::EmptyChunkId {
                        file: path.clone(),
                        position,
                    });
                    continue;
                }
                if !seen.insert(chunk.chunk_id.clone()) {
                    tracing::warn!(chunk_id = %chunk.chunk_id, file = %path.display(), "Skipped duplicate chunk id");
                    report.duplicate_ids.push(chunk.chunk_id);
                    continue;
                }
                let hash = content_hash(chunk.chunk_text.as_bytes());
                candidates.push(Candidate { chunk, hash });
            }
        }
        report.stats.duplicates_skipped = report.duplicate_ids.len();

        let stale: Vec<String> = self
            .index
            .ids()
            .await?
            .into_iter()
            .filter(|entry| !seen.contains(&entry.id) && in_scope(entry, only_stems))
            .map(|entry| entry.id)
            .collect();
        if !stale.is_empty() {
            report.stats.pruned = self.index.delete(&stale).await?;
            tracing::info!(pruned = report.stats.pruned, "Pruned records with no chunk on disk");
        }

        let ids: Vec<String> = candidates.iter().map(|c| c.chunk.chunk_id.clone()).collect();
        let existing = self.index.fingerprints(&ids).await?;
        let model = self.embedder.model_name().to_string();
        let pending: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| {
                !existing
                    .get(&c.chunk.chunk_id)
                    .is_some_and(|fp| fp.content_hash == c.hash && fp.model == model)
            })
            .collect();
        report.stats.unchanged = ids.len() - pending.len();

        for batch in pending.chunks(self.batch_size) {
            report.stats.upserted += self.embed_batch(batch, &model).await?;
        }

        tracing::info!(
            upserted = report.stats.upserted,
            unchanged = report.stats.unchanged,
            duplicates = report.stats.duplicates_skipped,
            pruned = report.stats.pruned,
            rejected = report.rejected.len(),
            "Index sync complete"
        );
        Ok(report)
    }

    /// Clear the index, then sync every chunk file.
    pub async fn rebuild(&self, chunks_dir: &Path) -> Result<SyncReport, SyncError> {
        self.index.clear().await?;
        tracing::info!("Cleared vector index");
        self.sync(chunks_dir, None).await
    }

    async fn embed_batch(&self, batch: &[Candidate], model: &str) -> Result<usize, SyncError> {
        let texts: Vec<String> = batch.iter().map(|c| c.chunk.chunk_text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(SyncError::Embedding)?;
        if vectors.len() != batch.len() {
            return Err(SyncError::VectorCount {
                expected: batch.len(),
                actual: vectors.len(),
            });
        }

        let records: Vec<EmbeddingRecord> = batch
            .iter()
            .zip(vectors)
            .map(|(candidate, vector)| to_record(candidate, vector, model))
            .collect();
        let written = self.index.upsert(&records).await?;
        tracing::debug!(records = written, "Upserted embedding batch");
        Ok(written)
    }
}

/// Whether a stored record belongs to the chunk files being synced.
fn in_scope(entry: &IndexedId, only_stems: Option<&HashSet<String>>) -> bool {
    let Some(stems) = only_stems else {
        return true;
    };
    entry
        .source_file
        .as_deref()
        .and_then(|name| Path::new(name).file_stem())
        .is_some_and(|stem| stems.contains(stem.to_string_lossy().as_ref()))
}

fn to_record(candidate: &Candidate, vector: Vec<f32>, model: &str) -> EmbeddingRecord {
    let chunk = &candidate.chunk;
    let mut metadata = chunk.metadata.clone();
    metadata.insert("chunk_id".into(), chunk.chunk_id.clone().into());
    EmbeddingRecord {
        id: chunk.chunk_id.clone(),
        text: chunk.chunk_text.clone(),
        vector,
        metadata,
        content_hash: candidate.hash.clone(),
        model: model.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_file::write_chunk_file;
    use crate::embedding::HashEmbedder;
    use crate::index::MemoryIndex;
    use crate::models::Metadata;
    use tempfile::TempDir;

    fn chunk(id: &str, text: &str) -> Chunk {
        let stem = id.split('_').next().unwrap_or_default();
        let mut metadata = Metadata::new();
        metadata.insert("source_file".into(), format!("{}.pdf", stem).into());
        Chunk {
            chunk_id: id.to_string(),
            chunk_text: text.to_string(),
            metadata,
        }
    }

    fn setup() -> (Arc<MemoryIndex>, IndexSync) {
        let index = Arc::new(MemoryIndex::new());
        let embedder = Arc::new(HashEmbedder::new(32).unwrap());
        let sync = IndexSync::new(embedder, index.clone(), 2);
        (index, sync)
    }

    #[tokio::test]
    async fn duplicate_ids_are_skipped_once() {
        let tmp = TempDir::new().unwrap();
        write_chunk_file(
            tmp.path(),
            "paper",
            &[
                chunk("paper_sent0", "First sentence."),
                chunk("paper_sent1", "Second sentence."),
                chunk("paper_sent0", "A later duplicate."),
            ],
        )
        .unwrap();

        let (index, sync) = setup();
        let report = sync.sync(tmp.path(), None).await.unwrap();

        assert_eq!(report.stats.duplicates_skipped, 1);
        assert_eq!(report.duplicate_ids, vec!["paper_sent0".to_string()]);
        assert_eq!(report.stats.upserted, 2);
        assert_eq!(index.count().await.unwrap(), 2);

        let prints = index.fingerprints(&["paper_sent0".to_string()]).await.unwrap();
        assert_eq!(
            prints["paper_sent0"].content_hash,
            content_hash(b"First sentence.")
        );
    }

    #[tokio::test]
    async fn empty_id_rejected_others_succeed() {
        let tmp = TempDir::new().unwrap();
        write_chunk_file(
            tmp.path(),
            "paper",
            &[
                chunk("paper_sent0", "Kept."),
                chunk("", "No id."),
                chunk("   ", "Blank id."),
                chunk("paper_sent3", "Also kept."),
            ],
        )
        .unwrap();

        let (index, sync) = setup();
        let report = sync.sync(tmp.path(), None).await.unwrap();

        assert_eq!(report.rejected.len(), 2);
        assert!(matches!(
            &report.rejected[0],
            RecordRejection::EmptyChunkId { position: 1, .. }
        ));
        assert_eq!(report.stats.upserted, 2);
        assert_eq!(index.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn resync_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        write_chunk_file(
            tmp.path(),
            "paper",
            &[chunk("paper_para0", "Alpha."), chunk("paper_para1", "Beta.")],
        )
        .unwrap();

        let (index, sync) = setup();
        sync.sync(tmp.path(), None).await.unwrap();
        let second = sync.sync(tmp.path(), None).await.unwrap();

        assert_eq!(second.stats.upserted, 0);
        assert_eq!(second.stats.unchanged, 2);
        assert_eq!(index.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn changed_text_is_reembedded() {
        let tmp = TempDir::new().unwrap();
        write_chunk_file(tmp.path(), "paper", &[chunk("paper_para0", "Alpha.")]).unwrap();
        let (index, sync) = setup();
        sync.sync(tmp.path(), None).await.unwrap();

        write_chunk_file(tmp.path(), "paper", &[chunk("paper_para0", "Alpha, revised.")]).unwrap();
        let report = sync.sync(tmp.path(), None).await.unwrap();
        assert_eq!(report.stats.upserted, 1);
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn only_stems_limits_the_sync() {
        let tmp = TempDir::new().unwrap();
        write_chunk_file(tmp.path(), "a", &[chunk("a_sent0", "One.")]).unwrap();
        write_chunk_file(tmp.path(), "b", &[chunk("b_sent0", "Two.")]).unwrap();

        let (index, sync) = setup();
        let only: HashSet<String> = ["b".to_string()].into_iter().collect();
        let report = sync.sync(tmp.path(), Some(&only)).await.unwrap();
        assert_eq!(report.stats.upserted, 1);
        assert_eq!(index.count().await.unwrap(), 1);

        let rebuilt = sync.rebuild(tmp.path()).await.unwrap();
        assert_eq!(rebuilt.stats.upserted, 2);
        assert_eq!(index.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn vanished_chunks_are_pruned() {
        let tmp = TempDir::new().unwrap();
        write_chunk_file(
            tmp.path(),
            "paper",
            &[
                chunk("paper_sent0", "One."),
                chunk("paper_sent1", "Two."),
                chunk("paper_sent2", "Three."),
            ],
        )
        .unwrap();
        let (index, sync) = setup();
        sync.sync(tmp.path(), None).await.unwrap();

        write_chunk_file(tmp.path(), "paper", &[chunk("paper_sent0", "One.")]).unwrap();
        let report = sync.sync(tmp.path(), None).await.unwrap();
        assert_eq!(report.stats.pruned, 2);
        assert_eq!(report.stats.unchanged, 1);
        let ids: Vec<String> = index.ids().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["paper_sent0".to_string()]);
    }

    #[tokio::test]
    async fn only_stems_prunes_within_those_stems() {
        let tmp = TempDir::new().unwrap();
        write_chunk_file(
            tmp.path(),
            "a",
            &[chunk("a_para0", "A zero."), chunk("a_para1", "A one.")],
        )
        .unwrap();
        write_chunk_file(tmp.path(), "b", &[chunk("b_para0", "B zero.")]).unwrap();
        let (index, sync) = setup();
        sync.sync(tmp.path(), None).await.unwrap();

        // Re-chunked under another method, and b's chunk file removed.
        write_chunk_file(tmp.path(), "a", &[chunk("a_sent0", "A zero. A one.")]).unwrap();
        std::fs::remove_file(tmp.path().join("b_chunks.json")).unwrap();

        let only: HashSet<String> = ["a".to_string()].into_iter().collect();
        let report = sync.sync(tmp.path(), Some(&only)).await.unwrap();
        assert_eq!(report.stats.pruned, 2);
        let ids: Vec<String> = index.ids().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a_sent0".to_string(), "b_para0".to_string()]);

        let full = sync.sync(tmp.path(), None).await.unwrap();
        assert_eq!(full.stats.pruned, 1);
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicates_across_files_first_file_wins() {
        let tmp = TempDir::new().unwrap();
        write_chunk_file(tmp.path(), "a", &[chunk("shared_sent0", "From a.")]).unwrap();
        write_chunk_file(tmp.path(), "b", &[chunk("shared_sent0", "From b.")]).unwrap();

        let (index, sync) = setup();
        let report = sync.sync(tmp.path(), None).await.unwrap();
        assert_eq!(report.duplicate_ids, vec!["shared_sent0".to_string()]);
        let hits = index
            .nearest(&HashEmbedder::new(32).unwrap().encode("From a."), 1)
            .await
            .unwrap();
        assert_eq!(hits[0].text, "From a.");
    }
}
