//! Core data models shared by the ingestion, sync and retrieval stages.
//!
//! [`Chunk`] and [`ManifestEntry`] are persisted as JSON and their field
//! names are part of the on-disk format; the rest are in-memory only.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Free-form metadata attached to loaded units, chunks and index records.
pub type Metadata = Map<String, Value>;

/// A source file as seen by one ingestion pass.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// File name including extension; the manifest key.
    pub file_name: String,
    /// File name without extension; the chunk file and chunk id prefix.
    pub stem: String,
    /// Lower-cased extension including the leading dot (`".pdf"`), empty when absent.
    pub extension: String,
    /// Hex SHA-256 of the file's bytes.
    pub hash: String,
    pub size: u64,
}

/// One block of text produced by a loader: a page, a sheet, or a whole file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextUnit {
    pub text: String,
    pub metadata: Metadata,
}

impl TextUnit {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// An addressable unit of document text, one element of a chunk file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(default)]
    pub chunk_id: String,
    #[serde(default)]
    pub chunk_text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Per-source-file processing state, keyed by file name in `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub hash: String,
    pub n_chunks: usize,
    pub last_processed: String,
    pub chunk_method: String,
}

/// A vector plus payload stored in the index, keyed by chunk id.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
    /// SHA-256 of `text`; lets a re-sync skip records whose content is unchanged.
    pub content_hash: String,
    pub model: String,
}

/// A ranked retrieval hit. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub rank: usize,
    pub chunk_id: String,
    pub source: String,
    pub distance: f32,
}

/// Outcome counters for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Outcome counters for one index sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub upserted: usize,
    pub unchanged: usize,
    pub duplicates_skipped: usize,
    /// Indexed records whose chunk id no chunk file holds any more.
    pub pruned: usize,
}
