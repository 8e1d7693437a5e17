//! Manifest store: `processed/manifest.json`.
//!
//! Maps a source file name to the hash of the bytes its current chunk file
//! was built from. A file whose hash matches its entry (and whose chunk file
//! still exists) is skipped by the next ingestion pass.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

use crate::chunk_file::write_atomic;
use crate::models::ManifestEntry;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    /// Load the manifest at `path`. A missing file is an empty manifest.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        let entries = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))?;
        Ok(Self { entries })
    }

    /// Write the whole manifest atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_vec_pretty(&self.entries)?;
        write_atomic(path, &json)
            .with_context(|| format!("Failed to write manifest: {}", path.display()))
    }

    pub fn get(&self, file_name: &str) -> Option<&ManifestEntry> {
        self.entries.get(file_name)
    }

    pub fn insert(&mut self, file_name: impl Into<String>, entry: ManifestEntry) {
        self.entries.insert(file_name.into(), entry);
    }

    pub fn remove(&mut self, file_name: &str) -> Option<ManifestEntry> {
        self.entries.remove(file_name)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Whether the stored hash for `file_name` equals `hash`.
    pub fn is_current(&self, file_name: &str, hash: &str) -> bool {
        self.entries.get(file_name).is_some_and(|e| e.hash == hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hex SHA-256 of the file at `path`.
pub fn hash_file(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content_hash(&bytes))
}
