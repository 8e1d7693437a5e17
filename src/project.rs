//! On-disk layout of a docsift project.
//!
//! ```text
//! <root>/
//!   docsift.toml
//!   raw/                         unmodified source files
//!   processed/chunks/            {stem}_chunks.json per source file
//!   processed/manifest.json      file name -> ManifestEntry
//!   vectorstore/index.sqlite     embedding index
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::CONFIG_FILE_NAME;

#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join("processed")
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.processed_dir().join("chunks")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.processed_dir().join("manifest.json")
    }

    pub fn vectorstore_dir(&self) -> PathBuf {
        self.root.join("vectorstore")
    }

    pub fn index_path(&self) -> PathBuf {
        self.vectorstore_dir().join("index.sqlite")
    }

    /// Create every directory of the layout. Idempotent.
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.raw_dir(), self.chunks_dir(), self.vectorstore_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
