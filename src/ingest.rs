//! Ingestion driver.
//!
//! Scans a source directory, decides per file whether work is needed, and
//! runs Loader → Cleaner → Chunker for the files that need it. Each file ends
//! in exactly one state: `skipped`, `failed` or `processed`.
//!
//! A file is skipped when its extension has no loader, or when its content
//! hash equals the manifest entry and its chunk file is still on disk. A
//! loader or write error marks only that file failed. A file being
//! reprocessed loses its manifest entry before its chunk file is rewritten;
//! on success the new entry is saved after the chunk file, both atomically.
//! An interrupted or failed run therefore leaves no entry for that file and
//! the next run redoes it. Chunks are built from the same bytes that were
//! hashed.

use anyhow::{Context, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use walkdir::WalkDir;

use crate::chunk::chunk_document;
use crate::chunk_file::{chunk_file_path, remove_all_chunk_files, write_chunk_file};
use crate::clean::clean_units;
use crate::config::Config;
use crate::loader::{extension_of, LoadError, LoaderRegistry};
use crate::manifest::{content_hash, Manifest};
use crate::models::{IngestStats, ManifestEntry, SourceFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Skipped,
    Failed,
    Processed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub file_name: String,
    pub state: FileState,
    pub n_chunks: usize,
    /// Why the file was skipped or failed.
    pub reason: Option<String>,
}

impl FileOutcome {
    fn skipped(file_name: &str, reason: impl Into<String>) -> Self {
        Self {
            file_name: file_name.to_string(),
            state: FileState::Skipped,
            n_chunks: 0,
            reason: Some(reason.into()),
        }
    }

    fn failed(file_name: &str, reason: impl Into<String>) -> Self {
        Self {
            file_name: file_name.to_string(),
            state: FileState::Failed,
            n_chunks: 0,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub stats: IngestStats,
    /// One outcome per scanned file, sorted by file name.
    pub files: Vec<FileOutcome>,
}

impl IngestReport {
    fn record(&mut self, outcome: FileOutcome) {
        match outcome.state {
            FileState::Skipped => self.stats.skipped += 1,
            FileState::Failed => self.stats.failed += 1,
            FileState::Processed => self.stats.processed += 1,
        }
        self.files.push(outcome);
    }

    /// Stems of the files processed in this run.
    pub fn processed_stems(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| f.state == FileState::Processed)
            .filter_map(|f| {
                Path::new(&f.file_name)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .collect()
    }
}

/// Ingest every file directly inside `source_dir` into `output_dir`
/// (`output_dir/chunks/` and `output_dir/manifest.json`).
///
/// `force` discards the manifest and every chunk file before scanning.
pub async fn ingest(
    source_dir: &Path,
    output_dir: &Path,
    config: &Config,
    force: bool,
) -> Result<IngestReport> {
    ingest_with(source_dir, output_dir, config, force, LoaderRegistry::with_defaults()).await
}

/// [`ingest`] with a caller-supplied loader registry.
pub async fn ingest_with(
    source_dir: &Path,
    output_dir: &Path,
    config: &Config,
    force: bool,
    registry: LoaderRegistry,
) -> Result<IngestReport> {
    let chunks_dir = output_dir.join("chunks");
    let manifest_path = output_dir.join("manifest.json");
    std::fs::create_dir_all(&chunks_dir)
        .with_context(|| format!("Failed to create {}", chunks_dir.display()))?;

    // Scan before touching any state so a bad source dir leaves it intact.
    let paths = scan_source_dir(source_dir, &config.ingest.exclude_globs)?;
    tracing::info!(dir = %source_dir.display(), files = paths.len(), "Scanning sources");

    let manifest = if force {
        let removed = remove_all_chunk_files(&chunks_dir)?;
        let empty = Manifest::default();
        empty.save(&manifest_path)?;
        tracing::info!(removed_chunk_files = removed, "Forced rebuild: manifest and chunk files discarded");
        empty
    } else {
        Manifest::load(&manifest_path)?
    };

    let mut report = IngestReport::default();
    report.stats.total = paths.len();

    let registry = Arc::new(registry);
    let config = Arc::new(config.clone());
    let manifest = Arc::new(Mutex::new(manifest));
    let semaphore = Arc::new(Semaphore::new(config.ingest.workers));
    let mut stems: HashMap<String, String> = HashMap::new();
    let mut jobs = JoinSet::new();

    for path in paths {
        let file_name = file_name_of(&path);
        let extension = extension_of(&path);
        if !registry.is_supported(&extension) {
            tracing::debug!(file = %file_name, state = "skipped", "Unsupported extension");
            report.record(FileOutcome::skipped(&file_name, "unsupported extension"));
            continue;
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(existing) = stems.get(&stem) {
            let err = LoadError::StemCollision {
                stem: stem.clone(),
                existing: existing.clone(),
            };
            tracing::warn!(file = %file_name, state = "failed", error = %err, "Skipping file");
            report.record(FileOutcome::failed(&file_name, err.to_string()));
            continue;
        }
        stems.insert(stem.clone(), file_name.clone());

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(file = %file_name, state = "failed", error = %e, "Failed to read file");
                report.record(FileOutcome::failed(&file_name, e.to_string()));
                continue;
            }
        };
        let source = SourceFile {
            hash: content_hash(&bytes),
            size: bytes.len() as u64,
            path,
            file_name,
            stem,
            extension,
        };

        if !force {
            let current = manifest.lock().await.is_current(&source.file_name, &source.hash);
            if current && chunk_file_path(&chunks_dir, &source.stem).exists() {
                tracing::debug!(file = %source.file_name, state = "skipped", "Unchanged since last run");
                report.record(FileOutcome::skipped(&source.file_name, "unchanged"));
                continue;
            } else if current {
                tracing::info!(file = %source.file_name, "Chunk file missing; reprocessing");
            }
        }

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Worker pool closed")?;
        let registry = registry.clone();
        let config = config.clone();
        let manifest = manifest.clone();
        let chunks_dir = chunks_dir.clone();
        let manifest_path = manifest_path.clone();

        jobs.spawn(async move {
            let _permit = permit;
            let file_name = source.file_name.clone();

            // Drop the old entry first: a run cut short after the chunk file is
            // rewritten must not leave an entry that a reverted source matches.
            {
                let mut guard = manifest.lock().await;
                if let Some(previous) = guard.remove(&file_name) {
                    if let Err(e) = guard.save(&manifest_path) {
                        guard.insert(file_name.clone(), previous);
                        tracing::error!(file = %file_name, state = "failed", error = %format!("{:#}", e), "Failed to update manifest");
                        return FileOutcome::failed(&file_name, format!("{:#}", e));
                    }
                }
            }
            let work = {
                let source = source.clone();
                let config = config.clone();
                let chunks_dir = chunks_dir.clone();
                tokio::task::spawn_blocking(move || {
                    process_file(&source, &bytes, &registry, &config, &chunks_dir)
                })
            };
            let n_chunks = match work.await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    tracing::warn!(file = %file_name, state = "failed", error = %format!("{:#}", e), "Failed to ingest file");
                    return FileOutcome::failed(&file_name, format!("{:#}", e));
                }
                Err(e) => {
                    tracing::error!(file = %file_name, state = "failed", error = %e, "Worker panicked");
                    return FileOutcome::failed(&file_name, e.to_string());
                }
            };

            let entry = ManifestEntry {
                hash: source.hash.clone(),
                n_chunks,
                last_processed: Utc::now().to_rfc3339(),
                chunk_method: config.chunking.method.as_str().to_string(),
            };
            let mut guard = manifest.lock().await;
            guard.insert(file_name.clone(), entry);
            if let Err(e) = guard.save(&manifest_path) {
                guard.remove(&file_name);
                tracing::error!(file = %file_name, state = "failed", error = %format!("{:#}", e), "Failed to update manifest");
                return FileOutcome::failed(&file_name, format!("{:#}", e));
            }
            drop(guard);

            tracing::info!(file = %file_name, state = "processed", chunks = n_chunks, "Ingested");
            FileOutcome {
                file_name,
                state: FileState::Processed,
                n_chunks,
                reason: None,
            }
        });
    }

    while let Some(joined) = jobs.join_next().await {
        match joined {
            Ok(outcome) => report.record(outcome),
            Err(e) => {
                tracing::error!(error = %e, "Ingestion task aborted");
                report.record(FileOutcome::failed("<unknown>", e.to_string()));
            }
        }
    }

    report.files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    tracing::info!(
        total = report.stats.total,
        processed = report.stats.processed,
        skipped = report.stats.skipped,
        failed = report.stats.failed,
        "Ingestion finished"
    );
    Ok(report)
}

/// Load, clean, chunk and persist one source file from the bytes `source.hash`
/// was computed over. Returns the chunk count.
fn process_file(
    source: &SourceFile,
    bytes: &[u8],
    registry: &LoaderRegistry,
    config: &Config,
    chunks_dir: &Path,
) -> Result<usize> {
    let units = registry.load_bytes(&source.path, bytes)?;
    let units = clean_units(units, &config.cleaning);
    let chunks = chunk_document(&source.stem, &source.file_name, &units, &config.chunking);
    if chunks.is_empty() {
        tracing::warn!(file = %source.file_name, "No text left after cleaning");
    }
    write_chunk_file(chunks_dir, &source.stem, &chunks)?;
    Ok(chunks.len())
}

/// Regular files directly inside `dir` whose names match none of `exclude_globs`,
/// sorted by file name.
pub fn scan_source_dir(dir: &Path, exclude_globs: &[String]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("Source directory does not exist: {}", dir.display());
    }
    let exclude = build_globset(exclude_globs)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if exclude.is_match(name.as_ref()) {
            continue;
        }
        paths.push(entry.into_path());
    }
    paths.sort_by_key(|p| file_name_of(p));
    Ok(paths)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
