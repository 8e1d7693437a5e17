//! Project status and health overview.
//!
//! Summarises what has been ingested and embedded: chunk totals on disk,
//! records in the vector index, embedding coverage, and one row per manifest
//! entry. Entries that produced zero chunks are listed separately since they
//! usually point at a scanned PDF or an over-eager cleaner. Used by
//! `docsift status`.

use anyhow::Result;
use serde::Serialize;

use crate::chunk_file::{list_chunk_files, read_chunk_file, stem_of};
use crate::index::VectorIndex;
use crate::manifest::Manifest;
use crate::project::ProjectLayout;

#[derive(Debug, Clone, Serialize)]
pub struct FileRow {
    pub file_name: String,
    pub n_chunks: usize,
    pub chunk_method: String,
    pub last_processed: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    pub root: String,
    pub chunk_files: usize,
    pub total_chunks: usize,
    /// `None` when the project has no vector index yet.
    pub indexed: Option<usize>,
    pub index_bytes: u64,
    pub files: Vec<FileRow>,
    pub zero_chunk_files: Vec<String>,
    /// Chunk files on disk with no manifest entry.
    pub orphan_chunk_files: Vec<String>,
}

impl ProjectStatus {
    /// Indexed records as a share of chunks on disk, in percent. Above 100
    /// means the index holds records for chunks that are gone.
    pub fn coverage_percent(&self) -> Option<usize> {
        let indexed = self.indexed?;
        if self.total_chunks == 0 {
            return Some(0);
        }
        Some(indexed * 100 / self.total_chunks)
    }
}

/// Gather the status of the project at `layout`. `index` is `None` when no
/// index has been created.
pub async fn collect(layout: &ProjectLayout, index: Option<&dyn VectorIndex>) -> Result<ProjectStatus> {
    let manifest = Manifest::load(&layout.manifest_path())?;
    let chunks_dir = layout.chunks_dir();

    let mut total_chunks = 0;
    let mut orphan_chunk_files = Vec::new();
    let known_stems: Vec<String> = manifest
        .iter()
        .map(|(name, _)| stem_of_name(name))
        .collect();
    let chunk_paths = list_chunk_files(&chunks_dir, None)?;
    for path in &chunk_paths {
        total_chunks += read_chunk_file(path)?.len();
        if let Some(stem) = stem_of(path) {
            if !known_stems.iter().any(|s| s == stem) {
                orphan_chunk_files.push(stem.to_string());
            }
        }
    }

    let indexed = match index {
        Some(index) => Some(index.count().await?),
        None => None,
    };
    let index_bytes = std::fs::metadata(layout.index_path())
        .map(|m| m.len())
        .unwrap_or(0);

    let files: Vec<FileRow> = manifest
        .iter()
        .map(|(name, entry)| FileRow {
            file_name: name.clone(),
            n_chunks: entry.n_chunks,
            chunk_method: entry.chunk_method.clone(),
            last_processed: entry.last_processed.clone(),
        })
        .collect();
    let zero_chunk_files = files
        .iter()
        .filter(|f| f.n_chunks == 0)
        .map(|f| f.file_name.clone())
        .collect();

    Ok(ProjectStatus {
        root: layout.root().display().to_string(),
        chunk_files: chunk_paths.len(),
        total_chunks,
        indexed,
        index_bytes,
        files,
        zero_chunk_files,
        orphan_chunk_files,
    })
}

fn stem_of_name(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string())
}

/// Human-readable report for the terminal.
pub fn render(status: &ProjectStatus) -> String {
    let mut out = String::new();
    out.push_str("docsift project status\n");
    out.push_str("======================\n\n");
    out.push_str(&format!("  Project:     {}\n", status.root));
    out.push_str(&format!("  Index size:  {}\n\n", format_bytes(status.index_bytes)));
    out.push_str(&format!("  Files:       {}\n", status.files.len()));
    out.push_str(&format!("  Chunks:      {}\n", status.total_chunks));
    match (status.indexed, status.coverage_percent()) {
        (Some(indexed), Some(pct)) => out.push_str(&format!(
            "  Embedded:    {} / {} ({}%)\n",
            indexed, status.total_chunks, pct
        )),
        _ => out.push_str("  Embedded:    no index\n"),
    }

    if !status.files.is_empty() {
        out.push_str("\n  By file:\n");
        out.push_str(&format!(
            "  {:<32} {:>8} {:>10}   {}\n",
            "FILE", "CHUNKS", "METHOD", "LAST PROCESSED"
        ));
        out.push_str(&format!("  {}\n", "-".repeat(76)));
        for f in &status.files {
            out.push_str(&format!(
                "  {:<32} {:>8} {:>10}   {}\n",
                f.file_name,
                f.n_chunks,
                f.chunk_method,
                format_processed(&f.last_processed)
            ));
        }
    }

    if !status.zero_chunk_files.is_empty() {
        out.push_str("\n  Files with no chunks:\n");
        for name in &status.zero_chunk_files {
            out.push_str(&format!("    {}\n", name));
        }
    }
    if !status.orphan_chunk_files.is_empty() {
        out.push_str("\n  Chunk files without a manifest entry:\n");
        for stem in &status.orphan_chunk_files {
            out.push_str(&format!("    {}\n", stem));
        }
    }
    out
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Relative time ("3 hours ago") for recent timestamps, the date otherwise.
fn format_processed(rfc3339: &str) -> String {
    let Ok(ts) = chrono::DateTime::parse_from_rfc3339(rfc3339) else {
        return rfc3339.to_string();
    };
    let delta = chrono::Utc::now().timestamp() - ts.timestamp();
    if delta < 0 || delta >= 86400 * 30 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_file::write_chunk_file;
    use crate::index::{test_support::record, MemoryIndex};
    use crate::models::{Chunk, ManifestEntry, Metadata};
    use tempfile::TempDir;

    fn entry(n_chunks: usize) -> ManifestEntry {
        ManifestEntry {
            hash: "h".into(),
            n_chunks,
            last_processed: "2024-03-01T10:00:00+00:00".into(),
            chunk_method: "sentence".into(),
        }
    }

    fn chunk(id: &str) -> Chunk {
        Chunk {
            chunk_id: id.into(),
            chunk_text: "text".into(),
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn status_counts_and_flags() {
        let tmp = TempDir::new().unwrap();
        let layout = ProjectLayout::new(tmp.path());
        layout.ensure().unwrap();

        let mut manifest = Manifest::default();
        manifest.insert("paper.pdf", entry(2));
        manifest.insert("scan.pdf", entry(0));
        manifest.save(&layout.manifest_path()).unwrap();
        write_chunk_file(&layout.chunks_dir(), "paper", &[chunk("paper_sent0"), chunk("paper_sent1")])
            .unwrap();
        write_chunk_file(&layout.chunks_dir(), "stray", &[chunk("stray_sent0")]).unwrap();

        let index = MemoryIndex::new();
        index.upsert(&[record("paper_sent0", vec![1.0, 0.0])]).await.unwrap();

        let status = collect(&layout, Some(&index)).await.unwrap();
        assert_eq!(status.total_chunks, 3);
        assert_eq!(status.chunk_files, 2);
        assert_eq!(status.indexed, Some(1));
        assert_eq!(status.coverage_percent(), Some(33));
        assert_eq!(status.zero_chunk_files, vec!["scan.pdf".to_string()]);
        assert_eq!(status.orphan_chunk_files, vec!["stray".to_string()]);

        let text = render(&status);
        assert!(text.contains("Embedded:    1 / 3 (33%)"));
        assert!(text.contains("2024-03-01 10:00"));
    }

    #[tokio::test]
    async fn empty_project_without_index() {
        let tmp = TempDir::new().unwrap();
        let layout = ProjectLayout::new(tmp.path());
        let status = collect(&layout, None).await.unwrap();
        assert_eq!(status.total_chunks, 0);
        assert_eq!(status.indexed, None);
        assert!(render(&status).contains("no index"));
    }

    #[test]
    fn bytes_are_humanised() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
    }
}
