//! Persisted chunk sets: `processed/chunks/{stem}_chunks.json`.
//!
//! Each file is a pretty-printed JSON array of [`Chunk`] objects in chunker
//! order. Writes go to a temporary sibling and are renamed into place, so a
//! reader never observes a half-written file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::models::Chunk;

pub const CHUNK_FILE_SUFFIX: &str = "_chunks.json";

#[derive(Debug, Error)]
pub enum ChunkFileError {
    #[error("chunk file I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed chunk file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ChunkFileError + '_ {
    move |source| ChunkFileError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn chunk_file_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{}{}", stem, CHUNK_FILE_SUFFIX))
}

/// Source stem encoded in a chunk file name, if `path` is one.
pub fn stem_of(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()?.strip_suffix(CHUNK_FILE_SUFFIX)
}

/// Write `bytes` to `path` through a temporary file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    std::fs::write(&tmp, bytes)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

pub fn write_chunk_file(dir: &Path, stem: &str, chunks: &[Chunk]) -> Result<PathBuf, ChunkFileError> {
    let path = chunk_file_path(dir, stem);
    let json = serde_json::to_vec_pretty(chunks).map_err(|source| ChunkFileError::Json {
        path: path.clone(),
        source,
    })?;
    write_atomic(&path, &json).map_err(io_err(&path))?;
    Ok(path)
}

pub fn read_chunk_file(path: &Path) -> Result<Vec<Chunk>, ChunkFileError> {
    let bytes = std::fs::read(path).map_err(io_err(path))?;
    serde_json::from_slice(&bytes).map_err(|source| ChunkFileError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Chunk files in `dir`, sorted by file name. `only_stems` restricts the list to
/// the given source stems. A missing directory yields an empty list.
pub fn list_chunk_files(
    dir: &Path,
    only_stems: Option<&HashSet<String>>,
) -> Result<Vec<PathBuf>, ChunkFileError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err(dir))? {
        let path = entry.map_err(io_err(dir))?.path();
        if !path.is_file() {
            continue;
        }
        let Some(stem) = stem_of(&path) else {
            continue;
        };
        if only_stems.is_some_and(|wanted| !wanted.contains(stem)) {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

/// Every chunk in `dir` in file-name order, then chunker order.
pub fn load_all_chunks(dir: &Path) -> Result<Vec<Chunk>, ChunkFileError> {
    let mut all = Vec::new();
    for path in list_chunk_files(dir, None)? {
        all.extend(read_chunk_file(&path)?);
    }
    Ok(all)
}

/// Resolve a chunk id back to its chunk.
///
/// The stem encoded in the id is tried first; other files are only read when
/// that misses.
pub fn find_chunk(dir: &Path, chunk_id: &str) -> Result<Option<Chunk>, ChunkFileError> {
    let files = list_chunk_files(dir, None)?;
    let hinted = chunk_id
        .rsplit_once('_')
        .map(|(stem, _)| chunk_file_path(dir, stem));

    let ordered = hinted
        .iter()
        .filter(|p| files.contains(p))
        .chain(files.iter().filter(|p| Some(*p) != hinted.as_ref()));
    for path in ordered {
        if let Some(chunk) = read_chunk_file(path)?
            .into_iter()
            .find(|c| c.chunk_id == chunk_id)
        {
            return Ok(Some(chunk));
        }
    }
    Ok(None)
}

/// Remove every chunk file in `dir`. Returns how many were deleted.
pub fn remove_all_chunk_files(dir: &Path) -> Result<usize, ChunkFileError> {
    let files = list_chunk_files(dir, None)?;
    for path in &files {
        std::fs::remove_file(path).map_err(io_err(path))?;
    }
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;
    use tempfile::TempDir;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            chunk_text: text.to_string(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn write_then_read_preserves_order() {
        let tmp = TempDir::new().unwrap();
        let chunks = vec![chunk("a_sent0", "First."), chunk("a_sent1", "Second.")];
        let path = write_chunk_file(tmp.path(), "a", &chunks).unwrap();

        assert!(path.ends_with("a_chunks.json"));
        assert_eq!(read_chunk_file(&path).unwrap(), chunks);
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn list_filters_by_stem_and_ignores_other_files() {
        let tmp = TempDir::new().unwrap();
        write_chunk_file(tmp.path(), "b", &[chunk("b_sent0", "x")]).unwrap();
        write_chunk_file(tmp.path(), "a", &[chunk("a_sent0", "y")]).unwrap();
        std::fs::write(tmp.path().join("notes.json"), "[]").unwrap();

        let all = list_chunk_files(tmp.path(), None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(stem_of(&all[0]), Some("a"));

        let only: HashSet<String> = ["b".to_string()].into_iter().collect();
        let some = list_chunk_files(tmp.path(), Some(&only)).unwrap();
        assert_eq!(some.len(), 1);
        assert_eq!(stem_of(&some[0]), Some("b"));
    }

    #[test]
    fn find_chunk_by_id() {
        let tmp = TempDir::new().unwrap();
        write_chunk_file(tmp.path(), "my_paper", &[chunk("my_paper_para0", "Body")]).unwrap();
        write_chunk_file(tmp.path(), "other", &[chunk("other_para0", "Else")]).unwrap();

        let found = find_chunk(tmp.path(), "my_paper_para0").unwrap().unwrap();
        assert_eq!(found.chunk_text, "Body");
        assert!(find_chunk(tmp.path(), "missing_para9").unwrap().is_none());
    }

    #[test]
    fn malformed_file_is_a_json_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad_chunks.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            read_chunk_file(&path),
            Err(ChunkFileError::Json { .. })
        ));
    }

    #[test]
    fn missing_dir_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        assert!(load_all_chunks(&tmp.path().join("absent")).unwrap().is_empty());
    }
}
