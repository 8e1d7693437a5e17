//! End-to-end library tests: ingest → sync → retrieve on a temporary project,
//! with the offline hash embedder standing in for a remote model.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use docsift::chunk::ChunkMethod;
use docsift::chunk_file::{chunk_file_path, read_chunk_file};
use docsift::config::Config;
use docsift::embedding::HashEmbedder;
use docsift::index::{MemoryIndex, SqliteIndex, VectorIndex};
use docsift::ingest::ingest;
use docsift::manifest::Manifest;
use docsift::project::ProjectLayout;
use docsift::retrieve::Retriever;
use docsift::sync::IndexSync;
use tempfile::TempDir;

const RIVERS: &str = "Rivers carry sediment toward the sea.\n\
Deltas grow where the current slows down.\n\
Floods spread fine silt over wide plains.";

const GLACIERS: &str = "Glaciers grind bedrock into fine powder.\n\
Meltwater streams sort the resulting gravel.\n\
Moraines mark where the ice once stood.";

fn setup() -> (TempDir, ProjectLayout) {
    let tmp = TempDir::new().unwrap();
    let layout = ProjectLayout::new(tmp.path());
    layout.ensure().unwrap();
    fs::write(layout.raw_dir().join("rivers.txt"), RIVERS).unwrap();
    fs::write(layout.raw_dir().join("glaciers.md"), GLACIERS).unwrap();
    (tmp, layout)
}

async fn run_ingest(layout: &ProjectLayout, config: &Config) -> docsift::ingest::IngestReport {
    ingest(&layout.raw_dir(), &layout.processed_dir(), config, false)
        .await
        .unwrap()
}

fn read(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap()
}

#[tokio::test]
async fn test_second_run_is_a_noop() {
    let (_tmp, layout) = setup();
    let config = Config::default();

    let first = run_ingest(&layout, &config).await;
    assert_eq!(first.stats.processed, 2);

    let chunk_path = chunk_file_path(&layout.chunks_dir(), "rivers");
    let chunks_before = read(&chunk_path);
    let manifest_before = read(&layout.manifest_path());

    let second = run_ingest(&layout, &config).await;
    assert_eq!(second.stats.total, 2);
    assert_eq!(second.stats.processed, 0);
    assert_eq!(second.stats.skipped, 2);
    assert_eq!(read(&chunk_path), chunks_before);
    assert_eq!(read(&layout.manifest_path()), manifest_before);
}

#[tokio::test]
async fn test_only_changed_file_is_reprocessed() {
    let (_tmp, layout) = setup();
    let config = Config::default();
    run_ingest(&layout, &config).await;

    let manifest = Manifest::load(&layout.manifest_path()).unwrap();
    let glaciers_entry = manifest.get("glaciers.md").unwrap().clone();
    let glaciers_chunks = read(&chunk_file_path(&layout.chunks_dir(), "glaciers"));

    fs::write(
        layout.raw_dir().join("rivers.txt"),
        format!("{}\nEstuaries mix salt and fresh water.", RIVERS),
    )
    .unwrap();
    let report = run_ingest(&layout, &config).await;
    assert_eq!(report.stats.processed, 1);
    assert_eq!(report.processed_stems(), vec!["rivers".to_string()]);

    let manifest = Manifest::load(&layout.manifest_path()).unwrap();
    assert_eq!(manifest.get("glaciers.md").unwrap(), &glaciers_entry);
    assert_eq!(manifest.get("rivers.txt").unwrap().n_chunks, 4);
    assert_eq!(
        read(&chunk_file_path(&layout.chunks_dir(), "glaciers")),
        glaciers_chunks
    );
}

#[tokio::test]
async fn test_chunk_files_follow_configured_method() {
    let (_tmp, layout) = setup();
    let mut config = Config::default();
    config.chunking.method = ChunkMethod::Sentence;
    run_ingest(&layout, &config).await;

    let chunks = read_chunk_file(&chunk_file_path(&layout.chunks_dir(), "rivers")).unwrap();
    let ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["rivers_sent0", "rivers_sent1", "rivers_sent2"]);
    assert_eq!(chunks[1].chunk_text, "Deltas grow where the current slows down.");
    assert_eq!(chunks[1].metadata["source_file"], "rivers.txt");

    let manifest = Manifest::load(&layout.manifest_path()).unwrap();
    assert_eq!(manifest.get("rivers.txt").unwrap().chunk_method, "sentence");
}

#[tokio::test]
async fn test_ingest_sync_search_with_sqlite_index() {
    let (_tmp, layout) = setup();
    run_ingest(&layout, &Config::default()).await;

    let embedder = Arc::new(HashEmbedder::new(256).unwrap());
    let index = Arc::new(SqliteIndex::open(&layout.index_path()).await.unwrap());
    let sync = IndexSync::new(embedder.clone(), index.clone(), 4);

    let report = sync.sync(&layout.chunks_dir(), None).await.unwrap();
    assert_eq!(report.stats.upserted, 6);
    assert!(report.rejected.is_empty());
    assert_eq!(index.count().await.unwrap(), 6);

    let again = sync.sync(&layout.chunks_dir(), None).await.unwrap();
    assert_eq!(again.stats.upserted, 0);
    assert_eq!(again.stats.unchanged, 6);
    assert_eq!(index.count().await.unwrap(), 6);

    let retriever = Retriever::new(embedder, index.clone());
    let outcome = retriever
        .search("glaciers grind bedrock into powder", 3, Some(0.2))
        .await
        .unwrap();
    let results = outcome.results;
    assert_eq!(results.len(), 3);
    assert_eq!(results.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
    assert_eq!(results[0].chunk_id, "glaciers_sent0");
    assert_eq!(results[0].source, "glaciers.md");
    index.close().await;
}

#[tokio::test]
async fn test_incremental_sync_by_stem() {
    let (_tmp, layout) = setup();
    let first = run_ingest(&layout, &Config::default()).await;

    let embedder = Arc::new(HashEmbedder::new(64).unwrap());
    let index = Arc::new(MemoryIndex::new());
    let sync = IndexSync::new(embedder, index.clone(), 8);

    let stems: HashSet<String> = first
        .processed_stems()
        .into_iter()
        .filter(|s| s == "rivers")
        .collect();
    let report = sync.sync(&layout.chunks_dir(), Some(&stems)).await.unwrap();
    assert_eq!(report.stats.upserted, 3);
    assert_eq!(index.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_search_on_empty_index() {
    let tmp = TempDir::new().unwrap();
    let index = Arc::new(SqliteIndex::open(&tmp.path().join("index.sqlite")).await.unwrap());
    let retriever = Retriever::new(Arc::new(HashEmbedder::new(16).unwrap()), index);
    let outcome = retriever.search("anything at all", 5, None).await.unwrap();
    assert!(outcome.results.is_empty());
}

#[tokio::test]
async fn test_shrunken_document_leaves_no_stale_records() {
    let tmp = TempDir::new().unwrap();
    let layout = ProjectLayout::new(tmp.path());
    layout.ensure().unwrap();
    let doc = layout.raw_dir().join("doc.txt");
    fs::write(&doc, "Alpha one. Beta two. Gamma three.").unwrap();
    let config = Config::default();
    run_ingest(&layout, &config).await;

    let embedder = Arc::new(HashEmbedder::new(64).unwrap());
    let index = Arc::new(SqliteIndex::open(&layout.index_path()).await.unwrap());
    let sync = IndexSync::new(embedder.clone(), index.clone(), 8);
    sync.sync(&layout.chunks_dir(), None).await.unwrap();
    assert_eq!(index.count().await.unwrap(), 3);

    fs::write(&doc, "Alpha one.").unwrap();
    run_ingest(&layout, &config).await;
    let report = sync.sync(&layout.chunks_dir(), None).await.unwrap();
    assert_eq!(report.stats.pruned, 2);

    let on_disk = read_chunk_file(&chunk_file_path(&layout.chunks_dir(), "doc"))
        .unwrap()
        .len();
    assert_eq!(on_disk, 1);
    assert_eq!(index.count().await.unwrap(), on_disk);

    let retriever = Retriever::new(embedder, index.clone());
    let outcome = retriever.search("Gamma three.", 3, None).await.unwrap();
    let ids: Vec<&str> = outcome.results.iter().map(|r| r.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["doc_sent0"]);
    index.close().await;
}
