//! # docsift CLI
//!
//! ## Usage
//!
//! ```bash
//! docsift [--project DIR] [--config FILE] [-v...] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsift init` | Create the project layout and a default `docsift.toml` |
//! | `docsift ingest` | Load, clean and chunk new or changed files in `raw/` |
//! | `docsift embed` | Bring the vector index in line with the chunk files |
//! | `docsift search "<query>"` | Nearest-neighbour search over the index |
//! | `docsift status` | Chunk, index and manifest overview |
//! | `docsift clean <file>` | Print the cleaned text of a single document |
//!
//! Logs go to stderr; results go to stdout.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use docsift::chunk::ChunkMethod;
use docsift::chunk_file::find_chunk;
use docsift::clean::clean_units;
use docsift::config::{self, Config};
use docsift::embedding::create_embedder;
use docsift::index::{SqliteIndex, VectorIndex};
use docsift::ingest::{ingest, FileState};
use docsift::loader::LoaderRegistry;
use docsift::logging::init_tracing;
use docsift::project::ProjectLayout;
use docsift::retrieve::{filter_by_threshold, Retriever};
use docsift::status;
use docsift::sync::IndexSync;

/// docsift: incremental document ingestion, cleaning, chunking and
/// embedding retrieval for literature collections.
#[derive(Parser)]
#[command(
    name = "docsift",
    version,
    about = "Incremental document ingestion and nearest-neighbour retrieval",
    long_about = "docsift loads PDF, Word, Excel, HTML and text files from a project's raw/ \
    directory, strips boilerplate such as author preambles and bibliographies, splits the text \
    into addressable chunks, and keeps an embedding index in step with those chunks."
)]
struct Cli {
    /// Project root directory.
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// Path to the configuration file. Defaults to `<project>/docsift.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create raw/, processed/chunks/, vectorstore/ and a default config.
    ///
    /// Idempotent: existing directories and an existing config are kept.
    Init,

    /// Ingest new or changed files from raw/.
    ///
    /// Files whose content hash matches the manifest are skipped. A file that
    /// fails to load is reported and does not stop the batch.
    Ingest {
        /// Discard the manifest and all chunk files, then rebuild from scratch.
        #[arg(long)]
        force: bool,

        /// Chunking strategy: page, sentence, paragraph or fixed.
        #[arg(long)]
        method: Option<ChunkMethod>,

        /// Window size in characters for the fixed strategy.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Overlap in characters between fixed windows.
        #[arg(long)]
        chunk_overlap: Option<usize>,
    },

    /// Sync the vector index with the chunk files.
    Embed {
        /// Only sync chunk files of these source stems.
        #[arg(long, num_args = 1..)]
        only: Vec<String>,

        /// Clear the index and re-embed every chunk.
        #[arg(long, conflicts_with = "only")]
        rebuild: bool,
    },

    /// Search the vector index.
    Search {
        query: String,

        /// Number of results. Defaults to `retrieval.top_k`.
        #[arg(long)]
        top_k: Option<usize>,

        /// Relevance threshold (cosine distance). Advisory unless
        /// `--apply-threshold` is given.
        #[arg(long)]
        threshold: Option<f32>,

        /// Drop results whose distance exceeds the threshold.
        #[arg(long)]
        apply_threshold: bool,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,

        /// Include each chunk's text.
        #[arg(long)]
        show_text: bool,
    },

    /// Show chunk, index and manifest statistics.
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Load and clean a single document and print its text.
    Clean {
        file: PathBuf,

        /// Write the text to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let layout = ProjectLayout::new(&cli.project);
    let config_path = cli.config.clone().unwrap_or_else(|| layout.config_path());

    let load = || config::load_or_default(&config_path);

    match cli.command {
        Commands::Init => {
            run_init(&layout, &config_path)?;
        }
        Commands::Ingest {
            force,
            method,
            chunk_size,
            chunk_overlap,
        } => {
            let mut cfg = load()?;
            if let Some(method) = method {
                cfg.chunking.method = method;
            }
            if let Some(size) = chunk_size {
                cfg.chunking.chunk_size = size;
            }
            if let Some(overlap) = chunk_overlap {
                cfg.chunking.chunk_overlap = overlap;
            }
            config::validate(&cfg)?;
            run_ingest(&layout, &cfg, force).await?;
        }
        Commands::Embed { only, rebuild } => {
            let cfg = load()?;
            run_embed(&layout, &cfg, only, rebuild).await?;
        }
        Commands::Search {
            query,
            top_k,
            threshold,
            apply_threshold,
            json,
            show_text,
        } => {
            let cfg = load()?;
            let opts = SearchOpts {
                top_k: top_k.unwrap_or(cfg.retrieval.top_k),
                threshold: threshold.or(cfg.retrieval.relevance_threshold),
                apply_threshold,
                json,
                show_text,
            };
            run_search(&layout, &cfg, &query, opts).await?;
        }
        Commands::Status { json } => {
            run_status(&layout, json).await?;
        }
        Commands::Clean { file, out } => {
            let cfg = load()?;
            run_clean(&cfg, &file, out.as_deref())?;
        }
    }

    Ok(())
}

fn run_init(layout: &ProjectLayout, config_path: &Path) -> Result<()> {
    layout.ensure()?;
    if config_path.exists() {
        println!("Config already present: {}", config_path.display());
    } else {
        std::fs::write(config_path, config::default_config_toml()?)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("Wrote default config: {}", config_path.display());
    }
    println!("Project initialized at {}", layout.root().display());
    Ok(())
}

async fn run_ingest(layout: &ProjectLayout, cfg: &Config, force: bool) -> Result<()> {
    let raw_dir = layout.raw_dir();
    if !raw_dir.is_dir() {
        bail!(
            "Source directory {} does not exist. Run `docsift init` first.",
            raw_dir.display()
        );
    }
    let report = ingest(&raw_dir, &layout.processed_dir(), cfg, force).await?;

    println!("ingest ({})", cfg.chunking.method);
    println!("  total:     {}", report.stats.total);
    println!("  processed: {}", report.stats.processed);
    println!("  skipped:   {}", report.stats.skipped);
    println!("  failed:    {}", report.stats.failed);
    for file in report.files.iter().filter(|f| f.state == FileState::Failed) {
        println!(
            "  ✗ {}: {}",
            file.file_name,
            file.reason.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn open_index(layout: &ProjectLayout) -> Result<SqliteIndex> {
    SqliteIndex::open(&layout.index_path())
        .await
        .with_context(|| format!("Failed to open index {}", layout.index_path().display()))
}

async fn run_embed(layout: &ProjectLayout, cfg: &Config, only: Vec<String>, rebuild: bool) -> Result<()> {
    if !cfg.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    let embedder = create_embedder(&cfg.embedding)?;
    let index = Arc::new(open_index(layout).await?);
    let sync = IndexSync::new(embedder, index.clone(), cfg.embedding.batch_size);

    let chunks_dir = layout.chunks_dir();
    let report = if rebuild {
        sync.rebuild(&chunks_dir).await?
    } else if only.is_empty() {
        sync.sync(&chunks_dir, None).await?
    } else {
        let stems: HashSet<String> = only.into_iter().collect();
        sync.sync(&chunks_dir, Some(&stems)).await?
    };
    let total = index.count().await?;
    index.close().await;

    println!("embed{}", if rebuild { " (rebuild)" } else { "" });
    println!("  upserted:   {}", report.stats.upserted);
    println!("  unchanged:  {}", report.stats.unchanged);
    println!("  duplicates: {}", report.stats.duplicates_skipped);
    println!("  pruned:     {}", report.stats.pruned);
    println!("  in index:   {}", total);
    for id in &report.duplicate_ids {
        println!("  ! duplicate chunk id skipped: {}", id);
    }
    for rejection in &report.rejected {
        println!("  ✗ {}", rejection);
    }
    if !report.rejected.is_empty() {
        bail!("{} chunk(s) rejected: empty chunk id", report.rejected.len());
    }
    Ok(())
}

struct SearchOpts {
    top_k: usize,
    threshold: Option<f32>,
    apply_threshold: bool,
    json: bool,
    show_text: bool,
}

async fn run_search(layout: &ProjectLayout, cfg: &Config, query: &str, opts: SearchOpts) -> Result<()> {
    if !cfg.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }
    if opts.apply_threshold && opts.threshold.is_none() {
        bail!("--apply-threshold needs --threshold or retrieval.relevance_threshold");
    }

    let embedder = create_embedder(&cfg.embedding)?;
    let index = Arc::new(open_index(layout).await?);
    let retriever = Retriever::new(embedder, index.clone());
    let outcome = retriever.search(query, opts.top_k, opts.threshold).await?;
    index.close().await;

    let results = match opts.threshold {
        Some(t) if opts.apply_threshold => filter_by_threshold(outcome.results, t),
        _ => outcome.results,
    };

    let chunks_dir = layout.chunks_dir();
    let mut texts = Vec::with_capacity(results.len());
    if opts.show_text {
        for result in &results {
            let text = find_chunk(&chunks_dir, &result.chunk_id)?.map(|c| c.chunk_text);
            texts.push(text);
        }
    }

    if opts.json {
        let mut rows = Vec::with_capacity(results.len());
        for (idx, result) in results.iter().enumerate() {
            let mut row = serde_json::to_value(result)?;
            if let (Some(obj), Some(text)) = (row.as_object_mut(), texts.get(idx)) {
                obj.insert("text".into(), text.clone().into());
            }
            rows.push(row);
        }
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (idx, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {}  ({})",
            result.rank, result.distance, result.chunk_id, result.source
        );
        if let Some(text) = texts.get(idx) {
            match text {
                Some(text) => println!("    {}", text.replace('\n', "\n    ")),
                None => println!("    (chunk text not found on disk)"),
            }
        }
    }
    Ok(())
}

async fn run_status(layout: &ProjectLayout, json: bool) -> Result<()> {
    let index = if layout.index_path().exists() {
        Some(open_index(layout).await?)
    } else {
        None
    };
    let report = status::collect(layout, index.as_ref().map(|i| i as &dyn VectorIndex)).await?;
    if let Some(index) = &index {
        index.close().await;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", status::render(&report));
    }
    Ok(())
}

fn run_clean(cfg: &Config, file: &Path, out: Option<&Path>) -> Result<()> {
    let registry = LoaderRegistry::with_defaults();
    let units = registry
        .load(file)
        .with_context(|| format!("Failed to load {}", file.display()))?;
    let text = clean_units(units, &cfg.cleaning)
        .into_iter()
        .map(|u| u.text)
        .collect::<Vec<_>>()
        .join("\n\n");

    match out {
        Some(path) => {
            std::fs::write(path, &text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), chars = text.chars().count(), "Wrote cleaned text");
        }
        None => println!("{}", text),
    }
    Ok(())
}
