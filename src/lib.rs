//! # docsift
//!
//! Local document ingestion and retrieval for literature collections.
//!
//! docsift turns a folder of heterogeneous documents (PDF, Word, Excel,
//! HTML, plain text) into cleaned, addressable text chunks, keeps an
//! embedding index in step with those chunks, and answers nearest-neighbour
//! queries against it.
//!
//! ## Architecture
//!
//! ```text
//! raw/ ──▶ Loader ──▶ Cleaner ──▶ Chunker ──▶ processed/chunks/*.json
//!                                                    │   + manifest.json
//!                                                    ▼
//!                                   IndexSync ──▶ vectorstore/index.sqlite
//!                                                    │
//!                                                    ▼
//!                                               Retriever
//! ```
//!
//! Ingestion is incremental: the manifest records the SHA-256 of every source
//! file, and only files whose bytes changed are reprocessed. Index sync is a
//! separate, re-runnable step that reads chunk files and upserts by chunk id.
//!
//! ## Quick Start
//!
//! ```bash
//! docsift init                       # create raw/, processed/, vectorstore/
//! cp papers/*.pdf raw/
//! docsift ingest                     # load, clean and chunk
//! docsift embed                      # sync the vector index
//! docsift search "graph kernels" --top-k 5
//! docsift status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | Tracing subscriber setup |
//! | [`models`] | Core data types |
//! | [`project`] | On-disk project layout |
//! | [`loader`] | Extension → document loader registry |
//! | [`clean`] | Whitespace, preamble, bibliography and footnote cleanup |
//! | [`chunk`] | Page, sentence, paragraph and fixed-length chunking |
//! | [`chunk_file`] | Persisted per-file chunk sets |
//! | [`manifest`] | Per-file content hashes driving incremental ingestion |
//! | [`ingest`] | Ingestion driver |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index (SQLite and in-memory) |
//! | [`sync`] | Chunk files → vector index |
//! | [`retrieve`] | Query embedding and ranked retrieval |
//! | [`status`] | Project health overview |

pub mod chunk;
pub mod chunk_file;
pub mod clean;
pub mod config;
pub mod embedding;
pub mod index;
pub mod ingest;
pub mod loader;
pub mod logging;
pub mod manifest;
pub mod models;
pub mod project;
pub mod retrieve;
pub mod status;
pub mod sync;
