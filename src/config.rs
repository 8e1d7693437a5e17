//! TOML configuration for a docsift project.
//!
//! A single [`Config`] is parsed once at startup and passed explicitly to the
//! ingestion driver, the embedder factory, the index sync and the retrieval
//! engine. Every section has defaults, so an absent `docsift.toml` is valid.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::chunk::ChunkMethod;

/// File name looked up in the project root when `--config` is not given.
pub const CONFIG_FILE_NAME: &str = "docsift.toml";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub cleaning: CleaningConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub method: ChunkMethod,
    /// Window length in characters for the `fixed` method.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared by consecutive `fixed` windows.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            method: ChunkMethod::default(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    400
}
fn default_chunk_overlap() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CleaningConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Consecutive reference-like lines needed before the bibliography cut arms.
    #[serde(default = "default_min_ref_lines")]
    pub min_ref_lines: usize,
    /// Consecutive ordinary lines that end the bibliography region once armed.
    #[serde(default = "default_max_nonmatch_lines")]
    pub max_nonmatch_lines: usize,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_ref_lines: default_min_ref_lines(),
            max_nonmatch_lines: default_max_nonmatch_lines(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_min_ref_lines() -> usize {
    2
}
fn default_max_nonmatch_lines() -> usize {
    7
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Maximum number of source files loaded and chunked concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Glob patterns matched against file names in `raw/`; matches are ignored entirely.
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            exclude_globs: default_exclude_globs(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_exclude_globs() -> Vec<String> {
    vec![".*".to_string()]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// API base for OpenAI-compatible endpoints, or the Ollama server URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Name of the environment variable that holds the API credential.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Advisory distance cutoff. Reported alongside results, never applied by `search`.
    #[serde(default)]
    pub relevance_threshold: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            relevance_threshold: None,
        }
    }
}

fn default_top_k() -> usize {
    5
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    validate(&config)?;
    Ok(config)
}

/// Load `path` when it exists, otherwise fall back to [`Config::default`].
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "No config file; using defaults");
        Ok(Config::default())
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.cleaning.min_ref_lines == 0 {
        bail!("cleaning.min_ref_lines must be >= 1");
    }
    if config.cleaning.max_nonmatch_lines == 0 {
        bail!("cleaning.max_nonmatch_lines must be >= 1");
    }

    if config.ingest.workers == 0 {
        bail!("ingest.workers must be >= 1");
    }

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "hash" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, hash, or local.",
            other
        ),
    }

    if embedding.is_enabled() {
        if embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if embedding.provider != "local" && matches!(embedding.dims, None | Some(0)) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                embedding.provider
            );
        }
        if matches!(embedding.provider.as_str(), "openai" | "ollama") && embedding.model.is_none()
        {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                embedding.provider
            );
        }
    }

    Ok(())
}

/// Render the default configuration as commented-free TOML for `docsift init`.
pub fn default_config_toml() -> Result<String> {
    toml::to_string_pretty(&Config::default()).context("Failed to render default config")
}
