//! TOML configuration for the indexer and the `cidx` binary.
//!
//! Every section is optional; omitted keys fall back to the defaults below.
//!
//! ```toml
//! [storage]
//! path = "./vector_db"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [embedding]
//! provider = "openai"          # openai | ollama | hash | disabled
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [batching]
//! token_ceiling = 250000
//! safety_fraction = 0.6
//! max_attempts = 5
//!
//! [loading]
//! workers = 4
//!
//! [retrieval]
//! default_results = 5
//! max_results = 20
//!
//! [scan]
//! exclude_globs = ["**/node_modules/**"]
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub loading: LoadingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding the vector index and `metadata.json`.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./vector_db")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: Option<usize>,
    /// Base URL override for the provider endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> Option<String> {
    Some("text-embedding-3-small".to_string())
}
fn default_dims() -> Option<usize> {
    Some(1536)
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchingConfig {
    /// Per-request token ceiling enforced by the embedding provider.
    #[serde(default = "default_token_ceiling")]
    pub token_ceiling: usize,
    /// Fraction of the ceiling targeted when sizing batches.
    #[serde(default = "default_safety_fraction")]
    pub safety_fraction: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff unit; attempt `a` waits `min(base * 2^a, cap)`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
    /// Emit an info-level summary every N committed batches.
    #[serde(default = "default_summary_every")]
    pub summary_every: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            token_ceiling: default_token_ceiling(),
            safety_fraction: default_safety_fraction(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_secs: default_backoff_cap_secs(),
            summary_every: default_summary_every(),
        }
    }
}

fn default_token_ceiling() -> usize {
    250_000
}
fn default_safety_fraction() -> f64 {
    0.6
}
fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_cap_secs() -> u64 {
    10
}
fn default_summary_every() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoadingConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_results")]
    pub default_results: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_results: default_results(),
            max_results: default_max_results(),
        }
    }
}

fn default_results() -> usize {
    5
}
fn default_max_results() -> usize {
    20
}

impl RetrievalConfig {
    /// Clamp a caller-supplied result count into `[1, max_results]`.
    pub fn clamp_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_results)
            .clamp(1, self.max_results.max(1))
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ScanConfig {
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde defaults cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be < chunking.chunk_size");
    }

    if config.batching.token_ceiling == 0 {
        anyhow::bail!("batching.token_ceiling must be > 0");
    }
    if !(config.batching.safety_fraction > 0.0 && config.batching.safety_fraction <= 1.0) {
        anyhow::bail!("batching.safety_fraction must be in (0.0, 1.0]");
    }
    if config.batching.max_attempts == 0 {
        anyhow::bail!("batching.max_attempts must be >= 1");
    }

    if config.loading.workers == 0 {
        anyhow::bail!("loading.workers must be >= 1");
    }

    if config.retrieval.default_results < 1 {
        anyhow::bail!("retrieval.default_results must be >= 1");
    }
    if config.retrieval.max_results < config.retrieval.default_results {
        anyhow::bail!("retrieval.max_results must be >= retrieval.default_results");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.provider != "hash" && config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "hash" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or hash.",
            other
        ),
    }

    Ok(())
}
