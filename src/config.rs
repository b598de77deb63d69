//! TOML configuration.
//!
//! Loaded once at startup by [`load_config`], which fills defaults,
//! expands a leading `~/` in paths, and rejects invalid settings. Nothing
//! here is silently corrected: a bad weight pair or chunk overlap fails
//! the process before any index is touched.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use secure_rag_core::chunk::ChunkParams;
use secure_rag_core::fusion::FusionWeights;
use secure_rag_core::lexical::Bm25Params;
use secure_rag_core::vector::Metric;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// One sub-directory per collection lives here.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_collection")]
    pub default_collection: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            default_collection: default_collection(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("~/secure_rag/vector_dbs")
}
fn default_collection() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_path")]
    pub path: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            path: default_documents_path(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_documents_path() -> PathBuf {
    PathBuf::from("~/secure_rag/documents")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
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

impl ChunkingConfig {
    pub fn params(&self) -> secure_rag_core::error::Result<ChunkParams> {
        ChunkParams::new(self.chunk_size, self.chunk_overlap)
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    128
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f64,
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            lexical_weight: default_lexical_weight(),
            overfetch_factor: default_overfetch_factor(),
            default_k: default_k(),
            max_content_chars: default_max_content_chars(),
            metric: Metric::default(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
        }
    }
}

impl RetrievalConfig {
    pub fn weights(&self) -> secure_rag_core::error::Result<FusionWeights> {
        FusionWeights::new(self.vector_weight, self.lexical_weight)
    }

    pub fn bm25(&self) -> secure_rag_core::error::Result<Bm25Params> {
        Bm25Params::new(self.bm25_k1, self.bm25_b)
    }
}

fn default_vector_weight() -> f64 {
    0.7
}
fn default_lexical_weight() -> f64 {
    0.3
}
fn default_overfetch_factor() -> usize {
    2
}
fn default_k() -> usize {
    3
}
fn default_max_content_chars() -> usize {
    1000
}
fn default_bm25_k1() -> f64 {
    1.5
}
fn default_bm25_b() -> f64 {
    0.75
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL of the Ollama server.
    #[serde(default = "default_ollama_url")]
    pub url: String,
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
            model: Some("bge-m3:567m".to_string()),
            dims: Some(1024),
            url: default_ollama_url(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
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
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:9000".to_string()
}

/// Expand a leading `~/` against `$HOME`. Other paths are returned as is.
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.storage.base_dir = expand_home(&config.storage.base_dir);
    config.documents.path = expand_home(&config.documents.path);

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.storage.default_collection.trim().is_empty() {
        bail!("storage.default_collection must not be empty");
    }

    // Chunking
    config.chunking.params().context("Invalid [chunking] section")?;

    // Retrieval
    config.retrieval.weights().context("Invalid [retrieval] weights")?;
    config.retrieval.bm25().context("Invalid [retrieval] BM25 parameters")?;
    if config.retrieval.overfetch_factor < 1 {
        bail!("retrieval.overfetch_factor must be >= 1");
    }
    if config.retrieval.default_k < 1 {
        bail!("retrieval.default_k must be >= 1");
    }
    if config.retrieval.max_content_chars == 0 {
        bail!("retrieval.max_content_chars must be > 0");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "ollama" | "openai" | "hash" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be ollama, openai, hash, or disabled.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.provider != "hash" && config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.timeout_secs == 0 {
        bail!("embedding.timeout_secs must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    Ok(())
}
