//! TOML configuration.
//!
//! Every section is optional; a missing `--config` flag runs with the
//! built-in defaults (feature-hash embeddings, 512/50 chunking, store in
//! `./rag_vector_db`).
//!
//! ```toml
//! [storage]
//! path = "./rag_vector_db"
//!
//! [chunking]
//! chunk_size = 512
//! chunk_overlap = 50
//!
//! [embedding]
//! provider = "ollama"          # hash | openai | ollama | local
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [index]
//! metric = "cosine"            # cosine | euclidean
//!
//! [retrieval]
//! top_k = 5
//! max_context_chars = 2000
//!
//! [logging]
//! level = "warn"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use script_rag_core::chunk::validate_window;
use script_rag_core::index::Metric;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
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
    PathBuf::from("rag_vector_db")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Window length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared by consecutive windows.
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
    512
}
fn default_chunk_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
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

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexConfig {
    #[serde(default)]
    pub metric: Metric,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_context_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `"warn"` or `"info,script_rag=debug"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Load `path` when given, otherwise fall back to defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => load_config(p),
        None => Ok(Config::default()),
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        validate_window(self.chunking.chunk_size, self.chunking.chunk_overlap)
            .context("invalid [chunking]")?;

        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }

        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be >= 1");
        }

        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }

        match self.embedding.provider.as_str() {
            "hash" | "local" => {}
            "openai" | "ollama" => {
                if self.embedding.dims.is_none() {
                    bail!(
                        "embedding.dims must be set when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if self.embedding.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or local.",
                other
            ),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.chunking.chunk_size, 512);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.index.metric, Metric::Cosine);
        assert_eq!(config.retrieval.top_k, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_is_valid() {
        let config = parse("").unwrap();
        assert_eq!(config.storage.path, PathBuf::from("rag_vector_db"));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let err = parse("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap_err();
        assert!(err.to_string().contains("chunking"));
    }

    #[test]
    fn test_bad_window_keeps_error_kind() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("srag.toml");
        std::fs::write(&path, "[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert_eq!(crate::commands::error_kind(&err), "InvalidChunkConfig");
    }

    #[test]
    fn test_remote_provider_requires_model_and_dims() {
        assert!(parse("[embedding]\nprovider = \"openai\"\n").is_err());
        assert!(parse(
            "[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 768\n"
        )
        .is_ok());
    }

    #[test]
    fn test_unknown_provider() {
        assert!(parse("[embedding]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn test_metric_section() {
        let config = parse("[index]\nmetric = \"euclidean\"\n").unwrap();
        assert_eq!(config.index.metric, Metric::Euclidean);
        assert!(parse("[index]\nmetric = \"manhattan\"\n").is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
