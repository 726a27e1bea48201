//! Embedding provider implementations.
//!
//! Concrete backends for the [`EmbeddingProvider`] trait defined in the core
//! crate:
//! - **[`HashProvider`]**: deterministic SHA-256 feature hashing. Offline,
//!   no model download; the default so a fresh install works immediately.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with retry and backoff.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`**: runs models in-process via fastembed (feature
//!   `local-embeddings-fastembed`); no network calls after model download.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] once at startup and inject the result into the
//! retrieval service:
//!
//! ```rust
//! # use script_rag::config::EmbeddingConfig;
//! # use script_rag::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "hash"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "feature-hash");
//! assert_eq!(provider.dims(), 384);
//! ```
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

mod hash;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
#[cfg(feature = "local-embeddings-fastembed")]
use anyhow::Context;
use async_trait::async_trait;

pub use hash::HashProvider;
pub use script_rag_core::embedding::EmbeddingProvider;
use script_rag_core::error::{RagError, RagResult};

use crate::config::EmbeddingConfig;

// ============ HTTP retry ============

/// POST `body` as JSON to `url`, retrying transient failures.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> RagResult<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(attempt, ?delay, "retrying {} embedding request", label);
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        RagError::Embedding(format!("{} returned invalid JSON: {}", label, e))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(format!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                return Err(RagError::Embedding(format!(
                    "{} API error {}: {}",
                    label, status, body_text
                )));
            }
            Err(e) => {
                last_err = Some(format!("{} connection error ({}): {}", label, url, e));
                continue;
            }
        }
    }

    Err(RagError::Embedding(last_err.unwrap_or_else(|| {
        format!("{} embedding failed after retries", label)
    })))
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn check_count(label: &str, expected: usize, got: usize) -> RagResult<()> {
    if expected != got {
        return Err(RagError::Embedding(format!(
            "{} returned {} embeddings for {} inputs",
            label, got, expected
        )));
    }
    Ok(())
}

fn json_floats(label: &str, values: &[serde_json::Value]) -> RagResult<Vec<f32>> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                RagError::Embedding(format!(
                    "invalid {} response: embedding element {} is not a number",
                    label, i
                ))
            })
        })
        .collect()
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_with_retry(
            &self.client,
            "https://api.openai.com/v1/embeddings",
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        let embeddings = parse_openai_response(&json)?;
        check_count("OpenAI", texts.len(), embeddings.len())?;
        Ok(embeddings)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> RagResult<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::Embedding("invalid OpenAI response: missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| RagError::Embedding("invalid OpenAI response: missing embedding".into()))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, json_floats("OpenAI", embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default
/// `http://localhost:11434`). Requires an embedding model to be pulled,
/// e.g. `ollama pull nomic-embed-text`.
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_with_retry(
            &self.client,
            &format!("{}/api/embed", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        let embeddings = parse_ollama_response(&json)?;
        check_count("Ollama", texts.len(), embeddings.len())?;
        Ok(embeddings)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> RagResult<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            RagError::Embedding("invalid Ollama response: missing embeddings array".into())
        })?;

    embeddings
        .iter()
        .map(|embedding| {
            let values = embedding.as_array().ok_or_else(|| {
                RagError::Embedding("invalid Ollama response: embedding is not an array".into())
            })?;
            json_floats("Ollama", values)
        })
        .collect()
}

// ============ Local Provider (fastembed) ============

/// In-process embedding via fastembed.
///
/// The model is downloaded from Hugging Face (and cached) when the provider
/// is constructed, so a missing or broken model fails before any store is
/// opened.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        let fastembed_model = config_to_fastembed_model(&model_name)?;
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .with_context(|| format!("failed to initialize local model '{}'", model_name))?;
        tracing::info!(model = %model_name, dims, "local embedding model loaded");
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let slot = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = slot
                .lock()
                .map_err(|_| RagError::Embedding("local model lock poisoned".into()))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| RagError::Embedding(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| RagError::Embedding(format!("embedding task failed: {}", e)))?
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| "all-minilm-l6-v2".to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        _ => 384,
    });

    (model_name, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             multilingual-e5-small, multilingual-e5-base",
            other
        ),
    }
}

/// Create the [`EmbeddingProvider`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"hash"` | [`HashProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (requires `local-embeddings-fastembed`) |
///
/// # Errors
///
/// Returns an error for unknown provider names or if the provider
/// cannot be initialized (missing config, API key, or feature flag).
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider.as_str() {
        "hash" => Arc::new(HashProvider::new(
            config.model.as_deref(),
            config.dims.unwrap_or(hash::DEFAULT_DIMS),
        )?),
        "openai" => Arc::new(OpenAIProvider::new(config)?),
        "ollama" => Arc::new(OllamaProvider::new(config)?),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Arc::new(LocalProvider::new(config)?),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires building with --features local-embeddings-fastembed"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    };
    tracing::debug!(
        provider = %config.provider,
        model = provider.model_name(),
        dims = provider.dims(),
        "embedding provider ready"
    );
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_openai_response_missing_data() {
        let err = parse_openai_response(&serde_json::json!({"error": "nope"})).unwrap_err();
        assert_eq!(err.kind(), "Embedding");
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.25], [1.0, 2.0]]});
        let vectors = parse_ollama_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], vec![0.5, 0.25]);
        assert!(parse_ollama_response(&serde_json::json!({"embeddings": [1.0]})).is_err());
    }

    #[test]
    fn test_non_numeric_embedding_is_rejected() {
        let json = serde_json::json!({"data": [{"index": 0, "embedding": [0.5, "NaN"]}]});
        let err = parse_openai_response(&json).unwrap_err();
        assert_eq!(err.kind(), "Embedding");
        assert!(err.to_string().contains("element 1"));

        let json = serde_json::json!({"embeddings": [[0.5, null]]});
        assert!(parse_ollama_response(&json).is_err());
    }

    #[cfg(feature = "local-embeddings-fastembed")]
    #[test]
    fn test_local_unknown_model_fails_at_construction() {
        let config = EmbeddingConfig {
            provider: "local".to_string(),
            model: Some("no-such-model".to_string()),
            ..EmbeddingConfig::default()
        };
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn test_check_count() {
        assert!(check_count("X", 2, 2).is_ok());
        assert!(check_count("X", 2, 1).is_err());
    }

    #[test]
    fn test_create_provider_defaults_to_hash() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "feature-hash");
        assert_eq!(provider.dims(), hash::DEFAULT_DIMS);
    }

    #[test]
    fn test_create_provider_unknown() {
        let config = EmbeddingConfig {
            provider: "magic".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn test_ollama_requires_model() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            dims: Some(768),
            ..EmbeddingConfig::default()
        };
        assert!(create_provider(&config).is_err());
    }
}
