//! Embedding provider implementations.
//!
//! The [`EmbeddingProvider`] trait lives in `secure-rag-core`; this module
//! provides the backends selected by `[embedding] provider`:
//! - **[`OllamaProvider`]** — calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`OpenAIProvider`]** — calls the OpenAI embeddings API.
//! - **[`HashProvider`]** — deterministic offline feature hashing (from core).
//! - **[`DisabledProvider`]** — returns errors; used when embeddings are not configured.
//!
//! Every provider returned by [`create_provider`] is wrapped in a
//! [`TimedProvider`], so no embedding call can block longer than
//! `embedding.timeout_secs`.
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately as a configuration error
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use secure_rag_core::embedding::check_embeddings;
pub use secure_rag_core::embedding::{EmbeddingProvider, HashProvider};
use secure_rag_core::error::{Result, RetrievalError};

use crate::config::EmbeddingConfig;

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let texts = [text.to_string()];
    let results = provider.embed(&texts).await?;
    check_embeddings(&results, 1, provider.dims())?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| RetrievalError::Transient("empty embedding response".to_string()))
}

// ============ Timeout wrapper ============

/// Bounds every `embed` call of the wrapped provider by a fixed timeout.
///
/// Expiry surfaces as [`RetrievalError::Transient`] with a message
/// containing "timed out".
pub struct TimedProvider {
    inner: Box<dyn EmbeddingProvider>,
    timeout: Duration,
}

impl TimedProvider {
    pub fn new(inner: Box<dyn EmbeddingProvider>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl EmbeddingProvider for TimedProvider {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match tokio::time::timeout(self.timeout, self.inner.embed(texts)).await {
            Ok(result) => result,
            Err(_) => Err(RetrievalError::Transient(format!(
                "embedding provider '{}' timed out after {:?}",
                self.inner.model_name(),
                self.timeout
            ))),
        }
    }
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RetrievalError::Configuration(
            "embedding provider is disabled; set [embedding] provider in the config".to_string(),
        ))
    }
}

// ============ HTTP plumbing ============

/// Send a JSON POST with retry/backoff and return the parsed body.
async fn post_json_with_retry(
    label: &str,
    request: impl Fn() -> reqwest::RequestBuilder,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(label, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        match request().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        RetrievalError::Transient(format!("{} returned invalid JSON: {}", label, e))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(label, %status, attempt, "embedding request failed, will retry");
                    last_err = Some(format!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                return Err(RetrievalError::Configuration(format!(
                    "{} API error {}: {}",
                    label, status, body_text
                )));
            }
            Err(e) => {
                warn!(label, attempt, error = %e, "embedding request failed, will retry");
                last_err = Some(format!("{} connection error: {}", label, e));
            }
        }
    }

    Err(RetrievalError::Transient(last_err.unwrap_or_else(|| {
        format!("{} embedding failed after retries", label)
    })))
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RetrievalError::Configuration(format!("failed to build HTTP client: {}", e)))
}

fn parse_vector(value: &serde_json::Value, label: &str) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| {
            RetrievalError::Transient(format!("invalid {} response: embedding is not an array", label))
        })?
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                RetrievalError::Transient(format!(
                    "invalid {} response: non-numeric embedding value",
                    label
                ))
            })
        })
        .collect()
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured Ollama URL (default: `http://localhost:11434`).
/// Requires Ollama to be running with the embedding model pulled
/// (e.g. `ollama pull bge-m3:567m`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            RetrievalError::Configuration("embedding.model required for Ollama provider".into())
        })?;
        let dims = config.dims.ok_or_else(|| {
            RetrievalError::Configuration("embedding.dims required for Ollama provider".into())
        })?;

        Ok(Self {
            model,
            dims,
            url: config.url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
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

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = format!("{}/api/embed", self.url);
        let json = post_json_with_retry(
            "Ollama",
            || {
                self.client
                    .post(&endpoint)
                    .header("Content-Type", "application/json")
                    .json(&body)
            },
            self.max_retries,
        )
        .await?;
        let vectors = parse_ollama_response(&json)?;
        check_embeddings(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            RetrievalError::Transient("invalid Ollama response: missing embeddings array".into())
        })?;

    embeddings
        .iter()
        .map(|e| parse_vector(e, "Ollama"))
        .collect()
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls the `POST /v1/embeddings` endpoint with the configured model.
/// Requires the `OPENAI_API_KEY` environment variable to be set.
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
    /// Returns a configuration error if `model` or `dims` is not set in
    /// config, or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            RetrievalError::Configuration("embedding.model required for OpenAI provider".into())
        })?;
        let dims = config.dims.ok_or_else(|| {
            RetrievalError::Configuration("embedding.dims required for OpenAI provider".into())
        })?;
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            RetrievalError::Configuration("OPENAI_API_KEY environment variable not set".into())
        })?;

        Ok(Self {
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
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

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            "OpenAI",
            || {
                self.client
                    .post("https://api.openai.com/v1/embeddings")
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .header("Content-Type", "application/json")
                    .json(&body)
            },
            self.max_retries,
        )
        .await?;
        let vectors = parse_openai_response(&json)?;
        check_embeddings(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RetrievalError::Transient("invalid OpenAI response: missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item.get("embedding").ok_or_else(|| {
            RetrievalError::Transient("invalid OpenAI response: missing embedding".into())
        })?;
        indexed.push((index, parse_vector(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Create the configured provider, wrapped in a [`TimedProvider`].
///
/// # Supported Providers
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"hash"` | [`HashProvider`] |
/// | `"disabled"` | [`DisabledProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let inner: Box<dyn EmbeddingProvider> = match config.provider.as_str() {
        "disabled" => Box::new(DisabledProvider),
        "ollama" => Box::new(OllamaProvider::new(config)?),
        "openai" => Box::new(OpenAIProvider::new(config)?),
        "hash" => {
            let dims = config.dims.ok_or_else(|| {
                RetrievalError::Configuration("embedding.dims required for hash provider".into())
            })?;
            Box::new(HashProvider::new(dims))
        }
        other => {
            return Err(RetrievalError::Configuration(format!(
                "unknown embedding provider: {}",
                other
            )))
        }
    };
    Ok(Arc::new(TimedProvider::new(
        inner,
        Duration::from_secs(config.timeout_secs),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowProvider;

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        fn model_name(&self) -> &str {
            "slow"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(texts.iter().map(|_| vec![0.0, 0.0]).collect())
        }
    }

    fn hash_config(dims: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "hash".to_string(),
            model: None,
            dims: Some(dims),
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let p = TimedProvider::new(Box::new(SlowProvider), Duration::from_millis(20));
        let err = p.embed(&["q".to_string()]).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_disabled_provider_fails() {
        let err = DisabledProvider.embed(&["q".to_string()]).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_create_hash_provider() {
        let p = create_provider(&hash_config(32)).unwrap();
        assert_eq!(p.model_name(), "hash-32");
        let v = embed_query(p.as_ref(), "hello world").await.unwrap();
        assert_eq!(v.len(), 32);
    }

    #[test]
    fn test_create_unknown_provider() {
        let mut config = hash_config(8);
        config.provider = "magic".to_string();
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({ "embeddings": [[0.5, -1.0], [2.0, 0.0]] });
        let v = parse_ollama_response(&json).unwrap();
        assert_eq!(v, vec![vec![0.5, -1.0], vec![2.0, 0.0]]);
        assert!(parse_ollama_response(&serde_json::json!({})).is_err());
        assert!(parse_ollama_response(&serde_json::json!({ "embeddings": [["x"]] })).is_err());
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [2.0] },
                { "index": 0, "embedding": [1.0] }
            ]
        });
        assert_eq!(parse_openai_response(&json).unwrap(), vec![vec![1.0], vec![2.0]]);
    }
}
