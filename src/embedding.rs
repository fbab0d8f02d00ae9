//! HTTP embedding providers.
//!
//! Concrete [`Embedder`] implementations selected by `embedding.provider`:
//!
//! | Config Value | Provider | Endpoint | Credential |
//! |-------------|----------|----------|------------|
//! | `"disabled"` | [`DisabledEmbedder`] | none | none |
//! | `"voyage"` | [`VoyageEmbedder`] | `POST https://api.voyageai.com/v1/embeddings` | `VOYAGE_API_KEY` |
//! | `"openai"` | [`OpenAIEmbedder`] | `POST https://api.openai.com/v1/embeddings` | `OPENAI_API_KEY` |
//! | `"ollama"` | [`OllamaEmbedder`] | `POST {url}/api/embed` | none |
//!
//! ```rust,no_run
//! # use knowledge_desk::config::EmbeddingConfig;
//! # use knowledge_desk::embedding::create_embedder;
//! # use knowledge_desk_core::embedding::Embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```
//!
//! A missing credential fails the `embed` call before any request is sent;
//! an embedder never returns an empty vector in place of an error.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use knowledge_desk_core::embedding::Embedder;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;

const VOYAGE_URL: &str = "https://api.voyageai.com/v1/embeddings";
const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Build the configured embedder.
///
/// # Errors
///
/// Returns an error for unknown provider names or when `model`/`dims`
/// are missing for an enabled provider.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "voyage" => Ok(Arc::new(VoyageEmbedder::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// Always fails; used when `embedding.provider = "disabled"`.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ Shared HTTP plumbing ============

/// Settings common to every HTTP provider.
struct HttpSettings {
    model: String,
    dims: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpSettings {
    fn new(config: &EmbeddingConfig, label: &str) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for {} provider", label))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for {} provider", label))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            dims,
            max_retries: config.max_retries,
            client,
        })
    }
}

fn resolve_key(config: &EmbeddingConfig, default_env: &str) -> (String, Option<String>) {
    let env = config
        .api_key_env
        .clone()
        .unwrap_or_else(|| default_env.to_string());
    let key = std::env::var(&env).ok().filter(|k| !k.trim().is_empty());
    (env, key)
}

/// POST `body` to `url` with retry/backoff and return the parsed JSON.
async fn post_with_retry(
    settings: &HttpSettings,
    label: &str,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
) -> Result<Value> {
    let mut last_err = None;

    for attempt in 0..=settings.max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(provider = label, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let mut request = settings
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = bearer {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    warn!(provider = label, %status, "transient embedding API error");
                    last_err = Some(anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                // Client error (not 429): fail now
                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                warn!(provider = label, error = %e, "embedding request failed");
                last_err = Some(anyhow!("{} connection error: {}", label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} embedding failed after retries", label)))
}

fn json_to_vec(embedding: &Value, label: &str) -> Result<Vec<f32>> {
    let values = embedding
        .as_array()
        .ok_or_else(|| anyhow!("Invalid {} response: embedding is not an array", label))?;
    let vec: Vec<f32> = values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect();
    if vec.is_empty() {
        bail!("Invalid {} response: empty embedding", label);
    }
    Ok(vec)
}

/// Parse `data[0].embedding` (Voyage and OpenAI share this shape).
fn parse_data_response(json: &Value, label: &str) -> Result<Vec<f32>> {
    let first = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .ok_or_else(|| anyhow!("Invalid {} response: missing data array", label))?;
    let embedding = first
        .get("embedding")
        .ok_or_else(|| anyhow!("Invalid {} response: missing embedding", label))?;
    json_to_vec(embedding, label)
}

/// Parse `embeddings[0]` from Ollama's `/api/embed`.
fn parse_ollama_response(json: &Value) -> Result<Vec<f32>> {
    let first = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;
    json_to_vec(first, "Ollama")
}

// ============ Voyage Provider ============

/// Embedding provider using the Voyage AI API (default model `voyage-2`).
pub struct VoyageEmbedder {
    settings: HttpSettings,
    key_env: String,
    api_key: Option<String>,
    url: String,
}

impl VoyageEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (key_env, api_key) = resolve_key(config, "VOYAGE_API_KEY");
        Ok(Self {
            settings: HttpSettings::new(config, "Voyage")?,
            key_env,
            api_key,
            url: config.url.clone().unwrap_or_else(|| VOYAGE_URL.to_string()),
        })
    }
}

#[async_trait]
impl Embedder for VoyageEmbedder {
    fn model_name(&self) -> &str {
        &self.settings.model
    }
    fn dims(&self) -> usize {
        self.settings.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("{} environment variable is not set", self.key_env))?;
        let body = serde_json::json!({
            "model": self.settings.model,
            "input": [text],
        });
        let json = post_with_retry(&self.settings, "Voyage AI", &self.url, Some(api_key), &body)
            .await?;
        parse_data_response(&json, "Voyage AI")
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
pub struct OpenAIEmbedder {
    settings: HttpSettings,
    key_env: String,
    api_key: Option<String>,
    url: String,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (key_env, api_key) = resolve_key(config, "OPENAI_API_KEY");
        Ok(Self {
            settings: HttpSettings::new(config, "OpenAI")?,
            key_env,
            api_key,
            url: config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string()),
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.settings.model
    }
    fn dims(&self) -> usize {
        self.settings.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("{} environment variable is not set", self.key_env))?;
        let body = serde_json::json!({
            "model": self.settings.model,
            "input": [text],
        });
        let json =
            post_with_retry(&self.settings, "OpenAI", &self.url, Some(api_key), &body).await?;
        parse_data_response(&json, "OpenAI")
    }
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    settings: HttpSettings,
    url: String,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base = config.url.as_deref().unwrap_or(OLLAMA_URL);
        Ok(Self {
            settings: HttpSettings::new(config, "Ollama")?,
            url: format!("{}/api/embed", base.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.settings.model
    }
    fn dims(&self) -> usize {
        self.settings.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.settings.model,
            "input": [text],
        });
        let json = post_with_retry(&self.settings, "Ollama", &self.url, None, &body).await?;
        parse_ollama_response(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn voyage_config(key_env: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "voyage".to_string(),
            model: Some("voyage-2".to_string()),
            dims: Some(1024),
            api_key_env: Some(key_env.to_string()),
            max_retries: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_voyage_response() {
        let json = json!({
            "data": [{ "embedding": [0.25, -0.5, 1.0] }],
            "usage": { "total_tokens": 3 }
        });
        assert_eq!(
            parse_data_response(&json, "Voyage AI").unwrap(),
            vec![0.25, -0.5, 1.0]
        );
    }

    #[test]
    fn test_parse_rejects_missing_or_empty_embedding() {
        assert!(parse_data_response(&json!({ "data": [] }), "Voyage AI").is_err());
        assert!(parse_data_response(&json!({ "data": [{ "embedding": [] }] }), "OpenAI").is_err());
        assert!(parse_data_response(&json!({ "error": "bad" }), "OpenAI").is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = json!({ "embeddings": [[1.0, 2.0]] });
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_create_embedder_requires_model() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            dims: Some(1536),
            ..Default::default()
        };
        let err = create_embedder(&config).err().unwrap();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[tokio::test]
    async fn test_disabled_embedder_fails() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert!(embedder.embed("hello").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_request() {
        let embedder =
            VoyageEmbedder::new(&voyage_config("KNOWLEDGE_DESK_TEST_UNSET_VOYAGE_KEY")).unwrap();
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(err
            .to_string()
            .contains("KNOWLEDGE_DESK_TEST_UNSET_VOYAGE_KEY environment variable is not set"));
    }
}
