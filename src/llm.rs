//! Anthropic Messages API client.
//!
//! Implements [`LlmClient`] over `POST /v1/messages`. The core's
//! [`ContentBlock`] already serializes to the wire shape, so requests are
//! built by embedding the message list as-is; responses are mapped back
//! keeping only text and tool-use blocks.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use knowledge_desk_core::llm::{ContentBlock, LlmClient, LlmRequest, LlmResponse, StopReason};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::LlmConfig;

/// Default Anthropic API endpoint
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Current API version
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    model: String,
    key_env: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    /// Build a client from configuration, reading the key from
    /// `llm.api_key_env`. A missing key fails each call, not construction.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            key_env: config.api_key_env.clone(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_API_URL.to_string()),
            client,
        })
    }

    fn build_request_body(&self, request: &LlmRequest) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "messages": request.messages,
        });
        if !request.system.is_empty() {
            body["system"] = Value::String(request.system.clone());
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(request.tools);
        }
        body
    }
}

/// Claude API response format
#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<WireBlock>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

fn parse_response(body: &str) -> Result<LlmResponse> {
    let response: ClaudeResponse = serde_json::from_str(body)
        .map_err(|e| anyhow!("Failed to parse anthropic response: {}", e))?;

    let content = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            WireBlock::Text { text } => Some(ContentBlock::Text { text }),
            WireBlock::ToolUse { id, name, input } => {
                Some(ContentBlock::ToolUse { id, name, input })
            }
            WireBlock::Other => None,
        })
        .collect();

    Ok(LlmResponse {
        content,
        stop_reason: StopReason::from_wire(response.stop_reason.as_deref()),
    })
}

/// Map a non-200 status to a descriptive error.
fn parse_http_error(status: u16, body: &str) -> anyhow::Error {
    match status {
        401 => anyhow!("anthropic: Invalid API key"),
        403 => anyhow!("anthropic: Access denied"),
        404 => anyhow!("anthropic: model not found: {}", body),
        429 => anyhow!("anthropic: rate limited: {}", body),
        400 => anyhow!("anthropic: invalid request: {}", body),
        500..=599 => anyhow!("anthropic: server error ({}): {}", status, body),
        _ => anyhow!("anthropic: HTTP {}: {}", status, body),
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("{} environment variable is not set", self.key_env))?;

        let body = self.build_request_body(request);
        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending messages request"
        );

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("anthropic network error: {}", e))?;

        let status = response.status().as_u16();
        let body_text = response
            .text()
            .await
            .map_err(|e| anyhow!("anthropic network error: {}", e))?;

        if status != 200 {
            return Err(parse_http_error(status, &body_text));
        }

        parse_response(&body_text)
    }
}
