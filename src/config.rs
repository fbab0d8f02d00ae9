//! TOML configuration.
//!
//! Every section is optional; omitted fields fall back to the defaults
//! below. [`load_config`] reads and validates a file, and
//! [`Config::from_toml_str`] does the same for an in-memory string.
//!
//! ```toml
//! [db]
//! path = "./data/knowledge-desk.sqlite"
//!
//! [chunking]
//! max_chunk_size = 2000
//! overlap_size = 20
//!
//! [retrieval]
//! num_candidates = 50
//! limit = 5
//!
//! [embedding]
//! provider = "voyage"
//! model = "voyage-2"
//! dims = 1024
//!
//! [llm]
//! model = "claude-sonnet-4-20250514"
//!
//! [orchestration]
//! max_iterations = 10
//! deadline_secs = 120
//! ```

use anyhow::{bail, Context, Result};
use knowledge_desk_core::chunk::ChunkOptions;
use knowledge_desk_core::retrieve::RetrievalParams;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/knowledge-desk.sqlite")
}

/// Chunking used by document ingestion. Lengths are in characters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_overlap_size")]
    pub overlap_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            overlap_size: default_overlap_size(),
        }
    }
}

impl ChunkingConfig {
    pub fn options(&self) -> ChunkOptions {
        ChunkOptions {
            max_chunk_size: self.max_chunk_size,
            overlap_size: self.overlap_size,
        }
    }
}

fn default_max_chunk_size() -> usize {
    2000
}
fn default_overlap_size() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_num_candidates")]
    pub num_candidates: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            num_candidates: default_num_candidates(),
            limit: default_limit(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            num_candidates: self.num_candidates,
            limit: self.limit,
        }
    }
}

fn default_num_candidates() -> usize {
    50
}
fn default_limit() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (required shape for `ollama`, optional elsewhere).
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the API key; provider default when unset.
    #[serde(default)]
    pub api_key_env: Option<String>,
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
            api_key_env: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Token budget for each call answering a question.
    #[serde(default = "default_answer_max_tokens")]
    pub answer_max_tokens: u32,
    /// Token budget for each call of a conversation extraction.
    #[serde(default = "default_extraction_max_tokens")]
    pub extraction_max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            api_key_env: default_llm_key_env(),
            base_url: None,
            answer_max_tokens: default_answer_max_tokens(),
            extraction_max_tokens: default_extraction_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_llm_key_env() -> String {
    "CLAUDE_API_KEY".to_string()
}
fn default_answer_max_tokens() -> u32 {
    1024
}
fn default_extraction_max_tokens() -> u32 {
    2048
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestrationConfig {
    /// Maximum LLM calls in one ask or extract run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Wall-clock budget for one run; unlimited when unset.
    #[serde(default)]
    pub deadline_secs: Option<u64>,
    /// Characters of the first question used as a new conversation's title.
    #[serde(default = "default_title_chars")]
    pub title_chars: usize,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            deadline_secs: None,
            title_chars: default_title_chars(),
        }
    }
}

impl OrchestrationConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

fn default_max_iterations() -> usize {
    10
}
fn default_title_chars() -> usize {
    50
}

impl Config {
    /// Parse and validate a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Config> {
        let config: Config =
            toml::from_str(content).with_context(|| "Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Validate chunking
        if self.chunking.max_chunk_size == 0 {
            bail!("chunking.max_chunk_size must be > 0");
        }
        if self.chunking.overlap_size >= self.chunking.max_chunk_size {
            bail!("chunking.overlap_size must be < chunking.max_chunk_size");
        }

        // Validate retrieval
        if self.retrieval.limit < 1 {
            bail!("retrieval.limit must be >= 1");
        }

        // Validate embedding
        match self.embedding.provider.as_str() {
            "disabled" | "voyage" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, voyage, openai, or ollama.",
                other
            ),
        }
        if self.embedding.is_enabled() {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
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

        // Validate llm + orchestration
        if self.llm.model.trim().is_empty() {
            bail!("llm.model must not be empty");
        }
        if self.llm.answer_max_tokens == 0 || self.llm.extraction_max_tokens == 0 {
            bail!("llm max_tokens budgets must be > 0");
        }
        if self.orchestration.max_iterations < 1 {
            bail!("orchestration.max_iterations must be >= 1");
        }
        if self.orchestration.title_chars == 0 {
            bail!("orchestration.title_chars must be > 0");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml_str(&content)
}
