//! Wiring: build a ready-to-use [`KnowledgeDesk`] from configuration.
//!
//! [`KnowledgeDesk::open`] connects to SQLite, applies migrations, and
//! constructs the configured embedder and Anthropic client.
//! [`KnowledgeDesk::with_parts`] accepts any store, embedder and model,
//! which is how tests and embedders of the library plug in their own.

use std::sync::Arc;

use anyhow::Result;
use knowledge_desk_core::chunk::ChunkOptions;
use knowledge_desk_core::embedding::Embedder;
use knowledge_desk_core::llm::LlmClient;
use knowledge_desk_core::store::Store;
use tracing::info;

use crate::chat::{Orchestrator, OrchestratorSettings};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::llm::AnthropicClient;
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

/// Shared application handles, cheap to clone.
#[derive(Clone)]
pub struct KnowledgeDesk {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub embedder: Arc<dyn Embedder>,
    pub orchestrator: Arc<Orchestrator>,
}

impl KnowledgeDesk {
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let pool = db::connect(&config).await?;
        migrate::apply(&pool).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
        let embedder = create_embedder(&config.embedding)?;
        let llm: Arc<dyn LlmClient> = Arc::new(AnthropicClient::new(&config.llm)?);

        info!(
            db = %config.db.path.display(),
            embedding_provider = %config.embedding.provider,
            model = %config.llm.model,
            "knowledge desk ready"
        );
        Ok(Self::with_parts(config, store, embedder, llm))
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let orchestrator = Orchestrator::new(
            store.clone(),
            embedder.clone(),
            llm,
            OrchestratorSettings::from_config(&config),
        );
        Self {
            config: Arc::new(config),
            store,
            embedder,
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Chunking options for document ingestion.
    pub fn chunk_options(&self) -> ChunkOptions {
        self.config.chunking.options()
    }
}
