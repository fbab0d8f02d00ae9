//! Conversation orchestration: answering a question inside a persisted
//! conversation.
//!
//! [`Orchestrator::ask`] runs one request end to end:
//!
//! 1. validate the scope, conversation id and question (no network calls
//!    happen when validation fails);
//! 2. take the conversation's lock;
//! 3. load the conversation history, refusing an id another owner holds;
//! 4. embed the question, retrieve the top fragments in scope, and load
//!    the scope's active tasks;
//! 5. drive the [`ToolLoop`] with every [`Action`] available;
//! 6. append the question and the final answer as two turns.
//!
//! Nothing is persisted when any step fails.

use std::sync::Arc;
use std::time::Duration;

use knowledge_desk_core::actions::{Action, ActionRegistry};
use knowledge_desk_core::embedding::Embedder;
use knowledge_desk_core::error::require;
use knowledge_desk_core::llm::{LlmClient, Message};
use knowledge_desk_core::models::{Role, Scope, Turn};
use knowledge_desk_core::retrieve::{retrieve, RetrievalParams};
use knowledge_desk_core::store::Store;
use knowledge_desk_core::{Error, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::limits::{ConversationLocks, RunLimits};
use crate::prompt::{answer_system_prompt, conversation_title, FALLBACK_ANSWER};
use crate::tool_loop::ToolLoop;

/// Tunables for the orchestration loops.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub retrieval: RetrievalParams,
    pub answer_max_tokens: u32,
    pub extraction_max_tokens: u32,
    pub max_iterations: usize,
    pub deadline: Option<Duration>,
    pub title_chars: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retrieval: config.retrieval.params(),
            answer_max_tokens: config.llm.answer_max_tokens,
            extraction_max_tokens: config.llm.extraction_max_tokens,
            max_iterations: config.orchestration.max_iterations,
            deadline: config.orchestration.deadline(),
            title_chars: config.orchestration.title_chars,
        }
    }
}

/// A question asked inside a conversation.
#[derive(Debug, Clone)]
pub struct AskRequest {
    /// Caller-supplied id; the conversation is created on first use.
    pub conversation_id: String,
    pub question: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub id: String,
    pub title: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub name: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub actions: Vec<ActionRecord>,
    pub model_calls: usize,
}

/// Drives answering and extraction runs against one store, embedder and
/// model.
pub struct Orchestrator {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) llm: Arc<dyn LlmClient>,
    pub(crate) registry: ActionRegistry,
    pub(crate) locks: Arc<ConversationLocks>,
    pub(crate) settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmClient>,
        settings: OrchestratorSettings,
    ) -> Self {
        let registry = ActionRegistry::new(store.clone(), embedder.clone());
        Self {
            store,
            embedder,
            llm,
            registry,
            locks: Arc::new(ConversationLocks::new()),
            settings,
        }
    }

    /// Share conversation locks with other orchestrators over the same store.
    pub fn with_locks(mut self, locks: Arc<ConversationLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Limits for one run from the configured cap and deadline.
    pub fn run_limits(&self, cancel: CancellationToken) -> RunLimits {
        let limits = RunLimits::new(self.settings.max_iterations).with_cancellation(cancel);
        match self.settings.deadline {
            Some(deadline) => limits.with_timeout(deadline),
            None => limits,
        }
    }

    /// Answer `request.question` within `scope`, persisting the exchange.
    pub async fn ask(
        &self,
        scope: &Scope,
        request: &AskRequest,
        limits: &RunLimits,
    ) -> Result<Answer> {
        self.ask_inner(scope, request, limits).await.map_err(|e| {
            error!(
                project_id = %scope.project_id,
                conversation_id = %request.conversation_id,
                operation = "ask",
                error = %e,
                "question failed"
            );
            e
        })
    }

    async fn ask_inner(
        &self,
        scope: &Scope,
        request: &AskRequest,
        limits: &RunLimits,
    ) -> Result<Answer> {
        require("project_id", &scope.project_id)?;
        require("conversation_id", &request.conversation_id)?;
        require("question", &request.question)?;

        let _guard = self
            .locks
            .acquire(&scope.project_id, &request.conversation_id)
            .await;

        let history = self
            .store
            .get_conversation(scope, &request.conversation_id)
            .await?;
        if history.is_none()
            && self
                .store
                .conversation_exists(&scope.project_id, &request.conversation_id)
                .await?
        {
            // Held by another owner in this project.
            return Err(Error::not_found("conversation", &request.conversation_id));
        }

        let query_vec = limits
            .guard(self.embedder.embed(&request.question))
            .await?
            .map_err(|e| Error::upstream("embedding", e))?;
        let fragments = retrieve(
            self.store.as_ref(),
            &query_vec,
            scope,
            &self.settings.retrieval,
        )
        .await?;

        let tasks = self.store.list_tasks(scope).await?;

        let mut messages: Vec<Message> = history
            .as_ref()
            .map(|c| c.messages.iter().map(turn_to_message).collect())
            .unwrap_or_default();
        messages.push(Message::user_text(request.question.clone()));

        let tool_loop = ToolLoop {
            llm: self.llm.as_ref(),
            registry: &self.registry,
            limits,
            scope,
            actions: &Action::ALL,
        };
        let outcome = tool_loop
            .run(
                answer_system_prompt(&fragments, &tasks),
                messages,
                self.settings.answer_max_tokens,
            )
            .await?;

        let answer = outcome
            .final_text
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_ANSWER.to_string());

        let title = conversation_title(&request.question, self.settings.title_chars);
        self.store
            .append_turns(
                scope,
                &request.conversation_id,
                &title,
                &[Turn::user(request.question.clone()), Turn::assistant(answer.clone())],
            )
            .await?;

        info!(
            project_id = %scope.project_id,
            conversation_id = %request.conversation_id,
            sources = fragments.len(),
            tool_calls = outcome.invocations.len(),
            model_calls = outcome.model_calls,
            "answered question"
        );

        Ok(Answer {
            answer,
            sources: fragments
                .into_iter()
                .map(|f| SourceRef {
                    id: f.id,
                    title: f.title,
                    score: f.score,
                })
                .collect(),
            actions: outcome
                .invocations
                .into_iter()
                .map(|inv| ActionRecord {
                    name: inv.call.name,
                    success: inv.outcome.success,
                    message: inv.outcome.message,
                })
                .collect(),
            model_calls: outcome.model_calls,
        })
    }
}

fn turn_to_message(turn: &Turn) -> Message {
    match turn.role {
        Role::User => Message::user_text(turn.content.clone()),
        Role::Assistant => Message::assistant_text(turn.content.clone()),
    }
}
