//! Distilling a conversation into knowledge entries.
//!
//! [`Orchestrator::extract`] replays a stored conversation as a transcript
//! and lets the model call `create_context` as many times as it likes.
//! When the model stops requesting tools, the titles of the successful
//! calls are reported and, if asked, the conversation is deleted. The
//! conversation is never deleted when nothing was extracted or when the
//! run fails.

use knowledge_desk_core::actions::Action;
use knowledge_desk_core::error::require;
use knowledge_desk_core::llm::Message;
use knowledge_desk_core::models::Scope;
use knowledge_desk_core::{Error, Result};
use serde::Serialize;
use tracing::{error, info};

use crate::chat::Orchestrator;
use crate::limits::RunLimits;
use crate::prompt::{extraction_request, render_transcript, EXTRACTION_SYSTEM_PROMPT};
use crate::tool_loop::ToolLoop;

#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub conversation_id: String,
    /// Delete the conversation after at least one entry was created.
    pub delete_after: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    /// Titles of the entries created, in call order.
    pub created: Vec<String>,
    pub deleted: bool,
    /// The model's closing summary, if it wrote one.
    pub summary: Option<String>,
    pub message: String,
    pub model_calls: usize,
}

fn report_message(count: usize) -> String {
    format!(
        "Extracted {} context{} from conversation",
        count,
        if count == 1 { "" } else { "s" }
    )
}

impl Orchestrator {
    pub async fn extract(
        &self,
        scope: &Scope,
        request: &ExtractRequest,
        limits: &RunLimits,
    ) -> Result<ExtractionReport> {
        self.extract_inner(scope, request, limits)
            .await
            .map_err(|e| {
                error!(
                    project_id = %scope.project_id,
                    conversation_id = %request.conversation_id,
                    operation = "extract",
                    error = %e,
                    "conversation extraction failed"
                );
                e
            })
    }

    async fn extract_inner(
        &self,
        scope: &Scope,
        request: &ExtractRequest,
        limits: &RunLimits,
    ) -> Result<ExtractionReport> {
        require("project_id", &scope.project_id)?;
        require("conversation_id", &request.conversation_id)?;

        let _guard = self
            .locks
            .acquire(&scope.project_id, &request.conversation_id)
            .await;

        let conversation = self
            .store
            .get_conversation(scope, &request.conversation_id)
            .await?
            .ok_or_else(|| Error::not_found("conversation", &request.conversation_id))?;

        let transcript = render_transcript(&conversation.messages);
        let tool_loop = ToolLoop {
            llm: self.llm.as_ref(),
            registry: &self.registry,
            limits,
            scope,
            actions: &[Action::CreateContext],
        };
        let outcome = tool_loop
            .run(
                EXTRACTION_SYSTEM_PROMPT.to_string(),
                vec![Message::user_text(extraction_request(&transcript))],
                self.settings.extraction_max_tokens,
            )
            .await?;

        let created: Vec<String> = outcome
            .invocations
            .iter()
            .filter(|inv| inv.call.name == Action::CreateContext.name() && inv.outcome.success)
            .map(|inv| {
                inv.outcome
                    .data
                    .as_ref()
                    .and_then(|d| d.get("title"))
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();

        let deleted = if request.delete_after && !created.is_empty() {
            self.store
                .delete_conversation(scope, &request.conversation_id)
                .await?
        } else {
            false
        };

        info!(
            project_id = %scope.project_id,
            conversation_id = %request.conversation_id,
            created = created.len(),
            deleted,
            model_calls = outcome.model_calls,
            "extracted conversation knowledge"
        );

        Ok(ExtractionReport {
            message: report_message(created.len()),
            created,
            deleted,
            summary: outcome.final_text,
            model_calls: outcome.model_calls,
        })
    }
}
