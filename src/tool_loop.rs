//! The multi-turn tool-calling loop shared by answering and extraction.
//!
//! ```text
//!             ┌──────────────────────────────────────────┐
//!             ▼                                          │
//!   AWAITING_MODEL ── stop_reason = tool_use ──▶ EXECUTING_TOOLS
//!             │         (≥ 1 tool_use block)
//!             │ otherwise
//!             ▼
//!           DONE
//! ```
//!
//! Each step sends the system prompt, the tool schemas, and the running
//! message list. Tool calls run sequentially in the order the model
//! emitted them; the model's raw content is then appended as one
//! assistant message, followed by one user message carrying a
//! `tool_result` per call tagged with the call id.
//!
//! The loop stops with [`Error::ToolLoopExceeded`] once `max_iterations`
//! model calls have been spent without a final answer, and with
//! [`Error::Cancelled`] / [`Error::DeadlineExceeded`] when the run's
//! [`RunLimits`] trip.

use knowledge_desk_core::actions::{Action, ActionRegistry, ToolOutcome, ACTION_NOT_FOUND};
use knowledge_desk_core::llm::{
    ContentBlock, LlmClient, LlmRequest, Message, StopReason, ToolCall,
};
use knowledge_desk_core::models::Scope;
use knowledge_desk_core::{Error, Result};
use tracing::{debug, warn};

use crate::limits::RunLimits;

/// One executed tool call and its outcome.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub call: ToolCall,
    pub outcome: ToolOutcome,
}

/// What a completed loop produced.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// First text block of the final response, if any.
    pub final_text: Option<String>,
    pub invocations: Vec<Invocation>,
    pub model_calls: usize,
}

pub struct ToolLoop<'a> {
    pub llm: &'a dyn LlmClient,
    pub registry: &'a ActionRegistry,
    pub limits: &'a RunLimits,
    pub scope: &'a Scope,
    /// Actions the model may call in this run.
    pub actions: &'a [Action],
}

impl<'a> ToolLoop<'a> {
    pub async fn run(
        &self,
        system: String,
        messages: Vec<Message>,
        max_tokens: u32,
    ) -> Result<LoopOutcome> {
        let mut request = LlmRequest {
            system,
            tools: ActionRegistry::definitions(self.actions),
            messages,
            max_tokens,
        };
        let mut invocations = Vec::new();
        let mut model_calls = 0usize;

        loop {
            if model_calls >= self.limits.max_iterations {
                warn!(
                    project_id = %self.scope.project_id,
                    max_iterations = self.limits.max_iterations,
                    "tool loop hit its iteration cap"
                );
                return Err(Error::ToolLoopExceeded {
                    max_iterations: self.limits.max_iterations,
                });
            }

            model_calls += 1;
            let response = self
                .limits
                .guard(self.llm.complete(&request))
                .await?
                .map_err(|e| Error::upstream("llm", e))?;

            let calls = response.tool_calls();
            if response.stop_reason != StopReason::ToolUse || calls.is_empty() {
                debug!(
                    model_calls,
                    stop_reason = ?response.stop_reason,
                    "model produced a final response"
                );
                return Ok(LoopOutcome {
                    final_text: response.first_text().map(str::to_string),
                    invocations,
                    model_calls,
                });
            }

            debug!(model_calls, tool_calls = calls.len(), "executing tool calls");
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                let outcome = self.limits.guard(self.execute(&call)).await??;
                results.push(ContentBlock::ToolResult {
                    tool_use_id: call.id.clone(),
                    content: outcome.to_tool_content(),
                    is_error: !outcome.success,
                });
                invocations.push(Invocation { call, outcome });
            }

            request.messages.push(Message::assistant(response.content));
            request.messages.push(Message::tool_results(results));
        }
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolOutcome> {
        match Action::from_name(&call.name).filter(|a| self.actions.contains(a)) {
            Some(action) => {
                let outcome = self
                    .registry
                    .run(action, &call.arguments, self.scope)
                    .await?;
                debug!(
                    tool = %call.name,
                    success = outcome.success,
                    "tool call finished"
                );
                Ok(outcome)
            }
            None => {
                debug!(tool = %call.name, "model requested an unavailable tool");
                Ok(ToolOutcome::failed(ACTION_NOT_FOUND))
            }
        }
    }
}
