//! LLM boundary types.
//!
//! Provider-neutral request/response shapes for a tool-calling chat model,
//! plus the [`LlmClient`] trait the orchestration loops drive. The content
//! block model mirrors the Messages API: assistant turns may carry
//! `tool_use` blocks, and the following user turn answers each one with a
//! `tool_result` block tagged by the call id.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// The model's raw content, replayed verbatim.
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
        }
    }

    /// One user message carrying every tool result of a step.
    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::User,
            content: results,
        }
    }
}

/// A tool the model may call: name, description, JSON parameter schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Other(String),
}

impl StopReason {
    /// Parse a wire stop reason; a missing value means the turn ended.
    pub fn from_wire(value: Option<&str>) -> Self {
        match value {
            Some("end_turn") | None => StopReason::EndTurn,
            Some("tool_use") => StopReason::ToolUse,
            Some("max_tokens") => StopReason::MaxTokens,
            Some("stop_sequence") => StopReason::StopSequence,
            Some(other) => StopReason::Other(other.to_string()),
        }
    }
}

/// A tool invocation emitted by the model mid-turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: String,
    pub tools: Vec<ToolDefinition>,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
}

impl LlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            stop_reason: StopReason::EndTurn,
        }
    }

    /// All tool-use blocks, in the order the model emitted them.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }
}

/// A chat model that can request tool calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_calls_keep_emission_order() {
        let response = LlmResponse {
            content: vec![
                ContentBlock::Text {
                    text: "Let me do that.".into(),
                },
                ContentBlock::ToolUse {
                    id: "tu_1".into(),
                    name: "create_task".into(),
                    input: json!({"title": "a"}),
                },
                ContentBlock::ToolUse {
                    id: "tu_2".into(),
                    name: "list_tasks".into(),
                    input: json!({}),
                },
            ],
            stop_reason: StopReason::ToolUse,
        };
        let ids: Vec<String> = response.tool_calls().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["tu_1", "tu_2"]);
        assert_eq!(response.first_text(), Some("Let me do that."));
    }

    #[test]
    fn test_stop_reason_from_wire() {
        assert_eq!(StopReason::from_wire(Some("tool_use")), StopReason::ToolUse);
        assert_eq!(StopReason::from_wire(None), StopReason::EndTurn);
        assert_eq!(
            StopReason::from_wire(Some("refusal")),
            StopReason::Other("refusal".into())
        );
    }

    #[test]
    fn test_content_block_wire_shape() {
        let block = ContentBlock::ToolResult {
            tool_use_id: "tu_1".into(),
            content: "done".into(),
            is_error: false,
        };
        assert_eq!(
            serde_json::to_value(&block).unwrap(),
            json!({"type": "tool_result", "tool_use_id": "tu_1", "content": "done"})
        );

        let parsed: ContentBlock = serde_json::from_value(json!({
            "type": "tool_use", "id": "tu_9", "name": "list_tasks", "input": {}
        }))
        .unwrap();
        assert!(matches!(parsed, ContentBlock::ToolUse { ref name, .. } if name == "list_tasks"));
    }
}
