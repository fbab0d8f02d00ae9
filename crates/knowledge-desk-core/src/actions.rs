//! Side-effecting actions the model may request during a conversation.
//!
//! The set of actions is closed: [`Action`] enumerates every supported tool,
//! and [`ActionRegistry::dispatch`] maps a wire name onto a typed handler.
//!
//! | Wire name | Effect | Outcome data |
//! |-----------|--------|--------------|
//! | `create_task` | new pending task | `{ id, title, status }` |
//! | `create_context` | embed + store a standalone fragment | `{ id, title }` |
//! | `list_tasks` | read tasks in scope | task array |
//!
//! An unknown name or malformed arguments degrade to a failed
//! [`ToolOutcome`] so the model can recover conversationally. Storage and
//! embedding failures are real errors and abort the enclosing run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::llm::ToolDefinition;
use crate::models::{NewFragment, NewTask, Scope, Task, TaskStatus};
use crate::store::Store;

pub const ACTION_NOT_FOUND: &str = "Action not found";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    CreateTask,
    CreateContext,
    ListTasks,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::CreateTask, Action::CreateContext, Action::ListTasks];

    pub fn name(&self) -> &'static str {
        match self {
            Action::CreateTask => "create_task",
            Action::CreateContext => "create_context",
            Action::ListTasks => "list_tasks",
        }
    }

    pub fn from_name(name: &str) -> Option<Action> {
        Action::ALL.into_iter().find(|a| a.name() == name)
    }

    /// Tool schema advertised to the model.
    pub fn definition(&self) -> ToolDefinition {
        let (description, input_schema) = match self {
            Action::CreateTask => (
                "Create a new task in the current project. Use this when the user asks to \
                 track, schedule, or remember a piece of work.",
                json!({
                    "type": "object",
                    "properties": {
                        "title": {
                            "type": "string",
                            "description": "Short title of the task"
                        },
                        "description": {
                            "type": "string",
                            "description": "Optional details about the task"
                        }
                    },
                    "required": ["title"]
                }),
            ),
            Action::CreateContext => (
                "Create a new context entry in the knowledge base. Use this to save important \
                 insights, decisions, facts, or ideas from the conversation.",
                json!({
                    "type": "object",
                    "properties": {
                        "title": {
                            "type": "string",
                            "description": "A clear, descriptive title for this piece of knowledge"
                        },
                        "content": {
                            "type": "string",
                            "description": "The information to save. Should be self-contained and \
                                            understandable without the original conversation."
                        }
                    },
                    "required": ["title", "content"]
                }),
            ),
            Action::ListTasks => (
                "List the tasks of the current project, optionally filtered by status.",
                json!({
                    "type": "object",
                    "properties": {
                        "status": {
                            "type": "string",
                            "enum": ["pending", "in_progress", "completed"],
                            "description": "Only return tasks with this status"
                        }
                    }
                }),
            ),
        };
        ToolDefinition {
            name: self.name().to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// Result of one action, fed back to the model as a tool result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolOutcome {
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    /// Text sent back in the `tool_result` block.
    pub fn to_tool_content(&self) -> String {
        match &self.data {
            Some(data) => format!("{}\n{}", self.message, data),
            None => self.message.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateTaskArgs {
    title: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateContextArgs {
    title: String,
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct ListTasksArgs {
    #[serde(default)]
    status: Option<TaskStatus>,
}

/// One task rendered as a bulleted status line.
pub fn render_task_line(task: &Task) -> String {
    if task.description.trim().is_empty() {
        format!("- [{}] {}", task.status, task.title)
    } else {
        format!("- [{}] {}: {}", task.status, task.title, task.description)
    }
}

/// Typed handlers for every [`Action`], bound to one store and embedder.
#[derive(Clone)]
pub struct ActionRegistry {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
}

impl ActionRegistry {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Schemas for a set of actions, in the given order.
    pub fn definitions(actions: &[Action]) -> Vec<ToolDefinition> {
        actions.iter().map(Action::definition).collect()
    }

    /// Run the named action under `scope`.
    pub async fn dispatch(&self, name: &str, arguments: &Value, scope: &Scope) -> Result<ToolOutcome> {
        let Some(action) = Action::from_name(name) else {
            debug!(tool = name, "model requested an unknown action");
            return Ok(ToolOutcome::failed(ACTION_NOT_FOUND));
        };
        self.run(action, arguments, scope).await
    }

    /// Run a resolved action under `scope`.
    pub async fn run(&self, action: Action, arguments: &Value, scope: &Scope) -> Result<ToolOutcome> {
        match action {
            Action::CreateTask => match parse_args::<CreateTaskArgs>(action, arguments) {
                Ok(args) => self.create_task(args, scope).await,
                Err(outcome) => Ok(outcome),
            },
            Action::CreateContext => match parse_args::<CreateContextArgs>(action, arguments) {
                Ok(args) => self.create_context(args, scope).await,
                Err(outcome) => Ok(outcome),
            },
            Action::ListTasks => {
                let args = if arguments.is_null() {
                    Ok(ListTasksArgs::default())
                } else {
                    parse_args::<ListTasksArgs>(action, arguments)
                };
                match args {
                    Ok(args) => self.list_tasks(args, scope).await,
                    Err(outcome) => Ok(outcome),
                }
            }
        }
    }

    async fn create_task(&self, args: CreateTaskArgs, scope: &Scope) -> Result<ToolOutcome> {
        let title = args.title.trim();
        if title.is_empty() {
            return Ok(ToolOutcome::failed("create_task requires a non-empty title"));
        }
        let task = self
            .store
            .insert_task(
                scope,
                NewTask {
                    title: title.to_string(),
                    description: args.description.unwrap_or_default(),
                },
            )
            .await?;
        info!(project_id = %scope.project_id, task_id = %task.id, "created task from tool call");
        Ok(ToolOutcome::ok(
            format!("Created task: {}", task.title),
            json!({ "id": task.id, "title": task.title, "status": task.status }),
        ))
    }

    async fn create_context(&self, args: CreateContextArgs, scope: &Scope) -> Result<ToolOutcome> {
        let title = args.title.trim();
        if title.is_empty() || args.content.trim().is_empty() {
            return Ok(ToolOutcome::failed(
                "create_context requires a non-empty title and content",
            ));
        }
        let embedding = self
            .embedder
            .embed(&args.content)
            .await
            .map_err(|e| Error::upstream("embedding", e))?;
        let fragment = self
            .store
            .insert_fragment(
                scope,
                NewFragment {
                    title: title.to_string(),
                    content: args.content,
                    embedding,
                    ..Default::default()
                },
            )
            .await?;
        info!(
            project_id = %scope.project_id,
            fragment_id = %fragment.id,
            "created knowledge entry from tool call"
        );
        Ok(ToolOutcome::ok(
            format!("Created context: {}", fragment.title),
            json!({ "id": fragment.id, "title": fragment.title }),
        ))
    }

    async fn list_tasks(&self, args: ListTasksArgs, scope: &Scope) -> Result<ToolOutcome> {
        let tasks: Vec<Task> = self
            .store
            .list_tasks(scope)
            .await?
            .into_iter()
            .filter(|t| args.status.map_or(true, |s| t.status == s))
            .collect();
        let message = if tasks.is_empty() {
            "No tasks found.".to_string()
        } else {
            tasks
                .iter()
                .map(render_task_line)
                .collect::<Vec<_>>()
                .join("\n")
        };
        let data = serde_json::to_value(&tasks).map_err(anyhow::Error::from)?;
        Ok(ToolOutcome::ok(message, data))
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(
    action: Action,
    arguments: &Value,
) -> std::result::Result<T, ToolOutcome> {
    serde_json::from_value(arguments.clone()).map_err(|e| {
        ToolOutcome::failed(format!("Invalid arguments for {}: {}", action.name(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("embedding API error (500)")
        }
    }

    fn registry(store: Arc<InMemoryStore>) -> ActionRegistry {
        ActionRegistry::new(store, Arc::new(FixedEmbedder))
    }

    #[test]
    fn test_names_roundtrip() {
        for action in Action::ALL {
            assert_eq!(Action::from_name(action.name()), Some(action));
            assert_eq!(action.definition().name, action.name());
        }
        assert_eq!(Action::from_name("delete_everything"), None);
    }

    #[tokio::test]
    async fn test_unknown_action_degrades() {
        let registry = registry(Arc::new(InMemoryStore::new()));
        let outcome = registry
            .dispatch("launch_rockets", &json!({}), &Scope::project("p1"))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message, ACTION_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_task_is_scoped() {
        let store = Arc::new(InMemoryStore::new());
        let registry = registry(store.clone());
        let scope = Scope::project("p1");
        let outcome = registry
            .dispatch("create_task", &json!({"title": "Write docs"}), &scope)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.message, "Created task: Write docs");
        assert_eq!(outcome.data.as_ref().unwrap()["status"], "pending");

        assert_eq!(store.list_tasks(&scope).await.unwrap().len(), 1);
        assert!(store
            .list_tasks(&Scope::project("p2"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_malformed_arguments_degrade() {
        let registry = registry(Arc::new(InMemoryStore::new()));
        let outcome = registry
            .dispatch("create_context", &json!({"title": "x"}), &Scope::project("p1"))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("Invalid arguments for create_context"));
    }

    #[tokio::test]
    async fn test_create_context_stores_fragment() {
        let store = Arc::new(InMemoryStore::new());
        let registry = registry(store.clone());
        let outcome = registry
            .dispatch(
                "create_context",
                &json!({"title": "Decision", "content": "We ship on Fridays."}),
                &Scope::project("p1"),
            )
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.message, "Created context: Decision");
        assert_eq!(store.fragment_count(), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_an_error() {
        let store = Arc::new(InMemoryStore::new());
        let registry = ActionRegistry::new(store.clone(), Arc::new(FailingEmbedder));
        let err = registry
            .dispatch(
                "create_context",
                &json!({"title": "t", "content": "c"}),
                &Scope::project("p1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream { service: "embedding", .. }));
        assert_eq!(store.fragment_count(), 0);
    }

    #[tokio::test]
    async fn test_list_tasks_filters_and_renders() {
        let store = Arc::new(InMemoryStore::new());
        let registry = registry(store.clone());
        let scope = Scope::project("p1");

        let empty = registry
            .dispatch("list_tasks", &json!({}), &scope)
            .await
            .unwrap();
        assert_eq!(empty.message, "No tasks found.");

        registry
            .dispatch(
                "create_task",
                &json!({"title": "Review", "description": "the PR"}),
                &scope,
            )
            .await
            .unwrap();
        let listed = registry
            .dispatch("list_tasks", &json!({"status": "pending"}), &scope)
            .await
            .unwrap();
        assert_eq!(listed.message, "- [pending] Review: the PR");

        let completed = registry
            .dispatch("list_tasks", &json!({"status": "completed"}), &scope)
            .await
            .unwrap();
        assert_eq!(completed.message, "No tasks found.");
    }
}
