//! Core data models used throughout Knowledge Desk.
//!
//! These types represent the scoped records (fragments, tasks,
//! conversations, projects) that flow between the ingestion pipeline,
//! the retriever, and the orchestration loops.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The `(project, optional owner)` tuple that bounds every read and write.
///
/// The core never derives a scope on its own; callers pass the
/// authenticated value explicitly into every operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub project_id: String,
    pub owner_id: Option<String>,
}

impl Scope {
    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            owner_id: None,
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Whether a record written under `(project_id, owner_id)` is visible
    /// from this scope.
    pub fn admits(&self, project_id: &str, owner_id: Option<&str>) -> bool {
        if self.project_id != project_id {
            return false;
        }
        match &self.owner_id {
            Some(owner) => owner_id == Some(owner.as_str()),
            None => true,
        }
    }
}

/// One ingestion input. Consumed by the chunker, never persisted itself.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub text: String,
}

/// An ordered segment of a document produced by [`chunk_text`](crate::chunk::chunk_text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub index: usize,
}

/// A persisted, retrievable unit of knowledge with its embedding.
#[derive(Debug, Clone, Serialize)]
pub struct Fragment {
    pub id: String,
    pub project_id: String,
    pub owner_id: Option<String>,
    pub title: String,
    pub content: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub group_id: Option<String>,
    pub source_name: Option<String>,
    pub chunk_index: Option<usize>,
    pub content_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields supplied by the caller when creating a fragment. The store
/// assigns id, scope columns, hash, and timestamps.
#[derive(Debug, Clone, Default)]
pub struct NewFragment {
    pub title: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub group_id: Option<String>,
    pub source_name: Option<String>,
    pub chunk_index: Option<usize>,
}

/// Replacement values for an existing fragment.
#[derive(Debug, Clone)]
pub struct FragmentUpdate {
    pub title: String,
    pub content: String,
    /// New embedding, or `None` to keep the stored vector.
    pub embedding: Option<Vec<f32>>,
}

/// One ingested file, aggregated over the fragments sharing its group id.
#[derive(Debug, Clone, Serialize)]
pub struct FileGroup {
    pub group_id: String,
    pub source_name: Option<String>,
    pub chunk_count: usize,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }

    /// Pending and in-progress tasks are shown to the model as active work.
    pub fn is_active(&self) -> bool {
        !matches!(self, TaskStatus::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(format!(
                "unknown task status '{}': expected pending, in_progress, or completed",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub owner_id: Option<String>,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
}

/// Partial task edit; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.status.is_none()
    }

    pub fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(status) = self.status {
            task.status = status;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// One immutable entry in a conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub project_id: String,
    pub owner_id: Option<String>,
    pub title: String,
    pub messages: Vec<Turn>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Listing entry for a conversation, without its turns.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub category: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// SHA-256 of a fragment's content, hex encoded. Used to skip
/// re-embedding when an edit leaves the content unchanged.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Current Unix timestamp in seconds.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
