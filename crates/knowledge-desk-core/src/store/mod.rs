//! Storage abstraction for Knowledge Desk.
//!
//! The [`Store`] trait is the contract the orchestration core needs from a
//! persistence backend: scoped CRUD on fragments, tasks, conversations and
//! projects, group deletion for ingested files, and a scoped similarity
//! search over fragment embeddings.
//!
//! Every fragment, task, and conversation operation takes an explicit
//! [`Scope`]; implementations must never return or touch a record the
//! scope does not admit.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{
    Conversation, ConversationSummary, FileGroup, Fragment, FragmentUpdate, NewFragment, NewTask,
    Project, Scope, Task, TaskPatch, Turn,
};

/// Inputs for one similarity search.
#[derive(Debug, Clone)]
pub struct VectorQuery<'a> {
    pub vector: &'a [f32],
    pub scope: &'a Scope,
    /// How many nearest neighbours the index may consider before ranking.
    pub num_candidates: usize,
    /// Maximum results to return.
    pub limit: usize,
}

/// A fragment returned from similarity search, with the backend's score.
///
/// Carries the fragment's scope columns so the retriever can verify the
/// backend honoured the filter.
#[derive(Debug, Clone, Serialize)]
pub struct FragmentCandidate {
    pub id: String,
    pub project_id: String,
    pub owner_id: Option<String>,
    pub title: String,
    pub content: String,
    /// Similarity (higher is more relevant).
    pub score: f64,
}

/// Abstract storage backend.
///
/// | Method group | Purpose |
/// |--------------|---------|
/// | projects | create, fetch, list |
/// | fragments | create, fetch, update, delete, group delete, list, vector search |
/// | tasks | create, fetch, patch, delete, list |
/// | conversations | fetch, existence across owners, append turns (lazy create), retitle, delete, list |
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_project(&self, title: &str, category: &str) -> Result<Project>;

    async fn get_project(&self, id: &str) -> Result<Option<Project>>;

    /// All projects, newest first.
    async fn list_projects(&self) -> Result<Vec<Project>>;

    async fn insert_fragment(&self, scope: &Scope, fragment: NewFragment) -> Result<Fragment>;

    async fn get_fragment(&self, scope: &Scope, id: &str) -> Result<Option<Fragment>>;

    /// Returns the updated fragment, or `None` if it is not in scope.
    async fn update_fragment(
        &self,
        scope: &Scope,
        id: &str,
        update: FragmentUpdate,
    ) -> Result<Option<Fragment>>;

    /// Returns whether a fragment was removed.
    async fn delete_fragment(&self, scope: &Scope, id: &str) -> Result<bool>;

    /// Delete every fragment sharing `group_id`; returns the number removed.
    async fn delete_fragment_group(&self, scope: &Scope, group_id: &str) -> Result<u64>;

    /// Fragments that do not belong to a file group, newest first.
    async fn list_standalone_fragments(&self, scope: &Scope) -> Result<Vec<Fragment>>;

    /// One entry per file group, newest first.
    async fn list_file_groups(&self, scope: &Scope) -> Result<Vec<FileGroup>>;

    /// Scoped nearest-neighbour search, sorted by descending score.
    async fn vector_search(&self, query: &VectorQuery<'_>) -> Result<Vec<FragmentCandidate>>;

    async fn insert_task(&self, scope: &Scope, task: NewTask) -> Result<Task>;

    async fn get_task(&self, scope: &Scope, id: &str) -> Result<Option<Task>>;

    /// Returns the patched task, or `None` if it is not in scope.
    async fn update_task(&self, scope: &Scope, id: &str, patch: &TaskPatch)
        -> Result<Option<Task>>;

    async fn delete_task(&self, scope: &Scope, id: &str) -> Result<bool>;

    /// Tasks in scope, newest first.
    async fn list_tasks(&self, scope: &Scope) -> Result<Vec<Task>>;

    async fn get_conversation(&self, scope: &Scope, id: &str) -> Result<Option<Conversation>>;

    /// Whether `id` exists in the project under any owner.
    async fn conversation_exists(&self, project_id: &str, id: &str) -> Result<bool>;

    /// Append turns to a conversation, creating it with `title` when absent.
    ///
    /// The append is atomic: either all turns land after the existing log,
    /// or none do. Returns the conversation after the append.
    async fn append_turns(
        &self,
        scope: &Scope,
        id: &str,
        title: &str,
        turns: &[Turn],
    ) -> Result<Conversation>;

    async fn rename_conversation(&self, scope: &Scope, id: &str, title: &str) -> Result<bool>;

    async fn delete_conversation(&self, scope: &Scope, id: &str) -> Result<bool>;

    /// Conversations in scope, newest first.
    async fn list_conversations(&self, scope: &Scope) -> Result<Vec<ConversationSummary>>;
}
