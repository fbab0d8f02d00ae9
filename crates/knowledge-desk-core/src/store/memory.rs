//! In-memory [`Store`] implementation for tests and embedded use.
//!
//! Records live in insertion-ordered `Vec`s behind `std::sync::RwLock`, so
//! "newest first" listings are simply reverse iteration. Vector search is
//! brute-force cosine similarity over the scope's fragments.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::models::{
    content_hash, now_ts, Conversation, ConversationSummary, FileGroup, Fragment, FragmentUpdate,
    NewFragment, NewTask, Project, Scope, Task, TaskPatch, TaskStatus, Turn,
};

use super::{FragmentCandidate, Store, VectorQuery};

/// In-memory store. Cheap to construct; every test gets its own.
#[derive(Default)]
pub struct InMemoryStore {
    projects: RwLock<Vec<Project>>,
    fragments: RwLock<Vec<Fragment>>,
    tasks: RwLock<Vec<Task>>,
    conversations: RwLock<Vec<Conversation>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fragments across all scopes.
    pub fn fragment_count(&self) -> usize {
        self.fragments.read().map(|f| f.len()).unwrap_or(0)
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn in_scope_fragment(scope: &Scope, f: &Fragment) -> bool {
    scope.admits(&f.project_id, f.owner_id.as_deref())
}

fn in_scope_task(scope: &Scope, t: &Task) -> bool {
    scope.admits(&t.project_id, t.owner_id.as_deref())
}

fn in_scope_conversation(scope: &Scope, c: &Conversation) -> bool {
    scope.admits(&c.project_id, c.owner_id.as_deref())
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_project(&self, title: &str, category: &str) -> Result<Project> {
        let now = now_ts();
        let project = Project {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            category: category.to_string(),
            created_at: now,
            updated_at: now,
        };
        write(&self.projects)?.push(project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        Ok(read(&self.projects)?.iter().find(|p| p.id == id).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(read(&self.projects)?.iter().rev().cloned().collect())
    }

    async fn insert_fragment(&self, scope: &Scope, fragment: NewFragment) -> Result<Fragment> {
        let now = now_ts();
        let stored = Fragment {
            id: Uuid::new_v4().to_string(),
            project_id: scope.project_id.clone(),
            owner_id: scope.owner_id.clone(),
            content_hash: content_hash(&fragment.content),
            title: fragment.title,
            content: fragment.content,
            embedding: fragment.embedding,
            group_id: fragment.group_id,
            source_name: fragment.source_name,
            chunk_index: fragment.chunk_index,
            created_at: now,
            updated_at: now,
        };
        write(&self.fragments)?.push(stored.clone());
        Ok(stored)
    }

    async fn get_fragment(&self, scope: &Scope, id: &str) -> Result<Option<Fragment>> {
        Ok(read(&self.fragments)?
            .iter()
            .find(|f| f.id == id && in_scope_fragment(scope, f))
            .cloned())
    }

    async fn update_fragment(
        &self,
        scope: &Scope,
        id: &str,
        update: FragmentUpdate,
    ) -> Result<Option<Fragment>> {
        let mut fragments = write(&self.fragments)?;
        let Some(fragment) = fragments
            .iter_mut()
            .find(|f| f.id == id && in_scope_fragment(scope, f))
        else {
            return Ok(None);
        };

        fragment.content_hash = content_hash(&update.content);
        fragment.title = update.title;
        fragment.content = update.content;
        if let Some(embedding) = update.embedding {
            fragment.embedding = embedding;
        }
        fragment.updated_at = now_ts();
        Ok(Some(fragment.clone()))
    }

    async fn delete_fragment(&self, scope: &Scope, id: &str) -> Result<bool> {
        let mut fragments = write(&self.fragments)?;
        let before = fragments.len();
        fragments.retain(|f| !(f.id == id && in_scope_fragment(scope, f)));
        Ok(fragments.len() < before)
    }

    async fn delete_fragment_group(&self, scope: &Scope, group_id: &str) -> Result<u64> {
        let mut fragments = write(&self.fragments)?;
        let before = fragments.len();
        fragments.retain(|f| {
            !(f.group_id.as_deref() == Some(group_id) && in_scope_fragment(scope, f))
        });
        Ok((before - fragments.len()) as u64)
    }

    async fn list_standalone_fragments(&self, scope: &Scope) -> Result<Vec<Fragment>> {
        Ok(read(&self.fragments)?
            .iter()
            .rev()
            .filter(|f| f.group_id.is_none() && in_scope_fragment(scope, f))
            .cloned()
            .collect())
    }

    async fn list_file_groups(&self, scope: &Scope) -> Result<Vec<FileGroup>> {
        let fragments = read(&self.fragments)?;
        let mut groups: Vec<FileGroup> = Vec::new();

        for f in fragments.iter().filter(|f| in_scope_fragment(scope, f)) {
            let Some(group_id) = &f.group_id else {
                continue;
            };
            match groups.iter_mut().find(|g| &g.group_id == group_id) {
                Some(group) => {
                    group.chunk_count += 1;
                    group.created_at = group.created_at.min(f.created_at);
                }
                None => groups.push(FileGroup {
                    group_id: group_id.clone(),
                    source_name: f.source_name.clone(),
                    chunk_count: 1,
                    created_at: f.created_at,
                }),
            }
        }

        groups.reverse();
        Ok(groups)
    }

    async fn vector_search(&self, query: &VectorQuery<'_>) -> Result<Vec<FragmentCandidate>> {
        let fragments = read(&self.fragments)?;
        let mut candidates: Vec<FragmentCandidate> = fragments
            .iter()
            .filter(|f| in_scope_fragment(query.scope, f))
            .map(|f| FragmentCandidate {
                id: f.id.clone(),
                project_id: f.project_id.clone(),
                owner_id: f.owner_id.clone(),
                title: f.title.clone(),
                content: f.content.clone(),
                score: cosine_similarity(query.vector, &f.embedding) as f64,
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(query.num_candidates.max(query.limit));
        candidates.truncate(query.limit);
        Ok(candidates)
    }

    async fn insert_task(&self, scope: &Scope, task: NewTask) -> Result<Task> {
        let now = now_ts();
        let stored = Task {
            id: Uuid::new_v4().to_string(),
            project_id: scope.project_id.clone(),
            owner_id: scope.owner_id.clone(),
            title: task.title,
            description: task.description,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        write(&self.tasks)?.push(stored.clone());
        Ok(stored)
    }

    async fn get_task(&self, scope: &Scope, id: &str) -> Result<Option<Task>> {
        Ok(read(&self.tasks)?
            .iter()
            .find(|t| t.id == id && in_scope_task(scope, t))
            .cloned())
    }

    async fn update_task(
        &self,
        scope: &Scope,
        id: &str,
        patch: &TaskPatch,
    ) -> Result<Option<Task>> {
        let mut tasks = write(&self.tasks)?;
        let Some(task) = tasks
            .iter_mut()
            .find(|t| t.id == id && in_scope_task(scope, t))
        else {
            return Ok(None);
        };
        patch.apply(task);
        task.updated_at = now_ts();
        Ok(Some(task.clone()))
    }

    async fn delete_task(&self, scope: &Scope, id: &str) -> Result<bool> {
        let mut tasks = write(&self.tasks)?;
        let before = tasks.len();
        tasks.retain(|t| !(t.id == id && in_scope_task(scope, t)));
        Ok(tasks.len() < before)
    }

    async fn list_tasks(&self, scope: &Scope) -> Result<Vec<Task>> {
        Ok(read(&self.tasks)?
            .iter()
            .rev()
            .filter(|t| in_scope_task(scope, t))
            .cloned()
            .collect())
    }

    async fn get_conversation(&self, scope: &Scope, id: &str) -> Result<Option<Conversation>> {
        Ok(read(&self.conversations)?
            .iter()
            .find(|c| c.id == id && in_scope_conversation(scope, c))
            .cloned())
    }

    async fn conversation_exists(&self, project_id: &str, id: &str) -> Result<bool> {
        Ok(read(&self.conversations)?
            .iter()
            .any(|c| c.id == id && c.project_id == project_id))
    }

    async fn append_turns(
        &self,
        scope: &Scope,
        id: &str,
        title: &str,
        turns: &[Turn],
    ) -> Result<Conversation> {
        let mut conversations = write(&self.conversations)?;
        let now = now_ts();

        if let Some(existing) = conversations
            .iter_mut()
            .find(|c| c.id == id && in_scope_conversation(scope, c))
        {
            existing.messages.extend_from_slice(turns);
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        if conversations
            .iter()
            .any(|c| c.id == id && c.project_id == scope.project_id)
        {
            bail!("conversation {} belongs to another owner", id);
        }

        let conversation = Conversation {
            id: id.to_string(),
            project_id: scope.project_id.clone(),
            owner_id: scope.owner_id.clone(),
            title: title.to_string(),
            messages: turns.to_vec(),
            created_at: now,
            updated_at: now,
        };
        conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn rename_conversation(&self, scope: &Scope, id: &str, title: &str) -> Result<bool> {
        let mut conversations = write(&self.conversations)?;
        match conversations
            .iter_mut()
            .find(|c| c.id == id && in_scope_conversation(scope, c))
        {
            Some(conversation) => {
                conversation.title = title.to_string();
                conversation.updated_at = now_ts();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_conversation(&self, scope: &Scope, id: &str) -> Result<bool> {
        let mut conversations = write(&self.conversations)?;
        let before = conversations.len();
        conversations.retain(|c| !(c.id == id && in_scope_conversation(scope, c)));
        Ok(conversations.len() < before)
    }

    async fn list_conversations(&self, scope: &Scope) -> Result<Vec<ConversationSummary>> {
        Ok(read(&self.conversations)?
            .iter()
            .rev()
            .filter(|c| in_scope_conversation(scope, c))
            .map(|c| ConversationSummary {
                id: c.id.clone(),
                title: c.title.clone(),
                created_at: c.created_at,
            })
            .collect())
    }
}
