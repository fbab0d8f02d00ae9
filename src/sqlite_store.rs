//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation onto the schema created by
//! [`migrate::apply`](crate::migrate::apply). Scope filtering happens in
//! SQL: every fragment, task and conversation query carries
//! `project_id = ? AND (? IS NULL OR owner_id = ?)`.
//!
//! Vector search is brute-force cosine similarity over the scope's
//! fragment embeddings, which are stored as little-endian `f32` BLOBs.

use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use knowledge_desk_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use knowledge_desk_core::models::{
    content_hash, now_ts, Conversation, ConversationSummary, FileGroup, Fragment, FragmentUpdate,
    NewFragment, NewTask, Project, Role, Scope, Task, TaskPatch, TaskStatus, Turn,
};
use knowledge_desk_core::store::{FragmentCandidate, Store, VectorQuery};

const SCOPE_FILTER: &str = "project_id = ? AND (? IS NULL OR owner_id = ?)";

const FRAGMENT_COLUMNS: &str = "id, project_id, owner_id, title, content, embedding, group_id, \
                                source_name, chunk_index, content_hash, created_at, updated_at";

const TASK_COLUMNS: &str =
    "id, project_id, owner_id, title, description, status, created_at, updated_at";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn fragment_from_row(row: &SqliteRow) -> Fragment {
    let blob: Vec<u8> = row.get("embedding");
    let chunk_index: Option<i64> = row.get("chunk_index");
    Fragment {
        id: row.get("id"),
        project_id: row.get("project_id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        content: row.get("content"),
        embedding: blob_to_vec(&blob),
        group_id: row.get("group_id"),
        source_name: row.get("source_name"),
        chunk_index: chunk_index.map(|i| i as usize),
        content_hash: row.get("content_hash"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn task_from_row(row: &SqliteRow) -> Result<Task> {
    let status: String = row.get("status");
    Ok(Task {
        id: row.get("id"),
        project_id: row.get("project_id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        description: row.get("description"),
        status: TaskStatus::from_str(&status).map_err(|e| anyhow!(e))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_project(&self, title: &str, category: &str) -> Result<Project> {
        let now = now_ts();
        let project = Project {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            category: category.to_string(),
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO projects (id, title, category, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&project.id)
        .bind(&project.title)
        .bind(&project.category)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(project)
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query(
            "SELECT id, title, category, created_at, updated_at FROM projects WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Project {
            id: r.get("id"),
            title: r.get("title"),
            category: r.get("category"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT id, title, category, created_at, updated_at FROM projects \
             ORDER BY created_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| Project {
                id: r.get("id"),
                title: r.get("title"),
                category: r.get("category"),
                created_at: r.get("created_at"),
                updated_at: r.get("updated_at"),
            })
            .collect())
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

        sqlx::query(&format!(
            "INSERT INTO fragments ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            FRAGMENT_COLUMNS
        ))
        .bind(&stored.id)
        .bind(&stored.project_id)
        .bind(&stored.owner_id)
        .bind(&stored.title)
        .bind(&stored.content)
        .bind(vec_to_blob(&stored.embedding))
        .bind(&stored.group_id)
        .bind(&stored.source_name)
        .bind(stored.chunk_index.map(|i| i as i64))
        .bind(&stored.content_hash)
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn get_fragment(&self, scope: &Scope, id: &str) -> Result<Option<Fragment>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM fragments WHERE id = ? AND {}",
            FRAGMENT_COLUMNS, SCOPE_FILTER
        ))
        .bind(id)
        .bind(&scope.project_id)
        .bind(&scope.owner_id)
        .bind(&scope.owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(fragment_from_row))
    }

    async fn update_fragment(
        &self,
        scope: &Scope,
        id: &str,
        update: FragmentUpdate,
    ) -> Result<Option<Fragment>> {
        let hash = content_hash(&update.content);
        let now = now_ts();

        let result = match &update.embedding {
            Some(embedding) => {
                sqlx::query(&format!(
                    "UPDATE fragments SET title = ?, content = ?, content_hash = ?, embedding = ?, \
                     updated_at = ? WHERE id = ? AND {}",
                    SCOPE_FILTER
                ))
                .bind(&update.title)
                .bind(&update.content)
                .bind(&hash)
                .bind(vec_to_blob(embedding))
                .bind(now)
                .bind(id)
                .bind(&scope.project_id)
                .bind(&scope.owner_id)
                .bind(&scope.owner_id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "UPDATE fragments SET title = ?, content = ?, content_hash = ?, updated_at = ? \
                     WHERE id = ? AND {}",
                    SCOPE_FILTER
                ))
                .bind(&update.title)
                .bind(&update.content)
                .bind(&hash)
                .bind(now)
                .bind(id)
                .bind(&scope.project_id)
                .bind(&scope.owner_id)
                .bind(&scope.owner_id)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_fragment(scope, id).await
    }

    async fn delete_fragment(&self, scope: &Scope, id: &str) -> Result<bool> {
        let result = sqlx::query(&format!(
            "DELETE FROM fragments WHERE id = ? AND {}",
            SCOPE_FILTER
        ))
        .bind(id)
        .bind(&scope.project_id)
        .bind(&scope.owner_id)
        .bind(&scope.owner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_fragment_group(&self, scope: &Scope, group_id: &str) -> Result<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM fragments WHERE group_id = ? AND {}",
            SCOPE_FILTER
        ))
        .bind(group_id)
        .bind(&scope.project_id)
        .bind(&scope.owner_id)
        .bind(&scope.owner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_standalone_fragments(&self, scope: &Scope) -> Result<Vec<Fragment>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM fragments WHERE group_id IS NULL AND {} \
             ORDER BY created_at DESC, rowid DESC",
            FRAGMENT_COLUMNS, SCOPE_FILTER
        ))
        .bind(&scope.project_id)
        .bind(&scope.owner_id)
        .bind(&scope.owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(fragment_from_row).collect())
    }

    async fn list_file_groups(&self, scope: &Scope) -> Result<Vec<FileGroup>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT group_id,
                   MIN(source_name) AS source_name,
                   COUNT(*) AS chunk_count,
                   MIN(created_at) AS created_at
            FROM fragments
            WHERE group_id IS NOT NULL AND {}
            GROUP BY group_id
            ORDER BY MIN(created_at) DESC, MIN(rowid) DESC
            "#,
            SCOPE_FILTER
        ))
        .bind(&scope.project_id)
        .bind(&scope.owner_id)
        .bind(&scope.owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let chunk_count: i64 = row.get("chunk_count");
                FileGroup {
                    group_id: row.get("group_id"),
                    source_name: row.get("source_name"),
                    chunk_count: chunk_count as usize,
                    created_at: row.get("created_at"),
                }
            })
            .collect())
    }

    /// Brute-force cosine over every fragment in scope. The whole scope is
    /// scanned, so `num_candidates` never narrows the pool here; only
    /// `limit` applies.
    async fn vector_search(&self, query: &VectorQuery<'_>) -> Result<Vec<FragmentCandidate>> {
        let rows = sqlx::query(&format!(
            "SELECT id, project_id, owner_id, title, content, embedding FROM fragments WHERE {}",
            SCOPE_FILTER
        ))
        .bind(&query.scope.project_id)
        .bind(&query.scope.owner_id)
        .bind(&query.scope.owner_id)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<FragmentCandidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                FragmentCandidate {
                    id: row.get("id"),
                    project_id: row.get("project_id"),
                    owner_id: row.get("owner_id"),
                    title: row.get("title"),
                    content: row.get("content"),
                    score: cosine_similarity(query.vector, &vec) as f64,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
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

        sqlx::query(&format!(
            "INSERT INTO tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            TASK_COLUMNS
        ))
        .bind(&stored.id)
        .bind(&stored.project_id)
        .bind(&stored.owner_id)
        .bind(&stored.title)
        .bind(&stored.description)
        .bind(stored.status.as_str())
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn get_task(&self, scope: &Scope, id: &str) -> Result<Option<Task>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE id = ? AND {}",
            TASK_COLUMNS, SCOPE_FILTER
        ))
        .bind(id)
        .bind(&scope.project_id)
        .bind(&scope.owner_id)
        .bind(&scope.owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn update_task(
        &self,
        scope: &Scope,
        id: &str,
        patch: &TaskPatch,
    ) -> Result<Option<Task>> {
        let Some(mut task) = self.get_task(scope, id).await? else {
            return Ok(None);
        };
        patch.apply(&mut task);
        task.updated_at = now_ts();

        sqlx::query(&format!(
            "UPDATE tasks SET title = ?, description = ?, status = ?, updated_at = ? \
             WHERE id = ? AND {}",
            SCOPE_FILTER
        ))
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.updated_at)
        .bind(id)
        .bind(&scope.project_id)
        .bind(&scope.owner_id)
        .bind(&scope.owner_id)
        .execute(&self.pool)
        .await?;

        Ok(Some(task))
    }

    async fn delete_task(&self, scope: &Scope, id: &str) -> Result<bool> {
        let result = sqlx::query(&format!("DELETE FROM tasks WHERE id = ? AND {}", SCOPE_FILTER))
            .bind(id)
            .bind(&scope.project_id)
            .bind(&scope.owner_id)
            .bind(&scope.owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_tasks(&self, scope: &Scope) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE {} ORDER BY created_at DESC, rowid DESC",
            TASK_COLUMNS, SCOPE_FILTER
        ))
        .bind(&scope.project_id)
        .bind(&scope.owner_id)
        .bind(&scope.owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    async fn get_conversation(&self, scope: &Scope, id: &str) -> Result<Option<Conversation>> {
        let Some(header) = sqlx::query(&format!(
            "SELECT id, project_id, owner_id, title, created_at, updated_at \
             FROM conversations WHERE id = ? AND {}",
            SCOPE_FILTER
        ))
        .bind(id)
        .bind(&scope.project_id)
        .bind(&scope.owner_id)
        .bind(&scope.owner_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let turn_rows = sqlx::query(
            "SELECT role, content FROM conversation_turns \
             WHERE project_id = ? AND conversation_id = ? ORDER BY seq ASC",
        )
        .bind(&scope.project_id)
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let messages = turn_rows
            .iter()
            .map(|row| {
                let role: String = row.get("role");
                Ok(Turn {
                    role: Role::from_str(&role).map_err(|e| anyhow!(e))?,
                    content: row.get("content"),
                })
            })
            .collect::<Result<Vec<Turn>>>()?;

        Ok(Some(Conversation {
            id: header.get("id"),
            project_id: header.get("project_id"),
            owner_id: header.get("owner_id"),
            title: header.get("title"),
            messages,
            created_at: header.get("created_at"),
            updated_at: header.get("updated_at"),
        }))
    }

    async fn conversation_exists(&self, project_id: &str, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM conversations WHERE project_id = ? AND id = ?")
            .bind(project_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn append_turns(
        &self,
        scope: &Scope,
        id: &str,
        title: &str,
        turns: &[Turn],
    ) -> Result<Conversation> {
        let now = now_ts();
        let mut tx = self.pool.begin().await?;

        let existing =
            sqlx::query("SELECT owner_id FROM conversations WHERE project_id = ? AND id = ?")
                .bind(&scope.project_id)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        match existing {
            Some(row) => {
                let owner_id: Option<String> = row.get("owner_id");
                if !scope.admits(&scope.project_id, owner_id.as_deref()) {
                    bail!("conversation {} belongs to another owner", id);
                }
                sqlx::query("UPDATE conversations SET updated_at = ? WHERE project_id = ? AND id = ?")
                    .bind(now)
                    .bind(&scope.project_id)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO conversations (project_id, id, owner_id, title, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&scope.project_id)
                .bind(id)
                .bind(&scope.owner_id)
                .bind(title)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        let next_seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq) + 1, 0) FROM conversation_turns \
             WHERE project_id = ? AND conversation_id = ?",
        )
        .bind(&scope.project_id)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        for (offset, turn) in turns.iter().enumerate() {
            sqlx::query(
                "INSERT INTO conversation_turns (project_id, conversation_id, seq, role, content) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&scope.project_id)
            .bind(id)
            .bind(next_seq + offset as i64)
            .bind(turn.role.as_str())
            .bind(&turn.content)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_conversation(scope, id)
            .await?
            .ok_or_else(|| anyhow!("conversation {} vanished after append", id))
    }

    async fn rename_conversation(&self, scope: &Scope, id: &str, title: &str) -> Result<bool> {
        let result = sqlx::query(&format!(
            "UPDATE conversations SET title = ?, updated_at = ? WHERE id = ? AND {}",
            SCOPE_FILTER
        ))
        .bind(title)
        .bind(now_ts())
        .bind(id)
        .bind(&scope.project_id)
        .bind(&scope.owner_id)
        .bind(&scope.owner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_conversation(&self, scope: &Scope, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(&format!(
            "DELETE FROM conversations WHERE id = ? AND {}",
            SCOPE_FILTER
        ))
        .bind(id)
        .bind(&scope.project_id)
        .bind(&scope.owner_id)
        .bind(&scope.owner_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            sqlx::query(
                "DELETE FROM conversation_turns WHERE project_id = ? AND conversation_id = ?",
            )
            .bind(&scope.project_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_conversations(&self, scope: &Scope) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT id, title, created_at FROM conversations WHERE {} \
             ORDER BY created_at DESC, rowid DESC",
            SCOPE_FILTER
        ))
        .bind(&scope.project_id)
        .bind(&scope.owner_id)
        .bind(&scope.owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ConversationSummary {
                id: row.get("id"),
                title: row.get("title"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}
