//! Direct task management.

use knowledge_desk_core::error::require;
use knowledge_desk_core::models::{NewTask, Scope, Task, TaskPatch};
use knowledge_desk_core::store::Store;
use knowledge_desk_core::{Error, Result};
use tracing::info;

pub async fn add_task(
    store: &dyn Store,
    scope: &Scope,
    title: &str,
    description: &str,
) -> Result<Task> {
    require("project_id", &scope.project_id)?;
    require("title", title)?;
    let task = store
        .insert_task(
            scope,
            NewTask {
                title: title.trim().to_string(),
                description: description.to_string(),
            },
        )
        .await?;
    info!(project_id = %scope.project_id, task_id = %task.id, "added task");
    Ok(task)
}

pub async fn get_task(store: &dyn Store, scope: &Scope, id: &str) -> Result<Task> {
    require("id", id)?;
    store
        .get_task(scope, id)
        .await?
        .ok_or_else(|| Error::not_found("task", id))
}

/// Apply a partial edit. An empty patch or an empty title is rejected.
pub async fn edit_task(
    store: &dyn Store,
    scope: &Scope,
    id: &str,
    patch: &TaskPatch,
) -> Result<Task> {
    require("id", id)?;
    if patch.is_empty() {
        return Err(Error::Validation("task patch has no fields".to_string()));
    }
    if let Some(title) = &patch.title {
        require("title", title)?;
    }
    let task = store
        .update_task(scope, id, patch)
        .await?
        .ok_or_else(|| Error::not_found("task", id))?;
    info!(project_id = %scope.project_id, task_id = %id, status = %task.status, "edited task");
    Ok(task)
}

pub async fn delete_task(store: &dyn Store, scope: &Scope, id: &str) -> Result<()> {
    require("id", id)?;
    if !store.delete_task(scope, id).await? {
        return Err(Error::not_found("task", id));
    }
    info!(project_id = %scope.project_id, task_id = %id, "deleted task");
    Ok(())
}

/// Tasks in scope, newest first.
pub async fn list_tasks(store: &dyn Store, scope: &Scope) -> Result<Vec<Task>> {
    require("project_id", &scope.project_id)?;
    Ok(store.list_tasks(scope).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_desk_core::models::TaskStatus;
    use knowledge_desk_core::store::memory::InMemoryStore;

    #[tokio::test]
    async fn test_task_lifecycle() {
        let store = InMemoryStore::new();
        let scope = Scope::project("p1");

        let task = add_task(&store, &scope, " Write release notes ", "for v2")
            .await
            .unwrap();
        assert_eq!(task.title, "Write release notes");
        assert_eq!(task.status, TaskStatus::Pending);

        let patch = TaskPatch {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        };
        let edited = edit_task(&store, &scope, &task.id, &patch).await.unwrap();
        assert_eq!(edited.status, TaskStatus::InProgress);
        assert_eq!(edited.description, "for v2");

        delete_task(&store, &scope, &task.id).await.unwrap();
        let err = get_task(&store, &scope, &task.id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_validation_happens_first() {
        let store = InMemoryStore::new();
        let scope = Scope::project("p1");
        assert!(matches!(
            add_task(&store, &scope, "  ", "").await.unwrap_err(),
            Error::Validation(_)
        ));
        assert!(matches!(
            edit_task(&store, &scope, "t1", &TaskPatch::default())
                .await
                .unwrap_err(),
            Error::Validation(_)
        ));
        assert!(delete_task(&store, &scope, "missing")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_tasks_are_scoped() {
        let store = InMemoryStore::new();
        let task = add_task(&store, &Scope::project("p1"), "Mine", "")
            .await
            .unwrap();
        assert!(get_task(&store, &Scope::project("p2"), &task.id)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(list_tasks(&store, &Scope::project("p2"))
            .await
            .unwrap()
            .is_empty());
    }
}
