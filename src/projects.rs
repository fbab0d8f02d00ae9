//! Projects: the partition every other record is scoped to.

use knowledge_desk_core::error::require;
use knowledge_desk_core::models::Project;
use knowledge_desk_core::store::Store;
use knowledge_desk_core::{Error, Result};
use tracing::info;

pub async fn create_project(store: &dyn Store, title: &str, category: &str) -> Result<Project> {
    require("title", title)?;
    let project = store
        .create_project(title.trim(), category.trim())
        .await?;
    info!(project_id = %project.id, "created project");
    Ok(project)
}

pub async fn get_project(store: &dyn Store, id: &str) -> Result<Project> {
    require("id", id)?;
    store
        .get_project(id)
        .await?
        .ok_or_else(|| Error::not_found("project", id))
}

/// All projects, newest first.
pub async fn list_projects(store: &dyn Store) -> Result<Vec<Project>> {
    Ok(store.list_projects().await?)
}
