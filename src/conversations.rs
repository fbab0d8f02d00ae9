//! Conversation listing and housekeeping. Turns are only ever appended by
//! the orchestrator.

use knowledge_desk_core::error::require;
use knowledge_desk_core::models::{Conversation, ConversationSummary, Scope};
use knowledge_desk_core::store::Store;
use knowledge_desk_core::{Error, Result};
use tracing::info;

/// Conversations in scope, newest first.
pub async fn list_conversations(
    store: &dyn Store,
    scope: &Scope,
) -> Result<Vec<ConversationSummary>> {
    require("project_id", &scope.project_id)?;
    Ok(store.list_conversations(scope).await?)
}

pub async fn get_conversation(store: &dyn Store, scope: &Scope, id: &str) -> Result<Conversation> {
    require("conversation_id", id)?;
    store
        .get_conversation(scope, id)
        .await?
        .ok_or_else(|| Error::not_found("conversation", id))
}

/// Set a new title; it is trimmed and must not be empty.
pub async fn rename_conversation(
    store: &dyn Store,
    scope: &Scope,
    id: &str,
    title: &str,
) -> Result<()> {
    require("conversation_id", id)?;
    let title = title.trim();
    require("title", title)?;
    if !store.rename_conversation(scope, id, title).await? {
        return Err(Error::not_found("conversation", id));
    }
    info!(project_id = %scope.project_id, conversation_id = %id, "renamed conversation");
    Ok(())
}

pub async fn delete_conversation(store: &dyn Store, scope: &Scope, id: &str) -> Result<()> {
    require("conversation_id", id)?;
    if !store.delete_conversation(scope, id).await? {
        return Err(Error::not_found("conversation", id));
    }
    info!(project_id = %scope.project_id, conversation_id = %id, "deleted conversation");
    Ok(())
}
