//! Knowledge base management: direct entries and ingested files.
//!
//! Direct entries are standalone fragments. Ingested documents are
//! chunked, embedded chunk by chunk, and stored as one file group that
//! shares a `group_id`:
//!
//! ```text
//! Document ──▶ chunk_text ──▶ embed(chunk) ──▶ insert_fragment ─┐
//!                                 ▲                             │
//!                                 └──────── next chunk ◀────────┘
//! ```
//!
//! Ingestion is compensating: if any chunk fails to embed or store, the
//! fragments already written for that document are deleted before the
//! error is returned.

use knowledge_desk_core::chunk::{chunk_text, oversized_chunks, ChunkOptions};
use knowledge_desk_core::embedding::Embedder;
use knowledge_desk_core::error::require;
use knowledge_desk_core::models::{
    content_hash, Document, FileGroup, Fragment, FragmentUpdate, NewFragment, Scope,
};
use knowledge_desk_core::store::Store;
use knowledge_desk_core::{Error, Result};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::extract_pdf::{parse_pdf_base64, PdfText};

/// Result of ingesting one document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub group_id: String,
    pub source_name: String,
    /// Fragment ids in chunk order.
    pub fragment_ids: Vec<String>,
    pub chunk_count: usize,
    /// Indices of chunks longer than the configured maximum.
    pub oversized: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PdfIngestReport {
    pub num_pages: usize,
    #[serde(flatten)]
    pub ingest: IngestReport,
}

/// Standalone entries and file groups of a scope, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeListing {
    pub entries: Vec<Fragment>,
    pub files: Vec<FileGroup>,
}

async fn embed(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(text)
        .await
        .map_err(|e| Error::upstream("embedding", e))
}

/// Create a standalone entry.
pub async fn add_entry(
    store: &dyn Store,
    embedder: &dyn Embedder,
    scope: &Scope,
    title: &str,
    content: &str,
) -> Result<Fragment> {
    require("project_id", &scope.project_id)?;
    require("title", title)?;
    require("content", content)?;

    let embedding = embed(embedder, content).await?;
    let fragment = store
        .insert_fragment(
            scope,
            NewFragment {
                title: title.to_string(),
                content: content.to_string(),
                embedding,
                ..Default::default()
            },
        )
        .await?;
    info!(project_id = %scope.project_id, fragment_id = %fragment.id, "added knowledge entry");
    Ok(fragment)
}

pub async fn get_entry(store: &dyn Store, scope: &Scope, id: &str) -> Result<Fragment> {
    require("id", id)?;
    store
        .get_fragment(scope, id)
        .await?
        .ok_or_else(|| Error::not_found("fragment", id))
}

/// Replace an entry's title and content, re-embedding only when the
/// content changed.
pub async fn edit_entry(
    store: &dyn Store,
    embedder: &dyn Embedder,
    scope: &Scope,
    id: &str,
    title: &str,
    content: &str,
) -> Result<Fragment> {
    require("id", id)?;
    require("title", title)?;
    require("content", content)?;

    let current = get_entry(store, scope, id).await?;
    let embedding = if current.content_hash == content_hash(content) {
        None
    } else {
        Some(embed(embedder, content).await?)
    };
    let reembedded = embedding.is_some();

    let updated = store
        .update_fragment(
            scope,
            id,
            FragmentUpdate {
                title: title.to_string(),
                content: content.to_string(),
                embedding,
            },
        )
        .await?
        .ok_or_else(|| Error::not_found("fragment", id))?;
    info!(project_id = %scope.project_id, fragment_id = %id, reembedded, "edited knowledge entry");
    Ok(updated)
}

pub async fn delete_entry(store: &dyn Store, scope: &Scope, id: &str) -> Result<()> {
    require("id", id)?;
    if !store.delete_fragment(scope, id).await? {
        return Err(Error::not_found("fragment", id));
    }
    info!(project_id = %scope.project_id, fragment_id = %id, "deleted knowledge entry");
    Ok(())
}

/// Chunk, embed and store `document` as one file group.
///
/// Chunk titles are `name (part i/n)` when the document yields more than
/// one chunk, otherwise the document name. A whitespace-only document
/// yields an empty report.
pub async fn ingest_document(
    store: &dyn Store,
    embedder: &dyn Embedder,
    scope: &Scope,
    document: &Document,
    options: &ChunkOptions,
) -> Result<IngestReport> {
    require("project_id", &scope.project_id)?;
    require("name", &document.name)?;
    if document.text.is_empty() {
        return Err(Error::missing("text"));
    }

    let group_id = Uuid::new_v4().to_string();
    let chunks = chunk_text(&document.text, options);
    let oversized = oversized_chunks(&chunks, options.max_chunk_size);
    if !oversized.is_empty() {
        warn!(
            project_id = %scope.project_id,
            document = %document.name,
            max_chunk_size = options.max_chunk_size,
            oversized = ?oversized,
            "chunks exceed the maximum size and were kept whole"
        );
    }

    let total = chunks.len();
    let mut fragment_ids = Vec::with_capacity(total);
    for chunk in &chunks {
        let title = if total > 1 {
            format!("{} (part {}/{})", document.name, chunk.index + 1, total)
        } else {
            document.name.clone()
        };

        let stored = async {
            let embedding = embed(embedder, &chunk.content).await?;
            let fragment = store
                .insert_fragment(
                    scope,
                    NewFragment {
                        title,
                        content: chunk.content.clone(),
                        embedding,
                        group_id: Some(group_id.clone()),
                        source_name: Some(document.name.clone()),
                        chunk_index: Some(chunk.index),
                    },
                )
                .await?;
            Ok::<_, Error>(fragment)
        }
        .await;

        match stored {
            Ok(fragment) => fragment_ids.push(fragment.id),
            Err(e) => {
                compensate(store, scope, &group_id, fragment_ids.len()).await;
                error!(
                    project_id = %scope.project_id,
                    document = %document.name,
                    chunk_index = chunk.index,
                    error = %e,
                    "document ingestion failed"
                );
                return Err(e);
            }
        }
    }

    info!(
        project_id = %scope.project_id,
        document = %document.name,
        group_id = %group_id,
        chunks = total,
        "ingested document"
    );

    Ok(IngestReport {
        group_id,
        source_name: document.name.clone(),
        fragment_ids,
        chunk_count: total,
        oversized,
    })
}

async fn compensate(store: &dyn Store, scope: &Scope, group_id: &str, written: usize) {
    if written == 0 {
        return;
    }
    match store.delete_fragment_group(scope, group_id).await {
        Ok(removed) => warn!(
            project_id = %scope.project_id,
            group_id,
            removed,
            "rolled back partially ingested document"
        ),
        Err(e) => error!(
            project_id = %scope.project_id,
            group_id,
            error = %e,
            "failed to roll back partially ingested document"
        ),
    }
}

/// Extract text from a base64 PDF.
pub fn parse_pdf(payload: &str) -> Result<PdfText> {
    require("pdf", payload)?;
    parse_pdf_base64(payload).map_err(|e| Error::Validation(e.to_string()))
}

/// Extract a base64 PDF and ingest its text as `name`.
pub async fn ingest_pdf(
    store: &dyn Store,
    embedder: &dyn Embedder,
    scope: &Scope,
    name: &str,
    payload: &str,
    options: &ChunkOptions,
) -> Result<PdfIngestReport> {
    let pdf = parse_pdf(payload)?;
    let document = Document {
        name: name.to_string(),
        text: pdf.text,
    };
    let ingest = ingest_document(store, embedder, scope, &document, options).await?;
    Ok(PdfIngestReport {
        num_pages: pdf.num_pages,
        ingest,
    })
}

/// Delete every fragment of an ingested file; returns how many were removed.
pub async fn delete_file(store: &dyn Store, scope: &Scope, group_id: &str) -> Result<u64> {
    require("group_id", group_id)?;
    let removed = store.delete_fragment_group(scope, group_id).await?;
    info!(project_id = %scope.project_id, group_id, removed, "deleted file");
    Ok(removed)
}

pub async fn list_knowledge(store: &dyn Store, scope: &Scope) -> Result<KnowledgeListing> {
    require("project_id", &scope.project_id)?;
    Ok(KnowledgeListing {
        entries: store.list_standalone_fragments(scope).await?,
        files: store.list_file_groups(scope).await?,
    })
}
