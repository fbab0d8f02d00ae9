//! Scoped retrieval of knowledge fragments.
//!
//! The retriever assembles a [`VectorQuery`] for the caller's scope, hands
//! the nearest-neighbour search to the [`Store`], and shapes the result.
//! It does no ranking math of its own; the backend's similarity score is
//! trusted as-is.
//!
//! Scope is a correctness invariant: any candidate the backend returns from
//! outside the requested scope is dropped and logged.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::Scope;
use crate::store::{Store, VectorQuery};

pub const DEFAULT_NUM_CANDIDATES: usize = 50;
pub const DEFAULT_LIMIT: usize = 5;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalParams {
    /// Candidate pool the index may consider.
    pub num_candidates: usize,
    /// Maximum fragments returned (`k`).
    pub limit: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            num_candidates: DEFAULT_NUM_CANDIDATES,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// A retrieved fragment with its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredFragment {
    pub id: String,
    pub title: String,
    pub content: String,
    pub score: f64,
}

/// Return up to `params.limit` fragments most similar to `query_vec`
/// within `scope`, highest score first.
pub async fn retrieve<S: Store + ?Sized>(
    store: &S,
    query_vec: &[f32],
    scope: &Scope,
    params: &RetrievalParams,
) -> Result<Vec<ScoredFragment>> {
    if params.limit == 0 {
        return Err(Error::Validation(
            "retrieval limit must be at least 1".to_string(),
        ));
    }
    if query_vec.is_empty() {
        return Err(Error::Validation("query embedding is empty".to_string()));
    }

    let query = VectorQuery {
        vector: query_vec,
        scope,
        num_candidates: params.num_candidates.max(params.limit),
        limit: params.limit,
    };
    let candidates = store.vector_search(&query).await?;
    let returned = candidates.len();

    let mut results: Vec<ScoredFragment> = Vec::with_capacity(returned);
    for candidate in candidates {
        if !scope.admits(&candidate.project_id, candidate.owner_id.as_deref()) {
            warn!(
                fragment_id = %candidate.id,
                fragment_project = %candidate.project_id,
                project_id = %scope.project_id,
                "vector search returned a fragment outside the requested scope; dropping it"
            );
            continue;
        }
        results.push(ScoredFragment {
            id: candidate.id,
            title: candidate.title,
            content: candidate.content,
            score: candidate.score,
        });
    }
    results.truncate(params.limit);

    debug!(
        project_id = %scope.project_id,
        returned,
        kept = results.len(),
        "retrieved knowledge fragments"
    );
    Ok(results)
}
