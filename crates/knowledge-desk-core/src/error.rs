//! Error kinds surfaced by the orchestration core.
//!
//! Adapters (stores, embedders, LLM clients) report failures as
//! [`anyhow::Error`]; the orchestration layer classifies them into the
//! variants below before returning to the caller.

use std::fmt::Display;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A required field was missing or malformed. Raised before any
    /// network call is attempted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The embedding or LLM service failed.
    #[error("{service} service error: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The model kept requesting tools past the configured iteration cap.
    #[error("tool loop exceeded {max_iterations} model calls without a final answer")]
    ToolLoopExceeded { max_iterations: usize },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl Error {
    pub fn missing(field: &str) -> Self {
        Error::Validation(format!("missing required field: {}", field))
    }

    pub fn upstream(service: &'static str, err: impl Display) -> Self {
        Error::Upstream {
            service,
            message: err.to_string(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Returns true for the 404-equivalent kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Fail with [`Error::Validation`] when `value` is empty or whitespace.
pub fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::missing(field));
    }
    Ok(())
}
