//! # Knowledge Desk Core
//!
//! Runtime-independent logic for Knowledge Desk: data models, the
//! overlap-preserving chunker, the storage abstraction, scoped retrieval,
//! the closed action registry, and the LLM boundary types.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Concrete
//! embedding providers, the Anthropic client, SQLite persistence, and the
//! orchestration loops live in the `knowledge-desk` crate.

pub mod actions;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod models;
pub mod retrieve;
pub mod store;

pub use error::{Error, Result};
