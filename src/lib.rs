//! # Knowledge Desk
//!
//! Ask natural-language questions against a project's private knowledge
//! base and task list. A tool-calling LLM answers inside a persisted
//! multi-turn conversation and may act on the project (create tasks, save
//! knowledge, list tasks) along the way.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌──────────┐
//! │  Document  │──▶│  Chunker │──▶│ Embedder │──▶ Store (fragments)
//! └────────────┘   └──────────┘   └──────────┘
//!
//! ┌────────────┐   ┌──────────┐   ┌───────────┐   ┌─────────────┐
//! │  Question  │──▶│ Embedder │──▶│ Retriever │──▶│ Orchestrator│◀─▶ LLM
//! └────────────┘   └──────────┘   └───────────┘   └──────┬──────┘
//!                                                        │ tool calls
//!                                                        ▼
//!                                                 Action Registry ──▶ Store
//! ```
//!
//! The pure pieces (chunking, retrieval contract, actions, store trait)
//! live in `knowledge-desk-core`; this crate adds configuration, SQLite
//! persistence, HTTP providers, and the orchestration loops.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite `Store` implementation |
//! | [`embedding`] | Voyage / OpenAI / Ollama embedders |
//! | [`llm`] | Anthropic Messages client |
//! | [`limits`] | Iteration cap, cancellation, deadline, conversation locks |
//! | [`prompt`] | System prompt and transcript rendering |
//! | [`tool_loop`] | The shared tool-calling loop |
//! | [`chat`] | Answering questions in a conversation |
//! | [`extract`] | Distilling a conversation into knowledge entries |
//! | [`knowledge`] | Entries, document and PDF ingestion, file groups |
//! | [`extract_pdf`] | PDF text extraction |
//! | [`tasks`] | Task management |
//! | [`conversations`] | Conversation listing, rename, delete |
//! | [`projects`] | Project management |
//! | [`desk`] | Wiring from configuration |

pub mod chat;
pub mod config;
pub mod conversations;
pub mod db;
pub mod desk;
pub mod embedding;
pub mod extract;
pub mod extract_pdf;
pub mod knowledge;
pub mod limits;
pub mod llm;
pub mod migrate;
pub mod projects;
pub mod prompt;
pub mod sqlite_store;
pub mod tasks;
pub mod tool_loop;

pub use knowledge_desk_core::{Error, Result};
