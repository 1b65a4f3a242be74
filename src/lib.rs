//! # LexRAG
//!
//! Retrieval orchestration for Vietnamese legal question answering.
//!
//! ## Features
//!
//! - **Conversational memory:** explicit Turn/Session model with a short-term window and opt-in cross-session recall
//! - **Query transformation:** anaphora and ellipsis resolution against recent turns, with multiple variants on ambiguity
//! - **Fallback chain:** vector index, then live web search, then knowledge graph, stopping at the first sufficient result
//! - **Reranking:** relevance against the original question with a stable total order
//! - **Semantic cache:** nearest-neighbour lookup over query embeddings with citation-driven invalidation

pub mod cache;
pub mod config;
pub mod core;
pub mod database;
pub mod error;
pub mod generation;
pub mod memory;
pub mod pipeline;
pub mod retrieval;

pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{
    open_stores, Degradation, PipelineBuilder, PipelineRequest, PipelineResponse, RetrievalPipeline,
};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
