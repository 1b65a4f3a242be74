//! Core module - Fundamental traits and types for LexRAG
//!
//! This module defines the abstractions that keep the pipeline loosely coupled:
//! - Data model shared by every stage (turns, variants, passages, cache entries)
//! - Citation parsing and canonicalization
//! - Source adapter trait for retrieval backends
//! - Provider traits for embedding, generation and classification
//! - Storage traits for sessions and the semantic cache

pub mod citation;
pub mod provider;
pub mod source;
pub mod storage;
pub mod types;

// Re-export core traits for convenient access
pub use citation::Citation;
pub use provider::{Embedder, GenerationRequest, GenerationResponse, Generator, QueryClassifier};
pub use source::SourceAdapter;
pub use storage::{CacheBackend, SessionBackend};
pub use types::*;
