//! Source adapter trait
//!
//! Every retrieval backend (vector index, web search, knowledge graph)
//! implements [`SourceAdapter`]. Adapters normalize their results into
//! [`Passage`]s before returning; nothing backend-specific crosses this seam.

use async_trait::async_trait;

use super::types::{Passage, QueryVariant, SourceKind};
use crate::error::Result;

/// Uniform retrieval contract
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Which backend this is
    fn kind(&self) -> SourceKind;

    /// Search with all query variants, returning at most `top_k` passages.
    ///
    /// An empty `Ok` means the backend answered with nothing. `Err` signals
    /// an adapter-level fault; the coordinator treats it as empty and moves on.
    async fn search(&self, variants: &[QueryVariant], top_k: usize) -> Result<Vec<Passage>>;
}
