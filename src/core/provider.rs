//! Provider traits - Abstract interfaces for the pipeline's model-backed collaborators
//!
//! This module defines the traits the pipeline calls without knowing the
//! backend behind them:
//! - `Embedder`: text to vector, used for cache fingerprints and reranking
//! - `Generator`: the answer-writing language model
//! - `QueryClassifier`: the guardrail that labels a question before routing
//!
//! Every trait is object-safe so the pipeline can hold `Arc<dyn ...>` handles
//! and tests can substitute in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::citation::Citation;
use super::types::{QueryClass, RankedPassage, Turn};
use crate::error::Result;

/// Text embedding backend
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts; the default calls `embed` sequentially
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Vector dimensions
    fn dimensions(&self) -> usize;
}

/// Input handed to the answer generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The user's question, untransformed
    pub question: String,
    /// Top passages, best first
    pub ranked_passages: Vec<RankedPassage>,
    /// Short-term context, most recent first
    pub recent_turns: Vec<Turn>,
    /// Retrieval reached the confidence threshold
    pub confidence_flag: bool,
}

/// Generator output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Answer text
    pub answer_text: String,
    /// Citations the answer relies on
    pub used_citations: Vec<Citation>,
}

/// Answer-writing language model
#[async_trait]
pub trait Generator: Send + Sync {
    /// Write an answer grounded in the ranked passages
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse>;
}

/// Guardrail classifier
#[async_trait]
pub trait QueryClassifier: Send + Sync {
    /// Label raw user text
    async fn classify(&self, text: &str) -> Result<QueryClass>;
}
