//! Local embedding generation via fastembed
//!
//! Uses the multilingual-e5-small model (384 dimensions, ~90MB), which
//! handles Vietnamese. Model auto-downloads on first use.

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::Embedder;
use crate::error::{Error, Result};

/// e5 models expect a role prefix on every input
const QUERY_PREFIX: &str = "query: ";

/// Local embedding service wrapping fastembed
#[derive(Clone)]
pub struct EmbeddingService {
    model: Arc<TextEmbedding>,
}

impl EmbeddingService {
    /// Create a new embedding service with multilingual-e5-small
    pub fn new() -> Result<Self> {
        Self::with_cache_dir(crate::config::state_dir().join("models"))
    }

    /// Create the service storing model files under `cache_dir`
    pub fn with_cache_dir(cache_dir: PathBuf) -> Result<Self> {
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::MultilingualE5Small)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(true),
        )
        .map_err(|e| Error::Embedding(format!("Failed to init embedding model: {}", e)))?;

        Ok(EmbeddingService {
            model: Arc::new(model),
        })
    }

    /// Generate embeddings for multiple texts
    async fn embed_many(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let texts: Vec<String> = texts
            .into_iter()
            .map(|t| format!("{}{}", QUERY_PREFIX, t.trim()))
            .collect();

        tokio::task::spawn_blocking(move || {
            model
                .embed(texts, None)
                .map_err(|e| Error::Embedding(format!("Batch embedding error: {}", e)))
        })
        .await
        .map_err(|e| Error::Internal(format!("Embedding task join error: {}", e)))?
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_many(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("No embedding returned".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_many(texts.to_vec()).await
    }

    /// 384 for multilingual-e5-small
    fn dimensions(&self) -> usize {
        384
    }
}
