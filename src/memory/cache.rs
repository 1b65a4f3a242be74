//! In-process caching for embeddings
//!
//! Uses moka async cache (Send + Sync, TTL-based eviction).
//! Paraphrase-heavy traffic embeds the same question text many times per
//! session (cache lookup, reranking, cache write), so embeddings are memoized.

use async_trait::async_trait;
use moka::future::Cache;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::core::Embedder;
use crate::error::Result;

/// Cache key helper: hash a string to u64
pub(crate) fn hash_key(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// Embedder decorator that memoizes vectors by text
#[derive(Clone)]
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    /// hash(text) -> embedding
    embeddings: Cache<u64, Arc<Vec<f32>>>,
}

impl CachedEmbedder {
    /// Wrap an embedder with a cache of `capacity` vectors
    pub fn new(inner: Arc<dyn Embedder>, capacity: u64) -> Self {
        CachedEmbedder {
            inner,
            embeddings: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(Duration::from_secs(30 * 60)) // 30 min TTL
                .build(),
        }
    }

    /// Number of cached vectors (approximate until pending tasks run)
    pub fn cached(&self) -> u64 {
        self.embeddings.entry_count()
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = hash_key(text.trim());
        if let Some(hit) = self.embeddings.get(&key).await {
            debug!("Embedding cache hit");
            return Ok(hit.as_ref().clone());
        }

        let vector = self.inner.embed(text).await?;
        self.embeddings.insert(key, Arc::new(vector.clone())).await;
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0, 0.0])
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    #[tokio::test]
    async fn test_embedding_cache() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(inner.clone(), 100);

        let first = cached.embed("mức phạt").await.unwrap();
        let second = cached.embed("mức phạt ").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        cached.embed("nồng độ cồn").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.dimensions(), 3);
    }
}
