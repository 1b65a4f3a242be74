//! Semantic response cache
//!
//! Maps a query embedding to a previously produced answer bundle by
//! nearest-neighbour similarity, so differently worded questions about the
//! same regulation share one entry. Entries citing a document whose status
//! changed are flagged stale and no longer served.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::backend::InMemoryCacheBackend;
use crate::config::CacheConfig;
use crate::core::{CacheBackend, CacheEntry, CacheStats, Citation};
use crate::error::{Error, Result};

/// Outcome of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// A live entry within the similarity threshold
    Hit {
        /// The entry, with the hit already counted
        entry: CacheEntry,
        /// Cosine similarity to the query
        similarity: f32,
    },
    /// The nearest entry matched but cites a changed document
    Stale {
        /// The stale entry
        entry: CacheEntry,
        /// Cosine similarity to the query
        similarity: f32,
    },
    /// Nothing close enough
    Miss,
}

impl CacheLookup {
    /// The servable entry, if this was a hit
    pub fn hit(self) -> Option<CacheEntry> {
        match self {
            CacheLookup::Hit { entry, .. } => Some(entry),
            _ => None,
        }
    }
}

/// Similarity-keyed answer cache
#[derive(Clone)]
pub struct SemanticCache {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
}

impl SemanticCache {
    /// Create a cache over a backend
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        SemanticCache { backend, config }
    }

    /// Create a cache held in process memory
    pub fn in_memory(config: CacheConfig) -> Self {
        let backend = InMemoryCacheBackend::new(config.max_entries, config.ttl);
        Self::new(Arc::new(backend), config)
    }

    /// Cache policy in effect
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn not_before(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.config.ttl)
            .map(|ttl| Utc::now() - ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Find the entry nearest to `query_embedding` within the similarity
    /// threshold. Backend faults surface as `CacheUnavailable`.
    pub async fn lookup(&self, query_embedding: &[f32]) -> Result<CacheLookup> {
        if !self.config.enabled {
            return Ok(CacheLookup::Miss);
        }

        let not_before = self.not_before();
        let live = self
            .backend
            .nearest(query_embedding, not_before, false)
            .await
            .map_err(unavailable)?
            .filter(|(_, similarity)| *similarity >= self.config.similarity_threshold);

        let Some((mut entry, similarity)) = live else {
            // Only report a stale match when no live entry qualifies
            let nearest = self
                .backend
                .nearest(query_embedding, not_before, true)
                .await
                .map_err(unavailable)?;
            return Ok(match nearest {
                Some((entry, similarity)) if entry.stale && similarity >= self.config.similarity_threshold => {
                    info!(
                        "Semantic cache matched stale entry for '{}' (similarity {:.3})",
                        entry.canonical_query, similarity
                    );
                    CacheLookup::Stale { entry, similarity }
                }
                Some((_, similarity)) => {
                    debug!("Semantic cache miss (best similarity {:.3})", similarity);
                    CacheLookup::Miss
                }
                None => {
                    debug!("Semantic cache empty");
                    CacheLookup::Miss
                }
            });
        };

        let now = Utc::now();
        if let Err(e) = self.backend.record_hit(entry.id, now).await {
            warn!("Failed to record cache hit: {}", e);
        } else {
            entry.hit_count += 1;
            entry.last_hit_at = Some(now);
        }

        info!(
            "Semantic cache hit for '{}' (similarity {:.3}, hits {})",
            entry.canonical_query, similarity, entry.hit_count
        );
        Ok(CacheLookup::Hit { entry, similarity })
    }

    /// Store an answer bundle.
    ///
    /// A near-identical neighbour (similarity at or above the merge
    /// threshold) is overwritten in place: last write wins, hit history is kept.
    /// A disabled cache persists nothing and returns the unsaved entry.
    pub async fn store(
        &self,
        fingerprint: Vec<f32>,
        canonical_query: &str,
        answer: &str,
        citations: Vec<Citation>,
    ) -> Result<CacheEntry> {
        if fingerprint.is_empty() {
            return Err(Error::InvalidInput("Empty cache fingerprint".into()));
        }
        if !self.config.enabled {
            return Ok(CacheEntry::new(fingerprint, canonical_query, answer, citations));
        }

        let neighbour = self
            .backend
            .nearest(&fingerprint, self.not_before(), true)
            .await
            .map_err(unavailable)?;

        let entry = match neighbour {
            Some((existing, similarity)) if similarity >= self.config.merge_threshold => {
                debug!(
                    "Merging cache write into '{}' (similarity {:.3})",
                    existing.canonical_query, similarity
                );
                CacheEntry {
                    canonical_query: canonical_query.to_string(),
                    answer_text: answer.to_string(),
                    supporting_citations: citations,
                    created_at: Utc::now(),
                    stale: false,
                    ..existing
                }
            }
            _ => CacheEntry::new(fingerprint, canonical_query, answer, citations),
        };

        self.backend.put(entry.clone()).await.map_err(unavailable)?;

        let pruned = self
            .backend
            .prune(self.not_before(), self.config.max_entries)
            .await
            .map_err(unavailable)?;
        if pruned > 0 {
            debug!("Pruned {} cache entries", pruned);
        }

        Ok(entry)
    }

    /// Flag every entry citing a document under `citation` as stale
    pub async fn invalidate(&self, citation: &Citation) -> Result<u64> {
        let count = self.backend.mark_stale(citation).await.map_err(unavailable)?;
        info!("Invalidated {} cache entries citing {}", count, citation);
        Ok(count)
    }

    /// Aggregate statistics
    pub async fn stats(&self) -> Result<CacheStats> {
        self.backend.stats().await.map_err(unavailable)
    }

    /// Remove every entry
    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await.map_err(unavailable)
    }
}

fn unavailable(err: Error) -> Error {
    match err {
        Error::CacheUnavailable(_) => err,
        other => Error::CacheUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cache() -> SemanticCache {
        SemanticCache::in_memory(CacheConfig::default())
    }

    fn nd100() -> Vec<Citation> {
        vec![Citation::law("Nghị định 100/2019/NĐ-CP").with_article("6").with_clause("2")]
    }

    #[tokio::test]
    async fn test_store_then_lookup_round_trip() {
        let cache = cache();
        let fp = vec![0.2, 0.4, 0.1, 0.9];
        cache
            .store(fp.clone(), "mức phạt không đội mũ bảo hiểm", "Phạt 400.000 - 600.000 đồng", nd100())
            .await
            .unwrap();

        let entry = cache.lookup(&fp).await.unwrap().hit().unwrap();
        assert_eq!(entry.answer_text, "Phạt 400.000 - 600.000 đồng");
        assert_eq!(entry.hit_count, 1);
        assert!(entry.last_hit_at.is_some());
    }

    #[tokio::test]
    async fn test_similarity_threshold() {
        let cache = cache();
        cache
            .store(vec![1.0, 0.0, 0.0], "q", "a", nd100())
            .await
            .unwrap();

        // cos ≈ 0.95: paraphrase hits
        let close = vec![0.95, 0.312, 0.0];
        assert!(matches!(cache.lookup(&close).await.unwrap(), CacheLookup::Hit { .. }));

        // cos = 0.6: different question misses
        let far = vec![0.6, 0.8, 0.0];
        assert_eq!(cache.lookup(&far).await.unwrap(), CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_near_duplicate_store_merges() {
        let cache = cache();
        let first = cache.store(vec![1.0, 0.0], "q1", "old", nd100()).await.unwrap();
        cache.lookup(&[1.0, 0.0]).await.unwrap();
        let second = cache.store(vec![0.999, 0.01], "q2", "new", nd100()).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.hit_count, 1);
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total_entries, 1);
        let hit = cache.lookup(&[1.0, 0.0]).await.unwrap().hit().unwrap();
        assert_eq!(hit.answer_text, "new");
    }

    #[tokio::test]
    async fn test_invalidate_by_law_code() {
        let cache = cache();
        let fp = vec![0.3, 0.3, 0.9];
        cache
            .store(fp.clone(), "không đội mũ bảo hiểm phạt bao nhiêu", "Phạt tiền", nd100())
            .await
            .unwrap();
        cache
            .store(
                vec![0.9, -0.3, 0.0],
                "nồng độ cồn",
                "Phạt nặng",
                vec![Citation::law("Nghị định 168/2024/NĐ-CP").with_article("7")],
            )
            .await
            .unwrap();

        let count = cache.invalidate(&Citation::parse("NĐ 100/2019")).await.unwrap();
        assert_eq!(count, 1);

        // A paraphrase of the invalidated question no longer hits
        let paraphrase = vec![0.31, 0.29, 0.9];
        match cache.lookup(&paraphrase).await.unwrap() {
            CacheLookup::Stale { entry, .. } => assert!(entry.stale),
            other => panic!("expected stale entry, got {:?}", other),
        }

        // The unrelated entry is still served
        assert!(cache.lookup(&[0.9, -0.3, 0.0]).await.unwrap().hit().is_some());

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.stale_entries, 1);
    }

    #[tokio::test]
    async fn test_rewrite_clears_stale_flag() {
        let cache = cache();
        cache.store(vec![0.0, 1.0], "q", "old", nd100()).await.unwrap();
        cache.invalidate(&Citation::parse("NĐ 100/2019")).await.unwrap();
        cache.store(vec![0.0, 1.0], "q", "fresh", nd100()).await.unwrap();

        let hit = cache.lookup(&[0.0, 1.0]).await.unwrap().hit().unwrap();
        assert_eq!(hit.answer_text, "fresh");
    }

    #[tokio::test]
    async fn test_expired_entries_miss() {
        let config = CacheConfig {
            ttl: Duration::from_millis(50),
            ..CacheConfig::default()
        };
        let cache = SemanticCache::in_memory(config);
        cache.store(vec![1.0, 0.0], "q", "a", nd100()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.lookup(&[1.0, 0.0]).await.unwrap(), CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let config = CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        };
        let cache = SemanticCache::in_memory(config);
        cache.store(vec![1.0, 0.0, 0.0], "e1", "a1", nd100()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.store(vec![0.0, 1.0, 0.0], "e2", "a2", nd100()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.lookup(&[1.0, 0.0, 0.0]).await.unwrap().hit().is_some());
        cache.store(vec![0.0, 0.0, 1.0], "e3", "a3", nd100()).await.unwrap();

        assert!(cache.lookup(&[1.0, 0.0, 0.0]).await.unwrap().hit().is_some());
        assert_eq!(cache.lookup(&[0.0, 1.0, 0.0]).await.unwrap(), CacheLookup::Miss);
        assert!(cache.lookup(&[0.0, 0.0, 1.0]).await.unwrap().hit().is_some());

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.most_hit.as_deref(), Some("e1"));
    }

    #[tokio::test]
    async fn test_disabled_cache_always_misses() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let cache = SemanticCache::in_memory(config);
        cache.store(vec![1.0], "q", "a", nd100()).await.unwrap();
        assert_eq!(cache.lookup(&[1.0]).await.unwrap(), CacheLookup::Miss);
        assert_eq!(cache.stats().await.unwrap().total_entries, 0);
    }

    #[tokio::test]
    async fn test_live_entry_preferred_over_closer_stale_one() {
        let cache = cache();
        cache.store(vec![1.0, 0.0], "không đội mũ bảo hiểm", "cũ", nd100()).await.unwrap();
        cache.invalidate(&Citation::parse("NĐ 100/2019")).await.unwrap();
        // cos ≈ 0.9 to the query: above the hit threshold, below the merge threshold
        cache
            .store(
                vec![0.9, 0.436],
                "mức phạt không đội mũ bảo hiểm",
                "mới",
                vec![Citation::law("Nghị định 168/2024/NĐ-CP").with_article("7")],
            )
            .await
            .unwrap();

        let hit = cache.lookup(&[1.0, 0.0]).await.unwrap().hit().unwrap();
        assert_eq!(hit.answer_text, "mới");
        assert_eq!(cache.stats().await.unwrap().total_entries, 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = cache();
        cache.store(vec![1.0, 1.0], "q", "a", nd100()).await.unwrap();
        cache.clear().await.unwrap();
        assert_eq!(cache.stats().await.unwrap().total_entries, 0);
    }
}
