//! In-process semantic cache storage
//!
//! Uses moka async cache keyed by entry id. Nearest-neighbour lookup is a
//! linear cosine scan, which is fine for the few thousand entries a single
//! process holds; the PostgreSQL backend uses a pgvector index instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::time::Duration;
use uuid::Uuid;

use crate::core::{cosine_similarity, CacheBackend, CacheEntry, CacheStats, Citation};
use crate::error::Result;

/// Semantic cache entries held in process memory
#[derive(Clone)]
pub struct InMemoryCacheBackend {
    entries: Cache<Uuid, CacheEntry>,
}

impl InMemoryCacheBackend {
    /// Create a backend; `ttl` and `max_entries` bound memory even if
    /// `prune` is never called.
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        InMemoryCacheBackend {
            entries: Cache::builder()
                .max_capacity(max_entries.saturating_mul(2).max(1))
                .time_to_live(ttl)
                .build(),
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    fn id(&self) -> &str {
        "memory"
    }

    async fn nearest(
        &self,
        fingerprint: &[f32],
        not_before: DateTime<Utc>,
        include_stale: bool,
    ) -> Result<Option<(CacheEntry, f32)>> {
        let best = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.created_at >= not_before && (include_stale || !entry.stale))
            .map(|(_, entry)| {
                let similarity = cosine_similarity(fingerprint, &entry.fingerprint);
                (entry, similarity)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));
        Ok(best)
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        self.entries.insert(entry.id, entry).await;
        Ok(())
    }

    async fn record_hit(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut entry) = self.entries.get(&id).await {
            entry.hit_count += 1;
            entry.last_hit_at = Some(at);
            self.entries.insert(id, entry).await;
        }
        Ok(())
    }

    async fn mark_stale(&self, target: &Citation) -> Result<u64> {
        let affected: Vec<CacheEntry> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.stale && entry.cites(target))
            .map(|(_, entry)| entry)
            .collect();

        let count = affected.len() as u64;
        for mut entry in affected {
            entry.stale = true;
            self.entries.insert(entry.id, entry).await;
        }
        Ok(count)
    }

    async fn prune(&self, not_before: DateTime<Utc>, max_entries: u64) -> Result<u64> {
        let mut live: Vec<(Uuid, DateTime<Utc>)> = Vec::new();
        let mut removed = 0;

        let all: Vec<CacheEntry> = self.entries.iter().map(|(_, e)| e).collect();
        for entry in all {
            if entry.created_at < not_before {
                self.entries.invalidate(&entry.id).await;
                removed += 1;
            } else {
                live.push((entry.id, entry.last_hit_at.unwrap_or(entry.created_at)));
            }
        }

        let excess = (live.len() as u64).saturating_sub(max_entries) as usize;
        if excess > 0 {
            live.sort_by_key(|(_, last_used)| *last_used);
            for (id, _) in live.into_iter().take(excess) {
                self.entries.invalidate(&id).await;
                removed += 1;
            }
        }

        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        let mut best: Option<(u64, String)> = None;

        for (_, entry) in self.entries.iter() {
            stats.total_entries += 1;
            stats.total_hits += entry.hit_count;
            if entry.stale {
                stats.stale_entries += 1;
            }
            if entry.hit_count > 0 && best.as_ref().map_or(true, |(hits, _)| entry.hit_count > *hits) {
                best = Some((entry.hit_count, entry.canonical_query.clone()));
            }
        }

        stats.most_hit = best.map(|(_, query)| query);
        Ok(stats)
    }

    async fn clear(&self) -> Result<()> {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
        Ok(())
    }
}
