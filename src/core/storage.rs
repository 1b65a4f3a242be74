//! Storage traits - Abstract interfaces for persistence backends
//!
//! This module defines the two shared stores of the pipeline:
//! - `SessionBackend`: append-only conversational turns grouped by session
//! - `CacheBackend`: semantic cache entries with nearest-neighbour lookup
//!
//! Both have an in-process implementation (the default, and what tests use)
//! and a PostgreSQL + pgvector implementation for durable deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::citation::Citation;
use super::types::{CacheEntry, CacheStats, Session, Turn};
use crate::error::Result;

/// Durable conversational memory
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Get the backend ID
    fn id(&self) -> &str;

    /// Append a turn, creating the session if needed.
    ///
    /// The backend assigns `turn_index` atomically with the write and returns
    /// the stored turn. `user_identity` links a new (or still anonymous)
    /// session to a user for cross-session recall.
    async fn append_turn(&self, user_identity: Option<&str>, turn: Turn) -> Result<Turn>;

    /// Up to `limit` most recent turns, most recent first. Unknown sessions
    /// yield an empty vector.
    async fn recent_turns(&self, session_id: &str, limit: usize) -> Result<Vec<Turn>>;

    /// A session with all its turns
    async fn load_session(&self, session_id: &str) -> Result<Option<Session>>;

    /// Sessions of a user, most recently active first, each carrying at most
    /// `turns_per_session` of its latest turns in chronological order.
    async fn sessions_for_user(
        &self,
        user_identity: &str,
        limit: usize,
        turns_per_session: usize,
    ) -> Result<Vec<Session>>;

    /// Mark sessions inactive since `cutoff` as archived; returns how many
    async fn archive_inactive(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Semantic cache storage
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get the backend ID
    fn id(&self) -> &str;

    /// The entry closest to `fingerprint` created after `not_before`, with
    /// its cosine similarity. Stale entries are considered only when
    /// `include_stale` is set.
    async fn nearest(
        &self,
        fingerprint: &[f32],
        not_before: DateTime<Utc>,
        include_stale: bool,
    ) -> Result<Option<(CacheEntry, f32)>>;

    /// Insert or replace an entry by id
    async fn put(&self, entry: CacheEntry) -> Result<()>;

    /// Bump `hit_count` and set `last_hit_at`
    async fn record_hit(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Flag entries whose citations fall under `target`; returns how many
    async fn mark_stale(&self, target: &Citation) -> Result<u64>;

    /// Drop expired entries and trim to `max_entries`, least recently used first
    async fn prune(&self, not_before: DateTime<Utc>, max_entries: u64) -> Result<u64>;

    /// Aggregate statistics
    async fn stats(&self) -> Result<CacheStats>;

    /// Remove everything
    async fn clear(&self) -> Result<()>;
}
