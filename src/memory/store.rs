//! Memory store
//!
//! Front door to conversational memory. Wraps a [`SessionBackend`] with the
//! window policy, cross-session recall and per-session serialization: a
//! session never processes two user turns at once, while different sessions
//! proceed independently.

use chrono::Utc;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use super::backend::InMemorySessionBackend;
use crate::config::MemoryConfig;
use crate::core::{Session, SessionBackend, Turn};
use crate::error::{Error, Result};

/// Lock entries idle this long are dropped. Must exceed the longest request.
const LOCK_IDLE: Duration = Duration::from_secs(15 * 60);

/// Per-session and cross-session conversational memory
#[derive(Clone)]
pub struct MemoryStore {
    backend: Arc<dyn SessionBackend>,
    locks: Cache<String, Arc<Mutex<()>>>,
    config: MemoryConfig,
}

impl MemoryStore {
    /// Create a store over a backend
    pub fn new(backend: Arc<dyn SessionBackend>, config: MemoryConfig) -> Self {
        MemoryStore {
            backend,
            locks: Cache::builder().time_to_idle(LOCK_IDLE).build(),
            config,
        }
    }

    /// Create a store backed by process memory
    pub fn in_memory(config: MemoryConfig) -> Self {
        Self::new(Arc::new(InMemorySessionBackend::new()), config)
    }

    /// Memory policy in effect
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Acquire the session's serialization lock.
    ///
    /// Held for the whole request so turns are appended in arrival order.
    pub async fn lock_session(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .get_with(session_id.to_string(), async { Arc::new(Mutex::new(())) })
            .await;
        lock.lock_owned().await
    }

    /// Append a turn to `session_id`, returning it with its assigned index
    pub async fn append(&self, session_id: &str, turn: Turn) -> Result<Turn> {
        self.append_for(session_id, None, turn).await
    }

    /// Append a turn and link the session to `user_identity`
    pub async fn append_for(
        &self,
        session_id: &str,
        user_identity: Option<&str>,
        mut turn: Turn,
    ) -> Result<Turn> {
        if turn.text.trim().is_empty() {
            return Err(Error::InvalidInput("Turn text is empty".into()));
        }
        turn.session_id = session_id.to_string();

        let stored = self
            .backend
            .append_turn(user_identity, turn)
            .await
            .map_err(unavailable)?;
        debug!(
            "Appended {} turn {} to session {}",
            stored.role, stored.turn_index, session_id
        );
        Ok(stored)
    }

    /// Up to `window_size` most recent turns, most recent first.
    ///
    /// A session that does not exist yet has no turns.
    pub async fn recent(&self, session_id: &str, window_size: usize) -> Result<Vec<Turn>> {
        if window_size == 0 {
            return Ok(Vec::new());
        }
        self.backend
            .recent_turns(session_id, window_size)
            .await
            .map_err(unavailable)
    }

    /// Earlier sessions of the same user, most recently active first
    pub async fn resolve_cross_session(&self, user_identity: &str) -> Result<Vec<Session>> {
        self.backend
            .sessions_for_user(
                user_identity,
                self.config.cross_session_limit,
                self.config.cross_session_turns,
            )
            .await
            .map_err(unavailable)
    }

    /// Up to `cross_session_limit` sessions of the user other than `current`,
    /// most recently active first
    pub async fn earlier_sessions(&self, user_identity: &str, current: &str) -> Result<Vec<Session>> {
        let limit = self.config.cross_session_limit;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sessions = self
            .backend
            .sessions_for_user(user_identity, limit + 1, self.config.cross_session_turns)
            .await
            .map_err(unavailable)?;
        Ok(sessions
            .into_iter()
            .filter(|s| s.session_id != current)
            .take(limit)
            .collect())
    }

    /// Full session history
    pub async fn history(&self, session_id: &str) -> Result<Option<Session>> {
        self.backend.load_session(session_id).await.map_err(unavailable)
    }

    /// Archive sessions idle longer than the configured period
    pub async fn archive_inactive(&self) -> Result<u64> {
        let idle = chrono::Duration::from_std(self.config.archive_after)
            .map_err(|e| Error::Config(format!("Invalid archive_after: {}", e)))?;
        let archived = self
            .backend
            .archive_inactive(Utc::now() - idle)
            .await
            .map_err(unavailable)?;
        if archived > 0 {
            info!("Archived {} inactive sessions", archived);
        }
        Ok(archived)
    }
}

fn unavailable(err: Error) -> Error {
    match err {
        Error::MemoryUnavailable(_) | Error::InvalidInput(_) => err,
        other => Error::MemoryUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Role;

    fn store() -> MemoryStore {
        MemoryStore::in_memory(MemoryConfig::default())
    }

    #[tokio::test]
    async fn test_missing_session_is_empty() {
        let store = store();
        assert!(store.recent("nobody", 6).await.unwrap().is_empty());
        assert!(store.history("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recent_is_bounded_and_most_recent_first() {
        let store = store();
        for i in 0..10 {
            store
                .append("s1", Turn::user("", format!("câu hỏi {}", i)))
                .await
                .unwrap();
        }

        for window in [0, 1, 3, 10, 20] {
            let turns = store.recent("s1", window).await.unwrap();
            assert_eq!(turns.len(), window.min(10));
            for pair in turns.windows(2) {
                assert!(pair[0].turn_index > pair[1].turn_index);
            }
        }

        let latest = store.recent("s1", 1).await.unwrap();
        assert_eq!(latest[0].text, "câu hỏi 9");
        assert_eq!(latest[0].turn_index, 9);
        assert_eq!(latest[0].session_id, "s1");
    }

    #[tokio::test]
    async fn test_empty_turn_rejected() {
        let store = store();
        let err = store.append("s1", Turn::user("s1", "   ")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_concurrent_appends_get_unique_indices() {
        let store = store();
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append("shared", Turn::user("shared", format!("t{}", i))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let history = store.history("shared").await.unwrap().unwrap();
        let indices: Vec<u64> = history.turns.iter().map(|t| t.turn_index).collect();
        assert_eq!(indices, (0..20).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_session_lock_serializes() {
        let store = store();
        let guard = store.lock_session("s1").await;

        let other = store.clone();
        let blocked = tokio::spawn(async move {
            let _g = other.lock_session("s1").await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        // A different session is not blocked
        let _free = store.lock_session("s2").await;

        drop(guard);
        blocked.await.unwrap();
    }

    #[tokio::test]
    async fn test_cross_session_ordered_by_recency() {
        let store = store();
        store
            .append_for("old", Some("user-1"), Turn::user("", "Mức phạt vượt đèn đỏ?"))
            .await
            .unwrap();
        store
            .append_for("other-user", Some("user-2"), Turn::user("", "xin chào"))
            .await
            .unwrap();
        store
            .append_for("new", Some("user-1"), Turn::user("", "Nồng độ cồn xe máy?"))
            .await
            .unwrap();
        store
            .append("new", Turn::new("", Role::Assistant, "Phạt từ 2 đến 3 triệu"))
            .await
            .unwrap();

        let sessions = store.resolve_cross_session("user-1").await.unwrap();
        let ids: Vec<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(sessions[0].turns.len(), 2);
    }

    #[tokio::test]
    async fn test_earlier_sessions_exclude_current_without_losing_one() {
        let config = MemoryConfig {
            cross_session_limit: 2,
            ..MemoryConfig::default()
        };
        let store = MemoryStore::in_memory(config);
        for session in ["a", "b", "current"] {
            store
                .append_for(session, Some("user-1"), Turn::user("", format!("hỏi trong {}", session)))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let sessions = store.earlier_sessions("user-1", "current").await.unwrap();
        let ids: Vec<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        // Asking from outside the user's sessions still honours the limit
        let sessions = store.earlier_sessions("user-1", "elsewhere").await.unwrap();
        assert_eq!(sessions.len(), 2);
    }

    #[tokio::test]
    async fn test_archive_inactive() {
        let config = MemoryConfig {
            archive_after: Duration::from_secs(0),
            ..MemoryConfig::default()
        };
        let store = MemoryStore::in_memory(config);
        store.append("s1", Turn::user("", "hỏi")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(store.archive_inactive().await.unwrap(), 1);
        assert!(store.history("s1").await.unwrap().unwrap().archived);
        assert_eq!(store.archive_inactive().await.unwrap(), 0);
    }
}
