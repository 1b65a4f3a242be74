//! In-process session backend
//!
//! Keeps every session in a `RwLock<HashMap>`. Appends take the write lock,
//! so index assignment and insertion are a single atomic step and a reader
//! always sees its own writes. Nothing survives a restart; use the
//! PostgreSQL backend for durable deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::core::{Session, SessionBackend, Turn};
use crate::error::Result;

/// Session storage held in process memory
#[derive(Default)]
pub struct InMemorySessionBackend {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionBackend for InMemorySessionBackend {
    fn id(&self) -> &str {
        "memory"
    }

    async fn append_turn(&self, user_identity: Option<&str>, mut turn: Turn) -> Result<Turn> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(turn.session_id.clone())
            .or_insert_with(|| Session::new(turn.session_id.clone(), user_identity.map(String::from)));

        if session.user_identity.is_none() {
            session.user_identity = user_identity.map(String::from);
        }

        turn.turn_index = session.turns.len() as u64;
        if let Some(last) = session.turns.last() {
            if turn.timestamp < last.timestamp {
                turn.timestamp = last.timestamp;
            }
        }
        session.last_active_at = turn.timestamp;
        session.archived = false;
        session.turns.push(turn.clone());

        Ok(turn)
    }

    async fn recent_turns(&self, session_id: &str, limit: usize) -> Result<Vec<Turn>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .map(|s| s.turns.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn sessions_for_user(
        &self,
        user_identity: &str,
        limit: usize,
        turns_per_session: usize,
    ) -> Result<Vec<Session>> {
        let sessions = self.sessions.read().await;
        let mut owned: Vec<&Session> = sessions
            .values()
            .filter(|s| s.user_identity.as_deref() == Some(user_identity))
            .collect();
        owned.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));

        Ok(owned
            .into_iter()
            .take(limit)
            .map(|s| {
                let skip = s.turns.len().saturating_sub(turns_per_session);
                Session {
                    turns: s.turns[skip..].to_vec(),
                    ..s.clone()
                }
            })
            .collect())
    }

    async fn archive_inactive(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut sessions = self.sessions.write().await;
        let mut archived = 0;
        for session in sessions.values_mut() {
            if !session.archived && session.last_active_at < cutoff {
                session.archived = true;
                archived += 1;
            }
        }
        Ok(archived)
    }
}
