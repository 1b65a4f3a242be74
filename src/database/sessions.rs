//! Session and turn storage backed by PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::core::{Role, Session, SessionBackend, Turn};
use crate::database::PostgresPool;
use crate::error::Result;

#[derive(FromRow)]
struct TurnRow {
    session_id: String,
    turn_index: i64,
    role: String,
    text: String,
    created_at: DateTime<Utc>,
    extracted_entities: Option<Vec<String>>,
}

impl TurnRow {
    fn into_turn(self) -> Result<Turn> {
        Ok(Turn {
            session_id: self.session_id,
            turn_index: self.turn_index as u64,
            role: self.role.parse::<Role>()?,
            text: self.text,
            timestamp: self.created_at,
            extracted_entities: self.extracted_entities,
        })
    }
}

#[derive(FromRow)]
struct SessionRow {
    session_id: String,
    user_identity: Option<String>,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
    archived: bool,
}

impl SessionRow {
    fn into_session(self, turns: Vec<Turn>) -> Session {
        Session {
            session_id: self.session_id,
            user_identity: self.user_identity,
            created_at: self.created_at,
            last_active_at: self.last_active_at,
            archived: self.archived,
            turns,
        }
    }
}

/// Session store backed by PostgreSQL
#[derive(Clone)]
pub struct PgSessionBackend {
    pg_pool: PostgresPool,
}

impl PgSessionBackend {
    /// Create a new session backend
    pub fn new(pg_pool: PostgresPool) -> Self {
        PgSessionBackend { pg_pool }
    }

    async fn turns_desc(&self, session_id: &str, limit: usize) -> Result<Vec<Turn>> {
        let rows: Vec<TurnRow> = sqlx::query_as(
            r#"
            SELECT session_id, turn_index, role, text, created_at, extracted_entities
            FROM turns WHERE session_id = $1
            ORDER BY turn_index DESC
            LIMIT $2
        "#,
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pg_pool)
        .await?;

        rows.into_iter().map(TurnRow::into_turn).collect()
    }
}

#[async_trait]
impl SessionBackend for PgSessionBackend {
    fn id(&self) -> &str {
        "postgres"
    }

    async fn append_turn(&self, user_identity: Option<&str>, mut turn: Turn) -> Result<Turn> {
        let mut tx = self.pg_pool.begin().await?;

        // The upsert row-locks the session, serializing concurrent appends
        let (turn_index,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO sessions (session_id, user_identity, created_at, last_active_at, turn_count)
            VALUES ($1, $2, $3, $3, 1)
            ON CONFLICT (session_id) DO UPDATE SET
                user_identity = COALESCE(sessions.user_identity, EXCLUDED.user_identity),
                last_active_at = GREATEST(sessions.last_active_at, EXCLUDED.last_active_at),
                archived = FALSE,
                turn_count = sessions.turn_count + 1
            RETURNING turn_count - 1
        "#,
        )
        .bind(&turn.session_id)
        .bind(user_identity)
        .bind(turn.timestamp)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO turns (session_id, turn_index, role, text, created_at, extracted_entities)
            VALUES ($1, $2, $3, $4, $5, $6)
        "#,
        )
        .bind(&turn.session_id)
        .bind(turn_index)
        .bind(turn.role.as_str())
        .bind(&turn.text)
        .bind(turn.timestamp)
        .bind(&turn.extracted_entities)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        turn.turn_index = turn_index as u64;
        Ok(turn)
    }

    async fn recent_turns(&self, session_id: &str, limit: usize) -> Result<Vec<Turn>> {
        self.turns_desc(session_id, limit).await
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT session_id, user_identity, created_at, last_active_at, archived FROM sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pg_pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let turn_rows: Vec<TurnRow> = sqlx::query_as(
            r#"
            SELECT session_id, turn_index, role, text, created_at, extracted_entities
            FROM turns WHERE session_id = $1
            ORDER BY turn_index
        "#,
        )
        .bind(session_id)
        .fetch_all(&self.pg_pool)
        .await?;

        let turns = turn_rows
            .into_iter()
            .map(TurnRow::into_turn)
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(row.into_session(turns)))
    }

    async fn sessions_for_user(
        &self,
        user_identity: &str,
        limit: usize,
        turns_per_session: usize,
    ) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"
            SELECT session_id, user_identity, created_at, last_active_at, archived
            FROM sessions WHERE user_identity = $1
            ORDER BY last_active_at DESC
            LIMIT $2
        "#,
        )
        .bind(user_identity)
        .bind(limit as i64)
        .fetch_all(&self.pg_pool)
        .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let mut turns = self.turns_desc(&row.session_id, turns_per_session).await?;
            turns.reverse();
            sessions.push(row.into_session(turns));
        }
        Ok(sessions)
    }

    async fn archive_inactive(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE sessions SET archived = TRUE WHERE archived = FALSE AND last_active_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pg_pool)
        .await?;
        Ok(result.rows_affected())
    }
}
