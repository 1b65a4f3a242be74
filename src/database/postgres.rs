//! PostgreSQL database connection and migrations

use crate::config::PostgresConfig;
use crate::error::{Error, Result};
use secrecy::ExposeSecret;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// PostgreSQL connection pool type alias
pub type PostgresPool = PgPool;

/// Initialize the PostgreSQL connection pool
pub async fn init_pool(config: &PostgresConfig) -> Result<PostgresPool> {
    init_pool_with_options(config, true).await
}

/// Initialize the PostgreSQL connection pool without pgvector check
/// Use this for running migrations before pgvector is installed
pub async fn init_pool_for_migrations(config: &PostgresConfig) -> Result<PostgresPool> {
    init_pool_with_options(config, false).await
}

async fn init_pool_with_options(config: &PostgresConfig, require_pgvector: bool) -> Result<PostgresPool> {
    info!("Initializing PostgreSQL connection pool");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(config.url.expose_secret())
        .await?;

    verify_database(&pool, require_pgvector).await?;

    info!("PostgreSQL connection pool initialized successfully");
    Ok(pool)
}

/// Verify database connection and optionally check for required extensions
async fn verify_database(pool: &PgPool, require_pgvector: bool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;

    if require_pgvector {
        let result: Option<(String,)> =
            sqlx::query_as("SELECT extname FROM pg_extension WHERE extname = 'vector'")
                .fetch_optional(pool)
                .await?;

        if result.is_none() {
            return Err(Error::Database(sqlx::Error::Configuration(
                "pgvector extension is not installed. Run: CREATE EXTENSION vector;".into(),
            )));
        }
    }

    Ok(())
}

/// Database migrations
pub mod migrations {
    use super::*;
    use tracing::warn;

    /// Run all migrations. `dimensions` sizes the cache fingerprint column
    /// and must match the embedding model.
    pub async fn run(pool: &PgPool, dimensions: u32) -> Result<()> {
        info!("Running database migrations");

        // Try to create pgvector extension (requires superuser or extension already available)
        match sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(pool)
            .await
        {
            Ok(_) => info!("pgvector extension enabled"),
            Err(e) => {
                warn!("Could not create pgvector extension: {}. The semantic cache will not work.", e);
                warn!("Run as superuser: CREATE EXTENSION vector;");
            }
        }

        // Sessions: turn_count doubles as the per-session index allocator
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                user_identity TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                last_active_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                archived BOOLEAN NOT NULL DEFAULT FALSE,
                turn_count BIGINT NOT NULL DEFAULT 0
            )
        "#)
        .execute(pool)
        .await?;

        // Turns are append-only; no UPDATE statement ever targets this table
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS turns (
                session_id TEXT NOT NULL REFERENCES sessions(session_id),
                turn_index BIGINT NOT NULL,
                role TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                extracted_entities TEXT[],
                PRIMARY KEY (session_id, turn_index)
            )
        "#)
        .execute(pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS semantic_cache (
                id UUID PRIMARY KEY,
                fingerprint vector({}) NOT NULL,
                canonical_query TEXT NOT NULL,
                answer_text TEXT NOT NULL,
                supporting_citations JSONB NOT NULL DEFAULT '[]',
                law_codes TEXT[] NOT NULL DEFAULT '{{}}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                last_hit_at TIMESTAMPTZ,
                hit_count BIGINT NOT NULL DEFAULT 0,
                stale BOOLEAN NOT NULL DEFAULT FALSE
            )
        "#,
            dimensions
        ))
        .execute(pool)
        .await?;

        // Create indexes (each must be a separate query for SQLx)
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_identity, last_active_at DESC)")
            .execute(pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_semantic_cache_law_codes ON semantic_cache USING GIN(law_codes)")
            .execute(pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_semantic_cache_created ON semantic_cache(created_at)")
            .execute(pool)
            .await?;

        sqlx::query(r#"
            CREATE INDEX IF NOT EXISTS idx_semantic_cache_fingerprint ON semantic_cache
            USING ivfflat (fingerprint vector_cosine_ops) WITH (lists = 100)
        "#)
        .execute(pool)
        .await
        .ok(); // Ignore if not enough data or vector type not available

        info!("Database migrations completed");
        Ok(())
    }
}
