//! Database module - PostgreSQL + pgvector
//!
//! Provides durable storage for:
//! - Sessions and their append-only turns
//! - Semantic cache entries with pgvector nearest-neighbour lookup

mod cache_entries;
mod postgres;
mod sessions;

pub use cache_entries::PgCacheBackend;
pub use postgres::{init_pool, init_pool_for_migrations, migrations, PostgresPool};
pub use sessions::PgSessionBackend;
