//! Semantic cache storage backed by PostgreSQL + pgvector

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::core::{CacheBackend, CacheEntry, CacheStats, Citation};
use crate::database::PostgresPool;
use crate::error::Result;

#[derive(FromRow)]
struct CacheRow {
    id: Uuid,
    fingerprint: Vector,
    canonical_query: String,
    answer_text: String,
    supporting_citations: Json<Vec<Citation>>,
    created_at: DateTime<Utc>,
    last_hit_at: Option<DateTime<Utc>>,
    hit_count: i64,
    stale: bool,
    similarity: f32,
}

impl CacheRow {
    fn into_entry(self) -> (CacheEntry, f32) {
        let entry = CacheEntry {
            id: self.id,
            fingerprint: self.fingerprint.to_vec(),
            canonical_query: self.canonical_query,
            answer_text: self.answer_text,
            supporting_citations: self.supporting_citations.0,
            created_at: self.created_at,
            last_hit_at: self.last_hit_at,
            hit_count: self.hit_count.max(0) as u64,
            stale: self.stale,
        };
        (entry, self.similarity)
    }
}

/// Canonical law keys of an entry, indexed for invalidation
fn law_codes(citations: &[Citation]) -> Vec<String> {
    let mut codes: Vec<String> = citations.iter().filter_map(Citation::law_key).collect();
    codes.sort();
    codes.dedup();
    codes
}

/// Semantic cache store backed by PostgreSQL
#[derive(Clone)]
pub struct PgCacheBackend {
    pg_pool: PostgresPool,
}

impl PgCacheBackend {
    /// Create a new cache backend
    pub fn new(pg_pool: PostgresPool) -> Self {
        PgCacheBackend { pg_pool }
    }
}

#[async_trait]
impl CacheBackend for PgCacheBackend {
    fn id(&self) -> &str {
        "postgres"
    }

    async fn nearest(
        &self,
        fingerprint: &[f32],
        not_before: DateTime<Utc>,
        include_stale: bool,
    ) -> Result<Option<(CacheEntry, f32)>> {
        let embedding = Vector::from(fingerprint.to_vec());

        let row: Option<CacheRow> = sqlx::query_as(
            r#"
            SELECT
                id, fingerprint, canonical_query, answer_text, supporting_citations,
                created_at, last_hit_at, hit_count, stale,
                (1 - (fingerprint <=> $1))::REAL AS similarity
            FROM semantic_cache
            WHERE created_at >= $2 AND ($3 OR stale = FALSE)
            ORDER BY fingerprint <=> $1
            LIMIT 1
        "#,
        )
        .bind(&embedding)
        .bind(not_before)
        .bind(include_stale)
        .fetch_optional(&self.pg_pool)
        .await?;

        Ok(row.map(CacheRow::into_entry))
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        let codes = law_codes(&entry.supporting_citations);

        sqlx::query(
            r#"
            INSERT INTO semantic_cache
                (id, fingerprint, canonical_query, answer_text, supporting_citations, law_codes,
                 created_at, last_hit_at, hit_count, stale)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                canonical_query = EXCLUDED.canonical_query,
                answer_text = EXCLUDED.answer_text,
                supporting_citations = EXCLUDED.supporting_citations,
                law_codes = EXCLUDED.law_codes,
                created_at = EXCLUDED.created_at,
                stale = EXCLUDED.stale
        "#,
        )
        .bind(entry.id)
        .bind(Vector::from(entry.fingerprint.clone()))
        .bind(&entry.canonical_query)
        .bind(&entry.answer_text)
        .bind(Json(&entry.supporting_citations))
        .bind(&codes)
        .bind(entry.created_at)
        .bind(entry.last_hit_at)
        .bind(entry.hit_count as i64)
        .bind(entry.stale)
        .execute(&self.pg_pool)
        .await?;

        Ok(())
    }

    async fn record_hit(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE semantic_cache SET hit_count = hit_count + 1, last_hit_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pg_pool)
            .await?;
        Ok(())
    }

    async fn mark_stale(&self, target: &Citation) -> Result<u64> {
        let candidates: Vec<(Uuid, Json<Vec<Citation>>)> = match target.law_key() {
            Some(code) => {
                sqlx::query_as(
                    "SELECT id, supporting_citations FROM semantic_cache WHERE stale = FALSE AND $1 = ANY(law_codes)",
                )
                .bind(code)
                .fetch_all(&self.pg_pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT id, supporting_citations FROM semantic_cache WHERE stale = FALSE")
                    .fetch_all(&self.pg_pool)
                    .await?
            }
        };

        let ids: Vec<Uuid> = candidates
            .into_iter()
            .filter(|(_, citations)| citations.0.iter().any(|c| c.falls_under(target)))
            .map(|(id, _)| id)
            .collect();

        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("UPDATE semantic_cache SET stale = TRUE WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&self.pg_pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn prune(&self, not_before: DateTime<Utc>, max_entries: u64) -> Result<u64> {
        let expired = sqlx::query("DELETE FROM semantic_cache WHERE created_at < $1")
            .bind(not_before)
            .execute(&self.pg_pool)
            .await?
            .rows_affected();

        let overflow = sqlx::query(
            r#"
            DELETE FROM semantic_cache WHERE id IN (
                SELECT id FROM semantic_cache
                ORDER BY COALESCE(last_hit_at, created_at) DESC
                OFFSET $1
            )
        "#,
        )
        .bind(max_entries as i64)
        .execute(&self.pg_pool)
        .await?
        .rows_affected();

        Ok(expired + overflow)
    }

    async fn stats(&self) -> Result<CacheStats> {
        let (total, stale, hits): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE stale),
                COALESCE(SUM(hit_count), 0)::BIGINT
            FROM semantic_cache
        "#,
        )
        .fetch_one(&self.pg_pool)
        .await?;

        let most_hit: Option<(String,)> = sqlx::query_as(
            "SELECT canonical_query FROM semantic_cache WHERE hit_count > 0 ORDER BY hit_count DESC LIMIT 1",
        )
        .fetch_optional(&self.pg_pool)
        .await?;

        Ok(CacheStats {
            total_entries: total.max(0) as u64,
            stale_entries: stale.max(0) as u64,
            total_hits: hits.max(0) as u64,
            most_hit: most_hit.map(|(q,)| q),
        })
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM semantic_cache")
            .execute(&self.pg_pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_law_codes_are_canonical_and_unique() {
        let citations = vec![
            Citation::law("Nghị định 100/2019/NĐ-CP").with_article("6"),
            Citation::law("NĐ 100/2019").with_article("5"),
            Citation::law("Luật 36/2024/QH15"),
            Citation::web("https://example.vn"),
        ];
        assert_eq!(law_codes(&citations), vec!["luat-36-2024", "nd-100-2019"]);
    }
}
