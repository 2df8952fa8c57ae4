use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::error::AppResult;
use crate::models::CacheRecord;
use crate::services::cache::CacheStore;

/// Response-cache rows in the `llm_cache` table
///
/// Every operation is a single autocommitted statement, so writes are
/// durable before returning and concurrent writers to one key settle as
/// last-write-wins.
pub struct PgCacheStore {
    pool: PgPool,
}

impl PgCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct CacheRow {
    input_hash: String,
    response: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<CacheRow> for CacheRecord {
    fn from(row: CacheRow) -> Self {
        CacheRecord {
            input_hash: row.input_hash,
            response: row.response,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

#[async_trait::async_trait]
impl CacheStore for PgCacheStore {
    async fn find(&self, input_hash: &str) -> AppResult<Option<CacheRecord>> {
        let row: Option<CacheRow> = sqlx::query_as(
            "SELECT input_hash, response, created_at, expires_at \
             FROM llm_cache WHERE input_hash = $1",
        )
        .bind(input_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CacheRecord::from))
    }

    async fn upsert(&self, record: &CacheRecord) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO llm_cache (input_hash, response, created_at, expires_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (input_hash) DO UPDATE \
             SET response = EXCLUDED.response, \
                 created_at = EXCLUDED.created_at, \
                 expires_at = EXCLUDED.expires_at",
        )
        .bind(&record.input_hash)
        .bind(&record.response)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, input_hash: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM llm_cache WHERE input_hash = $1")
            .bind(input_hash)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM llm_cache WHERE expires_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
