use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::{Int4, Timestamptz, Varchar};
use diesel_async::RunQueryDsl;
use jiff::Timestamp;

use crate::db::{AsyncDbPool, connection};
use crate::error::{AppError, AppResult};
use crate::schema::rate_limit_usage;
use crate::store::UsageStore;

/// Adds `cost` to the window only while the total stays within the limit.
/// Zero rows affected means denied.
const CONSUME_SQL: &str = r#"
INSERT INTO rate_limit_usage (resource_key, window_start, used, updated_at)
SELECT $1, $2, $3, $5
WHERE $3 <= $4
ON CONFLICT (resource_key, window_start) DO UPDATE
SET used = rate_limit_usage.used + EXCLUDED.used,
    updated_at = EXCLUDED.updated_at
WHERE rate_limit_usage.used + EXCLUDED.used <= $4
"#;

/// PostgreSQL rate-limit counters shared by every dispatcher
#[derive(Clone)]
pub struct PgUsageRepository {
    pool: AsyncDbPool,
}

impl PgUsageRepository {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageStore for PgUsageRepository {
    async fn try_consume(
        &self,
        resource_key: &str,
        window_start: Timestamp,
        cost: u32,
        limit: u32,
        now: Timestamp,
    ) -> AppResult<bool> {
        let mut conn = connection(&self.pool).await?;

        let affected = diesel::sql_query(CONSUME_SQL)
            .bind::<Varchar, _>(resource_key)
            .bind::<Timestamptz, _>(jiff_diesel::Timestamp::from(window_start))
            .bind::<Int4, _>(i32::try_from(cost).unwrap_or(i32::MAX))
            .bind::<Int4, _>(i32::try_from(limit).unwrap_or(i32::MAX))
            .bind::<Timestamptz, _>(jiff_diesel::Timestamp::from(now))
            .execute(&mut conn)
            .await
            .map_err(AppError::from)?;

        Ok(affected == 1)
    }

    async fn usage(&self, resource_key: &str, window_start: Timestamp) -> AppResult<u32> {
        let mut conn = connection(&self.pool).await?;

        let used: Option<i32> = rate_limit_usage::table
            .find((resource_key, jiff_diesel::Timestamp::from(window_start)))
            .select(rate_limit_usage::used)
            .first(&mut conn)
            .await
            .optional()
            .map_err(AppError::from)?;

        Ok(used.map_or(0, |u| u32::try_from(u).unwrap_or(0)))
    }

    async fn purge_before(&self, before: Timestamp) -> AppResult<u64> {
        let mut conn = connection(&self.pool).await?;

        let deleted = diesel::delete(
            rate_limit_usage::table
                .filter(rate_limit_usage::window_start.lt(jiff_diesel::Timestamp::from(before))),
        )
        .execute(&mut conn)
        .await
        .map_err(AppError::from)?;

        Ok(deleted as u64)
    }
}
