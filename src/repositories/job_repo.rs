use async_trait::async_trait;
use diesel::dsl::{count_star, min, sql};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Int4, Nullable, Text, Timestamptz, Uuid as SqlUuid};
use diesel_async::RunQueryDsl;
use jiff::Timestamp;

use crate::db::{AsyncDbPool, connection};
use crate::error::{AppError, AppResult};
use crate::jobs::types::{
    BatchId, BatchStatus, Job, JobId, JobStatus, QueueStatistics, StatusCounts,
};
use crate::models::JobRow;
use crate::schema::{batches, jobs};
use crate::store::JobStore;

/// Rows locked per claim relative to `limit`, leaving room for members
/// skipped by their batch cap
const CLAIM_LOOKAHEAD: i64 = 4;

/// Claim in one statement. Window functions cannot share a level with
/// `FOR UPDATE`, so locking happens first and the per-batch cap is applied to
/// the locked set.
const CLAIM_SQL: &str = r#"
WITH locked AS (
    SELECT id, batch_id, priority, created_at
    FROM jobs
    WHERE status = 'pending'
      AND scheduled_at <= $1
      AND (expires_at IS NULL OR expires_at > $1)
    ORDER BY priority DESC, created_at ASC, id ASC
    LIMIT $2
    FOR UPDATE SKIP LOCKED
),
ranked AS (
    SELECT locked.*,
           ROW_NUMBER() OVER (
               PARTITION BY batch_id
               ORDER BY priority DESC, created_at ASC, id ASC
           ) AS batch_rank
    FROM locked
),
chosen AS (
    SELECT ranked.id
    FROM ranked
    LEFT JOIN batches b ON b.id = ranked.batch_id
    WHERE ranked.batch_id IS NULL OR ranked.batch_rank <= b.batch_size
    ORDER BY ranked.priority DESC, ranked.created_at ASC, ranked.id ASC
    LIMIT $3
)
UPDATE jobs
SET status = 'processing', updated_at = $1
FROM chosen
WHERE jobs.id = chosen.id
RETURNING jobs.*
"#;

const RESCHEDULE_SQL: &str = r#"
UPDATE jobs
SET status = 'pending',
    scheduled_at = GREATEST(scheduled_at, $1),
    status_message = $2,
    updated_at = $3
WHERE id = $4 AND status = 'processing'
"#;

/// PostgreSQL job storage
#[derive(Clone)]
pub struct PgJobRepository {
    pool: AsyncDbPool,
}

impl PgJobRepository {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobRepository {
    async fn enqueue(&self, job: Job) -> AppResult<JobId> {
        let mut conn = connection(&self.pool).await?;
        let id = job.id;

        diesel::insert_into(jobs::table)
            .values(JobRow::from(job))
            .execute(&mut conn)
            .await
            .map_err(AppError::from)?;

        Ok(id)
    }

    async fn claim_batch(&self, limit: u32, now: Timestamp) -> AppResult<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = connection(&self.pool).await?;

        let limit = i64::from(limit);
        let rows: Vec<JobRow> = diesel::sql_query(CLAIM_SQL)
            .bind::<Timestamptz, _>(jiff_diesel::Timestamp::from(now))
            .bind::<BigInt, _>(limit * CLAIM_LOOKAHEAD)
            .bind::<BigInt, _>(limit)
            .load(&mut conn)
            .await
            .map_err(AppError::from)?;

        // RETURNING carries no order
        let mut claimed: Vec<Job> = rows.into_iter().map(Job::from).collect();
        claimed.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(claimed)
    }

    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        message: Option<String>,
        now: Timestamp,
    ) -> AppResult<bool> {
        let mut conn = connection(&self.pool).await?;

        let updated = diesel::update(
            jobs::table
                .filter(jobs::id.eq(id))
                .filter(jobs::status.ne(status))
                .filter(
                    jobs::status
                        .eq(JobStatus::Pending)
                        .or(jobs::status.eq(JobStatus::Processing)),
                ),
        )
        .set((
            jobs::status.eq(status),
            jobs::status_message.eq(message),
            jobs::updated_at.eq(jiff_diesel::Timestamp::from(now)),
        ))
        .execute(&mut conn)
        .await
        .map_err(AppError::from)?;

        Ok(updated > 0)
    }

    async fn mark_running(
        &self,
        id: JobId,
        claimed_at: Timestamp,
        now: Timestamp,
    ) -> AppResult<bool> {
        let mut conn = connection(&self.pool).await?;

        // `claimed_at` comes back from RETURNING, so it carries the column's
        // own precision and compares exactly
        let updated = diesel::update(
            jobs::table
                .filter(jobs::id.eq(id))
                .filter(jobs::status.eq(JobStatus::Processing))
                .filter(jobs::updated_at.eq(jiff_diesel::Timestamp::from(claimed_at))),
        )
        .set(jobs::updated_at.eq(jiff_diesel::Timestamp::from(now)))
        .execute(&mut conn)
        .await
        .map_err(AppError::from)?;

        Ok(updated > 0)
    }

    async fn increment_attempt(&self, id: JobId, now: Timestamp) -> AppResult<u32> {
        let mut conn = connection(&self.pool).await?;

        let attempts: Option<i32> = diesel::update(jobs::table.find(id))
            .set((
                jobs::attempts.eq(sql::<Int4>("LEAST(attempts + 1, max_attempts)")),
                jobs::updated_at.eq(jiff_diesel::Timestamp::from(now)),
            ))
            .returning(jobs::attempts)
            .get_result(&mut conn)
            .await
            .optional()
            .map_err(AppError::from)?;

        attempts
            .map(|a| u32::try_from(a).unwrap_or(0))
            .ok_or_else(|| AppError::not_found("Job", id))
    }

    async fn reschedule(
        &self,
        id: JobId,
        at: Timestamp,
        message: Option<String>,
        now: Timestamp,
    ) -> AppResult<bool> {
        let mut conn = connection(&self.pool).await?;

        let updated = diesel::sql_query(RESCHEDULE_SQL)
            .bind::<Timestamptz, _>(jiff_diesel::Timestamp::from(at))
            .bind::<Nullable<Text>, _>(message)
            .bind::<Timestamptz, _>(jiff_diesel::Timestamp::from(now))
            .bind::<SqlUuid, _>(id)
            .execute(&mut conn)
            .await
            .map_err(AppError::from)?;

        Ok(updated > 0)
    }

    async fn cancel(&self, id: JobId, now: Timestamp) -> AppResult<bool> {
        let mut conn = connection(&self.pool).await?;

        let updated = diesel::update(
            jobs::table
                .filter(jobs::id.eq(id))
                .filter(jobs::status.eq(JobStatus::Pending)),
        )
        .set((
            jobs::status.eq(JobStatus::Cancelled),
            jobs::status_message.eq("cancelled by request"),
            jobs::updated_at.eq(jiff_diesel::Timestamp::from(now)),
        ))
        .execute(&mut conn)
        .await
        .map_err(AppError::from)?;

        Ok(updated > 0)
    }

    async fn get(&self, id: JobId) -> AppResult<Option<Job>> {
        let mut conn = connection(&self.pool).await?;

        let row = jobs::table
            .find(id)
            .select(JobRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(AppError::from)?;

        Ok(row.map(Job::from))
    }

    async fn find_by_batch(&self, batch_id: BatchId) -> AppResult<Vec<Job>> {
        let mut conn = connection(&self.pool).await?;

        let rows = jobs::table
            .filter(jobs::batch_id.eq(batch_id))
            .order((jobs::created_at.asc(), jobs::id.asc()))
            .select(JobRow::as_select())
            .load(&mut conn)
            .await
            .map_err(AppError::from)?;

        Ok(rows.into_iter().map(Job::from).collect())
    }

    async fn count_by_batch_status(&self, batch_id: BatchId) -> AppResult<StatusCounts> {
        let mut conn = connection(&self.pool).await?;

        let rows: Vec<(JobStatus, i64)> = jobs::table
            .filter(jobs::batch_id.eq(batch_id))
            .group_by(jobs::status)
            .select((jobs::status, count_star()))
            .load(&mut conn)
            .await
            .map_err(AppError::from)?;

        Ok(to_counts(rows))
    }

    async fn cancel_expired(&self, now: Timestamp) -> AppResult<Vec<Job>> {
        let mut conn = connection(&self.pool).await?;
        let now = jiff_diesel::Timestamp::from(now);

        let rows = diesel::update(
            jobs::table
                .filter(jobs::status.eq(JobStatus::Pending))
                .filter(jobs::expires_at.le(now)),
        )
        .set((
            jobs::status.eq(JobStatus::Cancelled),
            jobs::status_message.eq("expired before execution"),
            jobs::updated_at.eq(now),
        ))
        .returning(JobRow::as_returning())
        .get_results(&mut conn)
        .await
        .map_err(AppError::from)?;

        Ok(rows.into_iter().map(Job::from).collect())
    }

    async fn release_stale(&self, before: Timestamp, now: Timestamp) -> AppResult<u64> {
        let mut conn = connection(&self.pool).await?;

        let released = diesel::update(
            jobs::table
                .filter(jobs::status.eq(JobStatus::Processing))
                .filter(jobs::updated_at.lt(jiff_diesel::Timestamp::from(before))),
        )
        .set((
            jobs::status.eq(JobStatus::Pending),
            jobs::status_message.eq("released after stalled claim"),
            jobs::updated_at.eq(jiff_diesel::Timestamp::from(now)),
        ))
        .execute(&mut conn)
        .await
        .map_err(AppError::from)?;

        Ok(released as u64)
    }

    async fn purge_terminal(&self, before: Timestamp) -> AppResult<u64> {
        let mut conn = connection(&self.pool).await?;

        let deleted = diesel::delete(
            jobs::table
                .filter(jobs::status.ne(JobStatus::Pending))
                .filter(jobs::status.ne(JobStatus::Processing))
                .filter(jobs::updated_at.lt(jiff_diesel::Timestamp::from(before))),
        )
        .execute(&mut conn)
        .await
        .map_err(AppError::from)?;

        Ok(deleted as u64)
    }

    async fn statistics(&self) -> AppResult<QueueStatistics> {
        let mut conn = connection(&self.pool).await?;

        let rows: Vec<(JobStatus, i64)> = jobs::table
            .group_by(jobs::status)
            .select((jobs::status, count_star()))
            .load(&mut conn)
            .await
            .map_err(AppError::from)?;

        let open_batches: i64 = batches::table
            .filter(
                batches::status
                    .eq(BatchStatus::Pending)
                    .or(batches::status.eq(BatchStatus::Processing)),
            )
            .count()
            .get_result(&mut conn)
            .await
            .map_err(AppError::from)?;

        let oldest_pending: Option<jiff_diesel::Timestamp> = jobs::table
            .filter(jobs::status.eq(JobStatus::Pending))
            .select(min(jobs::scheduled_at))
            .first(&mut conn)
            .await
            .map_err(AppError::from)?;

        Ok(QueueStatistics {
            jobs: to_counts(rows),
            open_batches: u64::try_from(open_batches).unwrap_or(0),
            oldest_pending: oldest_pending.map(|at| at.to_jiff()),
        })
    }
}

fn to_counts(rows: Vec<(JobStatus, i64)>) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for (status, count) in rows {
        counts.add(status, u64::try_from(count).unwrap_or(0));
    }
    counts
}
