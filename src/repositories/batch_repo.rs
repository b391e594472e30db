use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::Timestamptz;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use jiff::Timestamp;

use crate::db::{AsyncDbPool, connection};
use crate::error::{AppError, AppResult};
use crate::jobs::types::{Batch, BatchId, BatchStatus, Job};
use crate::models::{BatchRow, JobRow};
use crate::schema::{batches, jobs};
use crate::store::BatchStore;

/// Finished batches go only once retention has removed their last member
const PURGE_FINISHED_SQL: &str = r#"
DELETE FROM batches b
WHERE b.status IN ('completed', 'failed')
  AND b.completed_at < $1
  AND NOT EXISTS (SELECT 1 FROM jobs j WHERE j.batch_id = b.id)
"#;

/// PostgreSQL batch storage
#[derive(Clone)]
pub struct PgBatchRepository {
    pool: AsyncDbPool,
}

impl PgBatchRepository {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BatchStore for PgBatchRepository {
    async fn create_with_jobs(&self, batch: Batch, members: Vec<Job>) -> AppResult<BatchId> {
        let mut conn = connection(&self.pool).await?;
        let id = batch.id;
        let batch_row = BatchRow::from(batch);
        let job_rows: Vec<JobRow> = members.into_iter().map(JobRow::from).collect();

        conn.transaction::<_, AppError, _>(|conn| {
            async move {
                diesel::insert_into(batches::table)
                    .values(&batch_row)
                    .execute(conn)
                    .await?;
                diesel::insert_into(jobs::table)
                    .values(&job_rows)
                    .execute(conn)
                    .await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await?;

        Ok(id)
    }

    async fn get_batch(&self, id: BatchId) -> AppResult<Option<Batch>> {
        let mut conn = connection(&self.pool).await?;

        let row = batches::table
            .find(id)
            .select(BatchRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(AppError::from)?;

        Ok(row.map(Batch::from))
    }

    async fn mark_processing(&self, id: BatchId, now: Timestamp) -> AppResult<bool> {
        let mut conn = connection(&self.pool).await?;

        let updated = diesel::update(
            batches::table
                .filter(batches::id.eq(id))
                .filter(batches::status.eq(BatchStatus::Pending)),
        )
        .set((
            batches::status.eq(BatchStatus::Processing),
            batches::updated_at.eq(jiff_diesel::Timestamp::from(now)),
        ))
        .execute(&mut conn)
        .await
        .map_err(AppError::from)?;

        Ok(updated > 0)
    }

    async fn update_progress(
        &self,
        id: BatchId,
        processed_items: u32,
        failed_items: u32,
        status: BatchStatus,
        now: Timestamp,
    ) -> AppResult<bool> {
        let mut conn = connection(&self.pool).await?;
        let now = jiff_diesel::Timestamp::from(now);
        let processed = i32::try_from(processed_items).unwrap_or(i32::MAX);
        let failed = i32::try_from(failed_items).unwrap_or(i32::MAX);

        conn.transaction::<_, AppError, _>(|conn| {
            async move {
                let current: BatchStatus = batches::table
                    .find(id)
                    .select(batches::status)
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| AppError::not_found("Batch", id))?;

                if current.is_terminal() {
                    return Ok(false);
                }

                diesel::update(batches::table.find(id))
                    .set((
                        batches::processed_items.eq(processed),
                        batches::failed_items.eq(failed),
                        batches::status.eq(status),
                        batches::updated_at.eq(now),
                        batches::completed_at.eq(status.is_terminal().then_some(now)),
                    ))
                    .execute(conn)
                    .await?;

                Ok(current != status)
            }
            .scope_boxed()
        })
        .await
    }

    async fn open_batches(&self) -> AppResult<Vec<BatchId>> {
        let mut conn = connection(&self.pool).await?;

        batches::table
            .filter(
                batches::status
                    .eq(BatchStatus::Pending)
                    .or(batches::status.eq(BatchStatus::Processing)),
            )
            .order(batches::created_at.asc())
            .select(batches::id)
            .load(&mut conn)
            .await
            .map_err(AppError::from)
    }

    async fn purge_finished(&self, before: Timestamp) -> AppResult<u64> {
        let mut conn = connection(&self.pool).await?;

        let deleted = diesel::sql_query(PURGE_FINISHED_SQL)
            .bind::<Timestamptz, _>(jiff_diesel::Timestamp::from(before))
            .execute(&mut conn)
            .await
            .map_err(AppError::from)?;

        Ok(deleted as u64)
    }
}
