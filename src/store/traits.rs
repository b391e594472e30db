use async_trait::async_trait;
use jiff::Timestamp;

use crate::error::AppResult;
use crate::jobs::types::{
    Batch, BatchId, BatchStatus, Job, JobId, JobStatus, QueueStatistics, StatusCounts,
};

/// Durable job storage
///
/// Every mutating call is atomic on its own. `claim_batch` is the only
/// coordination point between dispatcher processes: a job it returns has
/// been moved to `processing` and is invisible to every other claimer.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a `pending` job
    async fn enqueue(&self, job: Job) -> AppResult<JobId>;

    /// Claim up to `limit` due jobs, highest priority then oldest first.
    /// At most `batch_size` members of any one batch are taken per call.
    async fn claim_batch(&self, limit: u32, now: Timestamp) -> AppResult<Vec<Job>>;

    /// Returns false when the job is gone, already has `status`, or is
    /// already terminal.
    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        message: Option<String>,
        now: Timestamp,
    ) -> AppResult<bool>;

    /// Confirm a claim just before its executor runs. Succeeds only while the
    /// job is still `processing` with the `updated_at` its claim stamped,
    /// and moves `updated_at` to `now`.
    async fn mark_running(
        &self,
        id: JobId,
        claimed_at: Timestamp,
        now: Timestamp,
    ) -> AppResult<bool>;

    /// Increment and return the attempt counter, never past `max_attempts`
    async fn increment_attempt(&self, id: JobId, now: Timestamp) -> AppResult<u32>;

    /// Return a `processing` job to `pending`, no earlier than `at`
    async fn reschedule(
        &self,
        id: JobId,
        at: Timestamp,
        message: Option<String>,
        now: Timestamp,
    ) -> AppResult<bool>;

    /// `pending -> cancelled`; false for any other current status
    async fn cancel(&self, id: JobId, now: Timestamp) -> AppResult<bool>;

    async fn get(&self, id: JobId) -> AppResult<Option<Job>>;

    async fn find_by_batch(&self, batch_id: BatchId) -> AppResult<Vec<Job>>;

    async fn count_by_batch_status(&self, batch_id: BatchId) -> AppResult<StatusCounts>;

    /// Cancel every pending job whose `expires_at` has passed
    async fn cancel_expired(&self, now: Timestamp) -> AppResult<Vec<Job>>;

    /// Return `processing` jobs untouched since `before` to `pending`
    async fn release_stale(&self, before: Timestamp, now: Timestamp) -> AppResult<u64>;

    /// Delete terminal jobs last updated before `before`
    async fn purge_terminal(&self, before: Timestamp) -> AppResult<u64>;

    async fn statistics(&self) -> AppResult<QueueStatistics>;
}

/// Batch storage
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Insert the batch and all of its member jobs in one transaction
    async fn create_with_jobs(&self, batch: Batch, jobs: Vec<Job>) -> AppResult<BatchId>;

    async fn get_batch(&self, id: BatchId) -> AppResult<Option<Batch>>;

    /// `pending -> processing` once a member has been claimed
    async fn mark_processing(&self, id: BatchId, now: Timestamp) -> AppResult<bool>;

    /// Store recomputed counters and status. A terminal batch is never
    /// modified again; returns true only when `status` changed.
    async fn update_progress(
        &self,
        id: BatchId,
        processed_items: u32,
        failed_items: u32,
        status: BatchStatus,
        now: Timestamp,
    ) -> AppResult<bool>;

    /// Ids of batches still `pending` or `processing`
    async fn open_batches(&self) -> AppResult<Vec<BatchId>>;

    /// Delete terminal batches finished before `before` that have no jobs left
    async fn purge_finished(&self, before: Timestamp) -> AppResult<u64>;
}

/// Shared fixed-window counters behind the rate limiter
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Atomically add `cost` to the window if the result stays within `limit`
    async fn try_consume(
        &self,
        resource_key: &str,
        window_start: Timestamp,
        cost: u32,
        limit: u32,
        now: Timestamp,
    ) -> AppResult<bool>;

    async fn usage(&self, resource_key: &str, window_start: Timestamp) -> AppResult<u32>;

    /// Drop windows that started before `before`
    async fn purge_before(&self, before: Timestamp) -> AppResult<u64>;
}
