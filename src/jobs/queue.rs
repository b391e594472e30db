//! Submission and inspection API used by the CLI and embedding code.

use std::sync::Arc;

use jiff::Timestamp;
use uuid::Uuid;
use validator::Validate;

use crate::config::Settings;
use crate::error::{AppError, AppResult};
use crate::jobs::batch::{BatchCoordinator, BatchProgress};
use crate::jobs::clock::Clock;
use crate::jobs::registry::ExecutorRegistry;
use crate::jobs::types::{Actor, BatchId, BatchOptions, Job, JobId, NewJob, QueueStatistics};
use crate::store::JobStore;

/// Values applied to submissions that leave them unset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionDefaults {
    pub max_attempts: u32,
    pub batch_size: u32,
    pub notify_on_complete: bool,
}

impl SubmissionDefaults {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_attempts: settings.retry.default_max_attempts,
            batch_size: settings.batch.default_batch_size,
            notify_on_complete: settings.batch.notify_on_complete,
        }
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            batch_size: self.batch_size,
            max_attempts: self.max_attempts,
            notify_on_complete: self.notify_on_complete,
        }
    }
}

impl Default for SubmissionDefaults {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

#[derive(Clone)]
pub struct JobQueue {
    jobs: Arc<dyn JobStore>,
    batches: BatchCoordinator,
    registry: Arc<ExecutorRegistry>,
    clock: Arc<dyn Clock>,
    defaults: SubmissionDefaults,
}

impl JobQueue {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        batches: BatchCoordinator,
        registry: Arc<ExecutorRegistry>,
        clock: Arc<dyn Clock>,
        defaults: SubmissionDefaults,
    ) -> Self {
        Self {
            jobs,
            batches,
            registry,
            clock,
            defaults,
        }
    }

    pub fn defaults(&self) -> &SubmissionDefaults {
        &self.defaults
    }

    /// Validate and enqueue one job. Nothing is stored when validation fails.
    pub async fn submit(&self, request: NewJob, actor: &Actor) -> AppResult<JobId> {
        let now = self.clock.now();
        self.check(&request, now)?;

        let job = request.into_job(Uuid::new_v4(), now, self.defaults.max_attempts, None, actor);
        let (kind, priority, scheduled_at) = (job.kind, job.priority, job.scheduled_at);
        let id = self.jobs.enqueue(job).await?;

        tracing::info!(
            job.id = %id,
            kind = %kind,
            priority,
            scheduled_at = %scheduled_at,
            actor = actor.name(),
            "Job submitted"
        );
        Ok(id)
    }

    /// Validate every item, then store the batch and its members atomically
    pub async fn submit_batch(
        &self,
        items: Vec<NewJob>,
        options: Option<BatchOptions>,
        actor: &Actor,
    ) -> AppResult<BatchId> {
        let now = self.clock.now();
        for item in &items {
            self.check(item, now)?;
        }
        let options = options.unwrap_or_else(|| self.defaults.batch_options());
        self.batches.create_batch(items, options, actor).await
    }

    /// Cancel a pending job. Returns false when it already left `pending`.
    pub async fn cancel(&self, id: JobId, actor: &Actor) -> AppResult<bool> {
        let job = self.get(id).await?;
        let cancelled = self.jobs.cancel(id, self.clock.now()).await?;
        if !cancelled {
            tracing::info!(job.id = %id, status = job.status.as_str(), "Job not cancellable");
            return Ok(false);
        }

        tracing::info!(job.id = %id, actor = actor.name(), "Job cancelled");
        if let Some(batch_id) = job.batch_id {
            self.batches.on_job_terminal(batch_id).await?;
        }
        Ok(true)
    }

    pub async fn get(&self, id: JobId) -> AppResult<Job> {
        self.jobs
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found("Job", id))
    }

    pub async fn batch_progress(&self, id: BatchId) -> AppResult<BatchProgress> {
        self.batches.get_batch(id).await
    }

    pub async fn statistics(&self) -> AppResult<QueueStatistics> {
        self.jobs.statistics().await
    }

    fn check(&self, request: &NewJob, now: Timestamp) -> AppResult<()> {
        request.validate()?;
        self.registry.validate(request.kind, &request.payload)?;
        if request.expires_at.is_some_and(|at| at <= now) {
            return Err(AppError::validation("expires_at", "already in the past"));
        }
        if let (Some(run_at), Some(expires_at)) = (request.run_at, request.expires_at) {
            if expires_at <= run_at {
                return Err(AppError::validation("expires_at", "must be after run_at"));
            }
        }
        Ok(())
    }
}
