//! One dispatch cycle: claim, gate, execute, settle.

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt, stream};
use jiff::Timestamp;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::DispatcherConfig;
use crate::error::{AppError, AppResult};
use crate::jobs::batch::BatchCoordinator;
use crate::jobs::clock::{Clock, after};
use crate::jobs::error::{ExecutorError, ExecutorResult};
use crate::jobs::executor::{ExecutionContext, JobExecutor};
use crate::jobs::rate_limiter::RateLimiter;
use crate::jobs::registry::ExecutorRegistry;
use crate::jobs::retry::{RetryDecision, RetryPolicy};
use crate::jobs::types::{BatchId, Job, JobStatus};
use crate::store::JobStore;

/// Longest output summary stored in `status_message`
const MAX_SUMMARY_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherOptions {
    pub claim_limit: u32,
    pub concurrency: usize,
    pub job_timeout: Duration,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self::from(&DispatcherConfig::default())
    }
}

impl From<&DispatcherConfig> for DispatcherOptions {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            claim_limit: config.claim_limit,
            concurrency: config.concurrency.max(1),
            job_timeout: Duration::from_secs(config.job_timeout),
        }
    }
}

/// What one call to [`Dispatcher::run_cycle`] did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    /// Expired jobs, whether caught before or after claiming
    pub cancelled: usize,
    /// Returned to the queue untouched: rate limited or shutting down
    pub deferred: usize,
    /// Claims lost to stale-claim recovery before their executor started
    pub skipped: usize,
    /// Store calls that failed for a single job, or found it in a state
    /// this claim no longer owned
    pub errors: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        *self == CycleReport::default()
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::Retried => self.retried += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Cancelled => self.cancelled += 1,
            Outcome::Deferred => self.deferred += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Error => self.errors += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Retried,
    Failed,
    Cancelled,
    Deferred,
    Skipped,
    Error,
}

/// Moves due jobs through their executors
///
/// Any number of dispatchers may share one store; `claim_batch` keeps them
/// from running the same job twice.
#[derive(Clone)]
pub struct Dispatcher {
    jobs: Arc<dyn JobStore>,
    registry: Arc<ExecutorRegistry>,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    batches: BatchCoordinator,
    clock: Arc<dyn Clock>,
    options: DispatcherOptions,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        registry: Arc<ExecutorRegistry>,
        rate_limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        batches: BatchCoordinator,
        clock: Arc<dyn Clock>,
        options: DispatcherOptions,
    ) -> Self {
        Self {
            jobs,
            registry,
            rate_limiter,
            retry,
            batches,
            clock,
            options,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> &DispatcherOptions {
        &self.options
    }

    /// Cancelling this token stops new executions and signals running ones
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run one cycle. Only a failed claim fails the cycle as a whole;
    /// per-job store errors are logged and counted.
    pub async fn run_cycle(&self) -> AppResult<CycleReport> {
        let mut report = CycleReport::default();
        if self.shutdown.is_cancelled() {
            return Ok(report);
        }

        let now = self.clock.now();
        match self.jobs.cancel_expired(now).await {
            Ok(expired) => {
                report.cancelled += expired.len();
                for job in &expired {
                    tracing::info!(job.id = %job.id, kind = %job.kind, "Job expired before it was claimed");
                }
                self.refresh_batches(batch_ids(&expired)).await;
            }
            Err(e) => {
                report.errors += 1;
                tracing::error!(error = %e, "Cancelling expired jobs failed");
            }
        }

        let claimed = self.jobs.claim_batch(self.options.claim_limit, now).await?;
        report.claimed = claimed.len();
        if claimed.is_empty() {
            return Ok(report);
        }
        tracing::debug!(claimed = claimed.len(), "Claimed jobs");

        for batch_id in batch_ids(&claimed) {
            if let Err(e) = self.batches.mark_started(batch_id).await {
                tracing::warn!(batch.id = %batch_id, error = %e, "Marking batch started failed");
            }
        }

        let mut runnable = Vec::with_capacity(claimed.len());
        for job in claimed {
            match self.admit(&job, now).await {
                Ok(executor) => runnable.push((job, executor)),
                Err(outcome) => report.record(outcome),
            }
        }

        let runs: Vec<_> = runnable
            .into_iter()
            .map(|(job, executor)| self.run_job(job, executor))
            .collect();
        let outcomes: Vec<Outcome> = stream::iter(runs)
            .buffer_unordered(self.options.concurrency)
            .collect()
            .await;
        for outcome in outcomes {
            report.record(outcome);
        }

        tracing::info!(
            claimed = report.claimed,
            completed = report.completed,
            retried = report.retried,
            failed = report.failed,
            cancelled = report.cancelled,
            deferred = report.deferred,
            skipped = report.skipped,
            errors = report.errors,
            "Dispatch cycle finished"
        );
        Ok(report)
    }

    /// Gate a claimed job before execution. `Err` carries the outcome of a
    /// job that was settled without running.
    async fn admit(&self, job: &Job, now: Timestamp) -> Result<Arc<dyn JobExecutor>, Outcome> {
        if job.is_expired(now) {
            let message = AppError::Expired {
                job_id: job.id.to_string(),
            }
            .to_string();
            return Err(self.finish(job, JobStatus::Cancelled, message).await);
        }

        let Some(executor) = self.registry.get(job.kind) else {
            let message = format!("no executor registered for '{}'", job.kind);
            tracing::error!(job.id = %job.id, kind = %job.kind, "No executor registered");
            return Err(self.finish(job, JobStatus::Failed, message).await);
        };

        // Shutdown must not spend quota on a job that will only be deferred
        if self.shutdown.is_cancelled() {
            return Err(self.defer(job, "dispatcher shutting down".to_string()).await);
        }

        match self.rate_limiter.try_acquire(&job.resource_key, 1).await {
            Ok(true) => Ok(executor),
            Ok(false) => {
                let message = AppError::RateLimited {
                    resource: job.resource_key.clone(),
                }
                .to_string();
                tracing::debug!(job.id = %job.id, resource = %job.resource_key, "Rate limited, deferring");
                Err(self.defer(job, message).await)
            }
            Err(e) => {
                tracing::error!(job.id = %job.id, resource = %job.resource_key, error = %e, "Rate limit check failed");
                self.defer(job, format!("rate limit check failed: {e}")).await;
                Err(Outcome::Error)
            }
        }
    }

    async fn run_job(&self, job: Job, executor: Arc<dyn JobExecutor>) -> Outcome {
        // Jobs queued behind the concurrency limit can outlive `stale_after`
        // and be handed to another dispatcher. Nothing, not even a deferral,
        // may touch a job this claim lost.
        match self.jobs.mark_running(job.id, job.updated_at, self.clock.now()).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(job.id = %job.id, kind = %job.kind, "Job no longer held by this claim, skipping");
                return Outcome::Skipped;
            }
            Err(e) => {
                tracing::error!(job.id = %job.id, error = %e, "Marking job running failed");
                return Outcome::Error;
            }
        }

        if self.shutdown.is_cancelled() {
            return self.defer(&job, "dispatcher shutting down".to_string()).await;
        }

        let span = tracing::info_span!(
            "job",
            job.id = %job.id,
            job.kind = %job.kind,
            attempt = job.attempts + 1,
            executor = executor.name()
        );
        async {
            let result = self.execute(&job, executor.as_ref()).await;
            self.settle(&job, result).await
        }
        .instrument(span)
        .await
    }

    /// Invoke the executor under the per-job timeout, turning a panic into an
    /// ordinary transient failure
    async fn execute(&self, job: &Job, executor: &dyn JobExecutor) -> ExecutorResult<Option<JsonValue>> {
        let token = self.shutdown.child_token();
        let ctx = ExecutionContext::new(job, token.clone());
        let started = std::time::Instant::now();

        let call = AssertUnwindSafe(executor.execute(&ctx)).catch_unwind();
        let result = match tokio::time::timeout(self.options.job_timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(ExecutorError::Panicked {
                message: panic_message(panic.as_ref()),
            }),
            Err(_) => {
                token.cancel();
                Err(ExecutorError::Timeout {
                    seconds: self.options.job_timeout.as_secs(),
                })
            }
        };

        tracing::debug!(
            duration_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Executor returned"
        );
        result
    }

    async fn settle(&self, job: &Job, result: ExecutorResult<Option<JsonValue>>) -> Outcome {
        let error = match result {
            Ok(output) => {
                let summary = output.as_ref().map(summarize).unwrap_or_else(|| "ok".to_string());
                tracing::info!("Job completed");
                return self.finish(job, JobStatus::Completed, summary).await;
            }
            Err(error) => error,
        };

        let now = self.clock.now();
        let attempts = match self.jobs.increment_attempt(job.id, now).await {
            Ok(attempts) => attempts,
            Err(e) => {
                tracing::error!(error = %e, "Recording attempt failed");
                return Outcome::Error;
            }
        };

        match self
            .retry
            .next_action(attempts, job.max_attempts, error.failure_kind())
        {
            RetryDecision::Retry(delay) => {
                tracing::warn!(
                    error = %error,
                    attempts,
                    max_attempts = job.max_attempts,
                    delay_secs = delay.as_secs(),
                    "Job failed, retrying"
                );
                match self
                    .jobs
                    .reschedule(job.id, after(now, delay), Some(error.to_string()), now)
                    .await
                {
                    Ok(true) => Outcome::Retried,
                    Ok(false) => {
                        tracing::error!("Job left processing before it could be rescheduled");
                        Outcome::Error
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Rescheduling job failed");
                        Outcome::Error
                    }
                }
            }
            RetryDecision::Fail => {
                tracing::error!(
                    error = %error,
                    attempts,
                    max_attempts = job.max_attempts,
                    "Job failed permanently"
                );
                self.finish(job, JobStatus::Failed, error.to_string()).await
            }
        }
    }

    /// Persist a terminal status and refresh the owning batch
    async fn finish(&self, job: &Job, status: JobStatus, message: String) -> Outcome {
        let now = self.clock.now();
        match self
            .jobs
            .update_status(job.id, status, Some(message), now)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(job.id = %job.id, status = status.as_str(), "Job already settled elsewhere, status not stored");
                return Outcome::Error;
            }
            Err(e) => {
                tracing::error!(job.id = %job.id, status = status.as_str(), error = %e, "Storing job status failed");
                return Outcome::Error;
            }
        }

        if let Some(batch_id) = job.batch_id {
            self.refresh_batches([batch_id]).await;
        }

        match status {
            JobStatus::Completed => Outcome::Completed,
            JobStatus::Cancelled => Outcome::Cancelled,
            _ => Outcome::Failed,
        }
    }

    async fn defer(&self, job: &Job, message: String) -> Outcome {
        let now = self.clock.now();
        match self.jobs.reschedule(job.id, now, Some(message), now).await {
            Ok(true) => Outcome::Deferred,
            Ok(false) => {
                tracing::error!(job.id = %job.id, "Job left processing before it could be deferred");
                Outcome::Error
            }
            Err(e) => {
                tracing::error!(job.id = %job.id, error = %e, "Deferring job failed");
                Outcome::Error
            }
        }
    }

    async fn refresh_batches(&self, batch_ids: impl IntoIterator<Item = BatchId>) {
        for batch_id in batch_ids {
            if let Err(e) = self.batches.on_job_terminal(batch_id).await {
                tracing::error!(batch.id = %batch_id, error = %e, "Updating batch progress failed");
            }
        }
    }
}

fn batch_ids(jobs: &[Job]) -> BTreeSet<BatchId> {
    jobs.iter().filter_map(|job| job.batch_id).collect()
}

fn summarize(output: &JsonValue) -> String {
    let text = match output {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.len() <= MAX_SUMMARY_LEN {
        return text;
    }
    let mut end = MAX_SUMMARY_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;

    use crate::config::RateLimitRule;
    use crate::jobs::clock::ManualClock;
    use crate::jobs::types::{Actor, JobKind, NewJob};
    use crate::services::notifications::LogNotifier;
    use crate::store::MemoryStore;

    struct Noop;

    #[async_trait]
    impl JobExecutor for Noop {
        async fn execute(&self, _ctx: &ExecutionContext) -> ExecutorResult<Option<JsonValue>> {
            Ok(None)
        }

        fn name(&self) -> &str {
            "noop"
        }
    }

    fn dispatcher_with_quota(store: &MemoryStore, clock: &ManualClock) -> (Dispatcher, Arc<RateLimiter>) {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let mut registry = ExecutorRegistry::new();
        registry.register(JobKind::Image, Arc::new(Noop));
        let rules = HashMap::from([(
            "img".to_string(),
            RateLimitRule {
                max_requests: 1,
                window_seconds: 60,
            },
        )]);
        let rate_limiter = Arc::new(RateLimiter::new(rules, Arc::new(store.clone()), clock.clone()));
        let batches = BatchCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(LogNotifier),
            clock.clone(),
        );
        let dispatcher = Dispatcher::new(
            Arc::new(store.clone()),
            Arc::new(registry),
            rate_limiter.clone(),
            RetryPolicy::default(),
            batches,
            clock,
            DispatcherOptions::default(),
        );
        (dispatcher, rate_limiter)
    }

    #[tokio::test]
    async fn test_admit_during_shutdown_keeps_quota() {
        let start = Timestamp::from_second(1_700_000_000).unwrap();
        let store = MemoryStore::new();
        let clock = ManualClock::new(start);
        let (dispatcher, rate_limiter) = dispatcher_with_quota(&store, &clock);

        let job = NewJob::new(JobKind::Image, json!({}))
            .resource_key("img")
            .into_job(Uuid::new_v4(), start, 3, None, &Actor::system());
        let id = store.enqueue(job).await.unwrap();
        let claimed = store.claim_batch(1, start).await.unwrap().remove(0);

        dispatcher.shutdown_token().cancel();
        let outcome = dispatcher.admit(&claimed, start).await.err();
        assert_eq!(outcome, Some(Outcome::Deferred));

        let status = rate_limiter.remaining("img").await.unwrap();
        assert_eq!(status.remaining(), Some(1));
        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.attempts, 0);
    }

    #[tokio::test]
    async fn test_admit_spends_quota_when_running() {
        let start = Timestamp::from_second(1_700_000_000).unwrap();
        let store = MemoryStore::new();
        let clock = ManualClock::new(start);
        let (dispatcher, rate_limiter) = dispatcher_with_quota(&store, &clock);

        let job = NewJob::new(JobKind::Image, json!({}))
            .resource_key("img")
            .into_job(Uuid::new_v4(), start, 3, None, &Actor::system());
        store.enqueue(job).await.unwrap();
        let claimed = store.claim_batch(1, start).await.unwrap().remove(0);

        assert!(dispatcher.admit(&claimed, start).await.is_ok());
        let status = rate_limiter.remaining("img").await.unwrap();
        assert_eq!(status.remaining(), Some(0));
    }

    #[test]
    fn test_options_from_config() {
        let config = DispatcherConfig {
            concurrency: 0,
            job_timeout: 42,
            ..DispatcherConfig::default()
        };
        let options = DispatcherOptions::from(&config);
        assert_eq!(options.concurrency, 1);
        assert_eq!(options.job_timeout, Duration::from_secs(42));
        assert_eq!(options.claim_limit, config.claim_limit);
    }

    #[test]
    fn test_summarize() {
        assert_eq!(summarize(&json!("done")), "done");
        assert_eq!(summarize(&json!({"id": 1})), r#"{"id":1}"#);

        let long = summarize(&json!("ü".repeat(400)));
        assert!(long.ends_with("..."));
        assert!(long.len() <= MAX_SUMMARY_LEN + 3);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_report_idle() {
        let mut report = CycleReport::default();
        assert!(report.is_idle());
        report.record(Outcome::Deferred);
        assert_eq!(report.deferred, 1);
        assert!(!report.is_idle());

        let mut report = CycleReport::default();
        report.record(Outcome::Skipped);
        assert_eq!(report.skipped, 1);
        assert!(!report.is_idle());
    }
}
