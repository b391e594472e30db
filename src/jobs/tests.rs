//! End-to-end engine scenarios against `MemoryStore` and a manual clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use serde_json::{Value as JsonValue, json};

use super::*;
use crate::config::RateLimitRule;
use crate::error::AppResult;
use crate::services::notifications::{BatchEvent, NotificationResult, NotificationSink};
use crate::store::{BatchStore, JobStore, MemoryStore};

// ============================================================================
// Test doubles
// ============================================================================

/// Behaves according to `payload.mode`
#[derive(Default)]
struct ScriptedExecutor {
    calls: Mutex<Vec<JobId>>,
}

impl ScriptedExecutor {
    fn calls(&self) -> Vec<JobId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobExecutor for ScriptedExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> ExecutorResult<Option<JsonValue>> {
        self.calls.lock().unwrap().push(ctx.job_id);
        match ctx.payload["mode"].as_str().unwrap_or("ok") {
            "transient" => Err(ExecutorError::transient("provider overloaded")),
            "permanent" => Err(ExecutorError::permanent("prompt rejected")),
            "sleep" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(None)
            }
            "panic" => panic!("executor bug"),
            _ => Ok(Some(json!({"attempt": ctx.attempt}))),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<BatchEvent>>,
}

impl RecordingNotifier {
    fn events(&self) -> Vec<BatchEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, event: &BatchEvent) -> AppResult<NotificationResult> {
        self.events.lock().unwrap().push(event.clone());
        Ok(NotificationResult::delivered())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

struct Harness {
    store: MemoryStore,
    clock: ManualClock,
    executor: Arc<ScriptedExecutor>,
    notifier: Arc<RecordingNotifier>,
    dispatcher: Dispatcher,
    queue: JobQueue,
}

fn start() -> Timestamp {
    Timestamp::from_second(1_700_000_000).unwrap()
}

fn harness(rules: HashMap<String, RateLimitRule>, job_timeout: Duration) -> Harness {
    let store = MemoryStore::new();
    let clock = ManualClock::new(start());
    let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let executor = Arc::new(ScriptedExecutor::default());
    let notifier = Arc::new(RecordingNotifier::default());

    let mut registry = ExecutorRegistry::new();
    for kind in JobKind::ALL {
        registry.register(kind, executor.clone());
    }
    let registry = Arc::new(registry);

    let batches = BatchCoordinator::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        notifier.clone(),
        shared_clock.clone(),
    );
    let rate_limiter = Arc::new(RateLimiter::new(
        rules,
        Arc::new(store.clone()),
        shared_clock.clone(),
    ));
    let retry = RetryPolicy::new(
        BackoffStrategy::Exponential { multiplier: 2.0 },
        Duration::from_secs(60),
        Duration::from_secs(3600),
    );
    let dispatcher = Dispatcher::new(
        Arc::new(store.clone()),
        registry.clone(),
        rate_limiter,
        retry,
        batches.clone(),
        shared_clock.clone(),
        DispatcherOptions {
            claim_limit: 10,
            concurrency: 4,
            job_timeout,
        },
    );
    let queue = JobQueue::new(
        Arc::new(store.clone()),
        batches,
        registry,
        shared_clock,
        SubmissionDefaults {
            max_attempts: 3,
            batch_size: 10,
            notify_on_complete: true,
        },
    );

    Harness {
        store,
        clock,
        executor,
        notifier,
        dispatcher,
        queue,
    }
}

fn default_harness() -> Harness {
    harness(HashMap::new(), Duration::from_secs(5))
}

impl Harness {
    async fn submit(&self, request: NewJob) -> JobId {
        self.queue.submit(request, &Actor::new("tests")).await.unwrap()
    }

    async fn job(&self, id: JobId) -> Job {
        self.store.get(id).await.unwrap().unwrap()
    }
}

fn content(mode: &str) -> NewJob {
    NewJob::new(JobKind::Content, json!({"mode": mode}))
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_success_completes_with_output_summary() {
    let h = default_harness();
    let id = h.submit(content("ok")).await;

    let report = h.dispatcher.run_cycle().await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.completed, 1);

    let job = h.job(id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.status_message.as_deref(), Some(r#"{"attempt":1}"#));

    assert!(h.dispatcher.run_cycle().await.unwrap().is_idle());
}

#[tokio::test]
async fn test_transient_failures_exhaust_attempts() {
    let h = default_harness();
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(h.submit(content("transient").max_attempts(2)).await);
    }

    let first = h.dispatcher.run_cycle().await.unwrap();
    assert_eq!((first.claimed, first.retried), (3, 3));
    for id in &ids {
        let job = h.job(*id).await;
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.scheduled_at, start() + jiff::SignedDuration::from_secs(60));
    }

    // Backoff not yet elapsed
    assert_eq!(h.dispatcher.run_cycle().await.unwrap().claimed, 0);

    h.clock.advance(Duration::from_secs(60));
    let second = h.dispatcher.run_cycle().await.unwrap();
    assert_eq!((second.claimed, second.failed), (3, 3));
    for id in &ids {
        let job = h.job(*id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 2);
        assert!(job.status_message.unwrap().contains("provider overloaded"));
    }

    h.clock.advance(Duration::from_secs(3600));
    assert!(h.dispatcher.run_cycle().await.unwrap().is_idle());
    assert_eq!(h.executor.calls().len(), 6);
}

#[tokio::test]
async fn test_attempts_never_exceed_max() {
    let h = default_harness();
    let ids = [
        h.submit(content("transient").max_attempts(1)).await,
        h.submit(content("transient").max_attempts(3)).await,
        h.submit(content("panic").max_attempts(4)).await,
    ];

    for _ in 0..10 {
        h.dispatcher.run_cycle().await.unwrap();
        for id in ids {
            let job = h.job(id).await;
            assert!(job.attempts <= job.max_attempts);
        }
        h.clock.advance(Duration::from_secs(3600));
    }

    for id in ids {
        let job = h.job(id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, job.max_attempts);
    }
}

#[tokio::test]
async fn test_permanent_failure_skips_retries() {
    let h = default_harness();
    let id = h.submit(content("permanent").max_attempts(5)).await;

    let report = h.dispatcher.run_cycle().await.unwrap();
    assert_eq!(report.failed, 1);

    let job = h.job(id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert!(job.status_message.unwrap().contains("prompt rejected"));
}

#[tokio::test]
async fn test_timeout_is_retried() {
    let h = harness(HashMap::new(), Duration::from_millis(50));
    let id = h.submit(content("sleep")).await;

    let report = h.dispatcher.run_cycle().await.unwrap();
    assert_eq!(report.retried, 1);

    let job = h.job(id).await;
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert!(job.status_message.unwrap().contains("timeout"));
}

#[tokio::test]
async fn test_panic_is_contained() {
    let h = default_harness();
    let panicking = h.submit(content("panic")).await;
    let healthy = h.submit(content("ok")).await;

    let report = h.dispatcher.run_cycle().await.unwrap();
    assert_eq!((report.retried, report.completed), (1, 1));

    let job = h.job(panicking).await;
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.status_message.unwrap().contains("executor bug"));
    assert_eq!(h.job(healthy).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_rate_limit_defers_without_attempt() {
    let rules = HashMap::from([(
        "img".to_string(),
        RateLimitRule {
            max_requests: 1,
            window_seconds: 60,
        },
    )]);
    let h = harness(rules, Duration::from_secs(5));
    let image = || NewJob::new(JobKind::Image, json!({"mode": "ok"})).resource_key("img");
    let ids = [h.submit(image()).await, h.submit(image()).await];

    let first = h.dispatcher.run_cycle().await.unwrap();
    assert_eq!((first.claimed, first.completed, first.deferred), (2, 1, 1));

    let deferred = {
        let mut pending = Vec::new();
        for id in ids {
            let job = h.job(id).await;
            if job.status == JobStatus::Pending {
                pending.push(job);
            }
        }
        assert_eq!(pending.len(), 1);
        pending.remove(0)
    };
    assert_eq!(deferred.attempts, 0);
    assert!(deferred.status_message.as_deref().unwrap().contains("img"));

    // Same window: claimed again, deferred again
    let second = h.dispatcher.run_cycle().await.unwrap();
    assert_eq!((second.claimed, second.deferred), (1, 1));

    h.clock.advance(Duration::from_secs(60));
    let third = h.dispatcher.run_cycle().await.unwrap();
    assert_eq!(third.completed, 1);
    assert_eq!(h.job(deferred.id).await.attempts, 0);
    assert_eq!(h.executor.calls().len(), 2);
}

#[tokio::test]
async fn test_batch_size_paces_members_and_notifies_once() {
    let h = default_harness();
    let items = (0..5)
        .map(|i| NewJob::new(JobKind::BatchMember, json!({"mode": "ok", "item": i})))
        .collect();
    let options = BatchOptions {
        batch_size: 2,
        max_attempts: 3,
        notify_on_complete: true,
    };
    let batch_id = h
        .queue
        .submit_batch(items, Some(options), &Actor::new("tests"))
        .await
        .unwrap();

    let mut claimed = Vec::new();
    for _ in 0..3 {
        claimed.push(h.dispatcher.run_cycle().await.unwrap().claimed);
    }
    assert_eq!(claimed, vec![2, 2, 1]);

    let progress = h.queue.batch_progress(batch_id).await.unwrap();
    assert_eq!(progress.batch.status, BatchStatus::Completed);
    assert_eq!(progress.batch.processed_items, 5);
    assert_eq!(progress.batch.failed_items, 0);
    assert_eq!(progress.counts.completed, 5);

    h.dispatcher.run_cycle().await.unwrap();
    let events = h.notifier.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        BatchEvent::BatchCompleted { processed_items: 5, .. }
    ));
}

#[tokio::test]
async fn test_batch_conservation_with_mixed_outcomes() {
    let h = default_harness();
    let modes = ["ok", "permanent", "ok", "transient"];
    let items = modes
        .iter()
        .map(|mode| NewJob::new(JobKind::BatchMember, json!({"mode": mode})))
        .collect();
    let options = BatchOptions {
        batch_size: 10,
        max_attempts: 2,
        notify_on_complete: true,
    };
    let batch_id = h
        .queue
        .submit_batch(items, Some(options), &Actor::system())
        .await
        .unwrap();

    for _ in 0..5 {
        h.dispatcher.run_cycle().await.unwrap();
        let batch = h.store.get_batch(batch_id).await.unwrap().unwrap();
        let counts = h.store.count_by_batch_status(batch_id).await.unwrap();
        assert_eq!(counts.total(), u64::from(batch.total_items));
        assert!(batch.processed_items + batch.failed_items <= batch.total_items);
        h.clock.advance(Duration::from_secs(600));
    }

    let batch = h.store.get_batch(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    assert_eq!((batch.processed_items, batch.failed_items), (2, 2));
    assert_eq!(batch.remaining(), 0);

    let events = h.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name(), "batch_failed");
}

#[tokio::test]
async fn test_expired_job_is_cancelled_not_run() {
    let h = default_harness();
    let expires_at = start() + jiff::SignedDuration::from_secs(10);
    let id = h
        .submit(content("ok").run_at(start() + jiff::SignedDuration::from_secs(5)).expires_at(expires_at))
        .await;

    h.clock.advance(Duration::from_secs(20));
    let report = h.dispatcher.run_cycle().await.unwrap();
    assert_eq!((report.claimed, report.cancelled), (0, 1));

    let job = h.job(id).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.status_message.is_some());
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn test_cancelled_job_is_never_claimed() {
    let h = default_harness();
    let id = h.submit(content("ok")).await;
    assert!(h.queue.cancel(id, &Actor::new("ops")).await.unwrap());

    assert!(h.dispatcher.run_cycle().await.unwrap().is_idle());
    assert_eq!(h.job(id).await.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_terminal_status_is_sticky() {
    let h = default_harness();
    let id = h.submit(content("ok")).await;
    h.dispatcher.run_cycle().await.unwrap();

    let now = h.clock.now();
    assert!(!h
        .store
        .update_status(id, JobStatus::Completed, None, now)
        .await
        .unwrap());
    assert!(!h
        .store
        .update_status(id, JobStatus::Failed, Some("late".into()), now)
        .await
        .unwrap());
    assert_eq!(h.job(id).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_priority_order() {
    let h = harness(HashMap::new(), Duration::from_secs(5));
    let low = h.submit(content("ok").priority(-1)).await;
    let high = h.submit(content("ok").priority(10)).await;
    let normal = h.submit(content("ok")).await;

    let dispatcher = Dispatcher::new(
        Arc::new(h.store.clone()),
        Arc::new({
            let mut registry = ExecutorRegistry::new();
            registry.register(JobKind::Content, h.executor.clone());
            registry
        }),
        Arc::new(RateLimiter::new(
            HashMap::new(),
            Arc::new(h.store.clone()),
            Arc::new(h.clock.clone()),
        )),
        RetryPolicy::default(),
        BatchCoordinator::new(
            Arc::new(h.store.clone()),
            Arc::new(h.store.clone()),
            h.notifier.clone(),
            Arc::new(h.clock.clone()),
        ),
        Arc::new(h.clock.clone()),
        DispatcherOptions {
            claim_limit: 10,
            concurrency: 1,
            job_timeout: Duration::from_secs(5),
        },
    );
    dispatcher.run_cycle().await.unwrap();
    assert_eq!(h.executor.calls(), vec![high, normal, low]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatchers_never_double_run() {
    let h = default_harness();
    let mut ids = Vec::new();
    for i in 0..40 {
        ids.push(h.submit(NewJob::new(JobKind::Content, json!({"mode": "ok", "i": i}))).await);
    }

    let dispatchers: Vec<_> = (0..4).map(|_| h.dispatcher.clone()).collect();
    let handles: Vec<_> = dispatchers
        .into_iter()
        .map(|d| tokio::spawn(async move {
            let mut total = 0;
            for _ in 0..5 {
                total += d.run_cycle().await.unwrap().completed;
            }
            total
        }))
        .collect();

    let mut completed = 0;
    for handle in handles {
        completed += handle.await.unwrap();
    }
    assert_eq!(completed, 40);

    let mut calls = h.executor.calls();
    calls.sort();
    calls.dedup();
    assert_eq!(calls.len(), 40);
    assert_eq!(h.executor.calls().len(), 40);
}

#[tokio::test]
async fn test_shutdown_stops_dispatch() {
    let h = default_harness();
    h.submit(content("ok")).await;

    h.dispatcher.shutdown_token().cancel();
    assert!(h.dispatcher.run_cycle().await.unwrap().is_idle());
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn test_statistics_reflect_queue() {
    let h = default_harness();
    h.submit(content("ok")).await;
    h.submit(content("permanent")).await;
    h.submit(content("ok").run_at(start() + jiff::SignedDuration::from_secs(3600))).await;

    h.dispatcher.run_cycle().await.unwrap();
    let stats = h.queue.statistics().await.unwrap();
    assert_eq!(stats.jobs.completed, 1);
    assert_eq!(stats.jobs.failed, 1);
    assert_eq!(stats.jobs.pending, 1);
    assert_eq!(
        stats.oldest_pending,
        Some(start() + jiff::SignedDuration::from_secs(3600))
    );
}

/// Advances the clock by a job timeout's worth per call; on the fourth call
/// it plays a second process whose recovery and claim run mid-cycle
struct StallingExecutor {
    clock: ManualClock,
    store: MemoryStore,
    calls: Mutex<Vec<JobId>>,
    reclaimed: Mutex<Vec<Job>>,
}

#[async_trait]
impl JobExecutor for StallingExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> ExecutorResult<Option<JsonValue>> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(ctx.job_id);
            calls.len()
        };
        self.clock.advance(Duration::from_secs(299));

        if call == 4 {
            let now = self.clock.now();
            let stale_before = clock::before(now, Duration::from_secs(900));
            self.store.release_stale(stale_before, now).await.unwrap();
            let claimed = self.store.claim_batch(20, now).await.unwrap();
            *self.reclaimed.lock().unwrap() = claimed;
        }
        Ok(None)
    }
}

#[tokio::test]
async fn test_recovery_mid_cycle_never_double_runs() {
    let h = default_harness();
    let executor = Arc::new(StallingExecutor {
        clock: h.clock.clone(),
        store: h.store.clone(),
        calls: Mutex::new(Vec::new()),
        reclaimed: Mutex::new(Vec::new()),
    });
    for i in 0..5 {
        h.submit(NewJob::new(JobKind::Content, json!({"i": i}))).await;
    }

    let dispatcher = Dispatcher::new(
        Arc::new(h.store.clone()),
        Arc::new({
            let mut registry = ExecutorRegistry::new();
            registry.register(JobKind::Content, executor.clone());
            registry
        }),
        Arc::new(RateLimiter::new(
            HashMap::new(),
            Arc::new(h.store.clone()),
            Arc::new(h.clock.clone()),
        )),
        RetryPolicy::default(),
        BatchCoordinator::new(
            Arc::new(h.store.clone()),
            Arc::new(h.store.clone()),
            h.notifier.clone(),
            Arc::new(h.clock.clone()),
        ),
        Arc::new(h.clock.clone()),
        DispatcherOptions {
            claim_limit: 5,
            concurrency: 1,
            job_timeout: Duration::from_secs(300),
        },
    );

    let report = dispatcher.run_cycle().await.unwrap();
    assert_eq!(report.claimed, 5);
    assert_eq!(report.completed, 4);
    assert_eq!(report.skipped, 1);

    let calls = executor.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 4);

    // The started job kept its claim; only the queued one moved
    let reclaimed = executor.reclaimed.lock().unwrap().clone();
    assert_eq!(reclaimed.len(), 1);
    assert!(!calls.contains(&reclaimed[0].id));

    let job = h.job(reclaimed[0].id).await;
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.updated_at, reclaimed[0].updated_at);
}
