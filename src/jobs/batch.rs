//! Batch lifecycle: creation, progress tracking and completion events.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::jobs::clock::Clock;
use crate::jobs::types::{
    Actor, Batch, BatchId, BatchOptions, BatchStatus, NewJob, StatusCounts,
};
use crate::services::notifications::{BatchEvent, NotificationSink};
use crate::store::{BatchStore, JobStore};

/// A batch with live per-status member counts
#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    pub batch: Batch,
    pub counts: StatusCounts,
}

#[derive(Clone)]
pub struct BatchCoordinator {
    jobs: Arc<dyn JobStore>,
    batches: Arc<dyn BatchStore>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl BatchCoordinator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        batches: Arc<dyn BatchStore>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            jobs,
            batches,
            notifier,
            clock,
        }
    }

    /// Store the batch and one pending job per item atomically.
    ///
    /// Items that do not set `max_attempts` inherit the batch's.
    pub async fn create_batch(
        &self,
        items: Vec<NewJob>,
        options: BatchOptions,
        actor: &Actor,
    ) -> AppResult<BatchId> {
        if items.is_empty() {
            return Err(AppError::validation("items", "a batch needs at least one item"));
        }
        options.validate()?;
        for item in &items {
            item.validate()?;
        }
        let total_items = u32::try_from(items.len())
            .map_err(|_| AppError::validation("items", "too many items"))?;

        let now = self.clock.now();
        let batch_id = Uuid::new_v4();
        let jobs = items
            .into_iter()
            .map(|item| {
                item.into_job(
                    Uuid::new_v4(),
                    now,
                    options.max_attempts,
                    Some(batch_id),
                    actor,
                )
            })
            .collect();

        let batch = Batch {
            id: batch_id,
            status: BatchStatus::Pending,
            total_items,
            processed_items: 0,
            failed_items: 0,
            options,
            created_by: Some(actor.name().to_string()),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        let id = self.batches.create_with_jobs(batch, jobs).await?;
        tracing::info!(
            batch.id = %id,
            total_items,
            batch_size = options.batch_size,
            actor = actor.name(),
            "Batch created"
        );
        Ok(id)
    }

    /// A member was claimed for the first time
    pub async fn mark_started(&self, batch_id: BatchId) -> AppResult<()> {
        if self.batches.mark_processing(batch_id, self.clock.now()).await? {
            tracing::debug!(batch.id = %batch_id, "Batch processing");
        }
        Ok(())
    }

    /// Recompute progress after a member changed state.
    ///
    /// Returns the new status when this call moved the batch to a terminal
    /// state. Only that caller sends the notification.
    pub async fn on_job_terminal(&self, batch_id: BatchId) -> AppResult<Option<BatchStatus>> {
        let batch = self
            .batches
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| AppError::not_found("Batch", batch_id))?;
        if batch.is_terminal() {
            return Ok(None);
        }

        let counts = self.jobs.count_by_batch_status(batch_id).await?;
        // Purged members must not shrink the counters
        let processed = batch.processed_items.max(saturate(counts.completed));
        let failed = batch
            .failed_items
            .max(saturate(counts.failed + counts.cancelled));

        // Cancelled members count against the batch: with none failed, a
        // single cancellation still makes it `Failed`
        let status = if counts.open() == 0 {
            if failed == 0 {
                BatchStatus::Completed
            } else {
                BatchStatus::Failed
            }
        } else if counts.processing > 0 || processed + failed > 0 {
            BatchStatus::Processing
        } else {
            batch.status
        };

        let now = self.clock.now();
        let changed = self
            .batches
            .update_progress(batch_id, processed, failed, status, now)
            .await?;
        if !(changed && status.is_terminal()) {
            return Ok(None);
        }

        tracing::info!(
            batch.id = %batch_id,
            status = status.as_str(),
            processed_items = processed,
            failed_items = failed,
            "Batch finished"
        );

        if batch.options.notify_on_complete {
            let finished = Batch {
                status,
                processed_items: processed,
                failed_items: failed,
                updated_at: now,
                completed_at: Some(now),
                ..batch
            };
            if let Some(event) = BatchEvent::from_batch(&finished, now) {
                self.notify(&event).await;
            }
        }

        Ok(Some(status))
    }

    /// Recompute every open batch. Heals progress updates lost to a crash.
    pub async fn reconcile(&self) -> AppResult<usize> {
        let open = self.batches.open_batches().await?;
        let mut finished = 0;
        for batch_id in open {
            match self.on_job_terminal(batch_id).await {
                Ok(Some(_)) => finished += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(batch.id = %batch_id, error = %e, "Batch reconciliation failed");
                }
            }
        }
        if finished > 0 {
            tracing::info!(finished, "Reconciliation finalized batches");
        }
        Ok(finished)
    }

    pub async fn get_batch(&self, batch_id: BatchId) -> AppResult<BatchProgress> {
        let batch = self
            .batches
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| AppError::not_found("Batch", batch_id))?;
        let counts = self.jobs.count_by_batch_status(batch_id).await?;
        Ok(BatchProgress { batch, counts })
    }

    async fn notify(&self, event: &BatchEvent) {
        match self.notifier.notify(event).await {
            Ok(result) if result.success => {
                tracing::debug!(
                    sink = self.notifier.name(),
                    event = event.name(),
                    batch.id = %event.batch_id(),
                    duration_ms = result.duration_ms,
                    "Notification delivered"
                );
            }
            Ok(result) => {
                tracing::warn!(
                    sink = self.notifier.name(),
                    event = event.name(),
                    batch.id = %event.batch_id(),
                    status_code = ?result.status_code,
                    response = ?result.response,
                    "Notification rejected"
                );
            }
            Err(e) => {
                tracing::error!(
                    sink = self.notifier.name(),
                    event = event.name(),
                    batch.id = %event.batch_id(),
                    error = %e,
                    "Notification failed"
                );
            }
        }
    }
}

fn saturate(count: u64) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::clock::ManualClock;
    use crate::jobs::types::{JobKind, JobStatus};
    use crate::services::notifications::NotificationResult;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use jiff::Timestamp;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<BatchEvent>>,
    }

    #[async_trait]
    impl NotificationSink for Recorder {
        async fn notify(&self, event: &BatchEvent) -> AppResult<NotificationResult> {
            self.events.lock().unwrap().push(event.clone());
            Ok(NotificationResult::delivered())
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    fn setup() -> (BatchCoordinator, MemoryStore, Arc<Recorder>) {
        let store = MemoryStore::new();
        let recorder = Arc::new(Recorder::default());
        let clock = Arc::new(ManualClock::new(Timestamp::from_second(1_700_000_000).unwrap()));
        let coordinator = BatchCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            recorder.clone(),
            clock,
        );
        (coordinator, store, recorder)
    }

    fn options(notify: bool) -> BatchOptions {
        BatchOptions {
            batch_size: 2,
            max_attempts: 4,
            notify_on_complete: notify,
        }
    }

    fn items(n: usize) -> Vec<NewJob> {
        (0..n)
            .map(|i| NewJob::new(JobKind::BatchMember, json!({"item": i})))
            .collect()
    }

    #[tokio::test]
    async fn test_create_batch_inserts_members() {
        let (coordinator, store, _) = setup();
        let id = coordinator
            .create_batch(items(3), options(true), &Actor::new("ops"))
            .await
            .unwrap();

        let members = store.find_by_batch(id).await.unwrap();
        assert_eq!(members.len(), 3);
        assert!(members.iter().all(|j| j.max_attempts == 4 && j.batch_id == Some(id)));

        let progress = coordinator.get_batch(id).await.unwrap();
        assert_eq!(progress.batch.total_items, 3);
        assert_eq!(progress.batch.created_by.as_deref(), Some("ops"));
        assert_eq!(progress.counts.pending, 3);
    }

    #[tokio::test]
    async fn test_create_batch_rejects_empty_and_bad_options() {
        let (coordinator, _, _) = setup();
        assert!(matches!(
            coordinator.create_batch(vec![], options(true), &Actor::system()).await,
            Err(AppError::Validation { .. })
        ));

        let mut bad = options(true);
        bad.batch_size = 0;
        assert!(matches!(
            coordinator.create_batch(items(1), bad, &Actor::system()).await,
            Err(AppError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_terminal_transition_notifies_once() {
        let (coordinator, store, recorder) = setup();
        let id = coordinator
            .create_batch(items(2), options(true), &Actor::system())
            .await
            .unwrap();
        let now = Timestamp::from_second(1_700_000_001).unwrap();

        let members = store.find_by_batch(id).await.unwrap();
        store
            .update_status(members[0].id, JobStatus::Completed, None, now)
            .await
            .unwrap();
        assert_eq!(coordinator.on_job_terminal(id).await.unwrap(), None);
        assert_eq!(
            store.get_batch(id).await.unwrap().unwrap().status,
            BatchStatus::Processing
        );

        store.cancel(members[1].id, now).await.unwrap();
        assert_eq!(
            coordinator.on_job_terminal(id).await.unwrap(),
            Some(BatchStatus::Failed)
        );
        assert_eq!(coordinator.on_job_terminal(id).await.unwrap(), None);
        assert_eq!(coordinator.reconcile().await.unwrap(), 0);

        let batch = store.get_batch(id).await.unwrap().unwrap();
        assert_eq!((batch.processed_items, batch.failed_items), (1, 1));
        assert!(batch.completed_at.is_some());

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "batch_failed");
    }

    #[tokio::test]
    async fn test_cancelled_members_fail_the_batch() {
        let (coordinator, store, recorder) = setup();
        let id = coordinator
            .create_batch(items(3), options(true), &Actor::system())
            .await
            .unwrap();
        let now = Timestamp::from_second(1_700_000_001).unwrap();

        let members = store.find_by_batch(id).await.unwrap();
        store
            .update_status(members[0].id, JobStatus::Completed, None, now)
            .await
            .unwrap();
        store.cancel(members[1].id, now).await.unwrap();
        store.cancel(members[2].id, now).await.unwrap();

        let counts = store.count_by_batch_status(id).await.unwrap();
        assert_eq!((counts.completed, counts.failed, counts.cancelled), (1, 0, 2));
        assert_eq!(
            coordinator.on_job_terminal(id).await.unwrap(),
            Some(BatchStatus::Failed)
        );

        let batch = store.get_batch(id).await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!((batch.processed_items, batch.failed_items), (1, 2));

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            BatchEvent::BatchFailed {
                total_items: 3,
                processed_items: 1,
                failed_items: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_silent_batch_and_reconcile() {
        let (coordinator, store, recorder) = setup();
        let id = coordinator
            .create_batch(items(1), options(false), &Actor::system())
            .await
            .unwrap();
        let member = store.find_by_batch(id).await.unwrap().remove(0);
        store
            .update_status(member.id, JobStatus::Completed, None, Timestamp::from_second(1_700_000_002).unwrap())
            .await
            .unwrap();

        assert_eq!(coordinator.reconcile().await.unwrap(), 1);
        assert_eq!(
            store.get_batch(id).await.unwrap().unwrap().status,
            BatchStatus::Completed
        );
        assert!(recorder.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_batch() {
        let (coordinator, _, _) = setup();
        assert!(matches!(
            coordinator.on_job_terminal(Uuid::new_v4()).await,
            Err(AppError::NotFound { .. })
        ));
    }
}
