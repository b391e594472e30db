//! In-process store
//!
//! Implements all three store traits over one mutex-guarded state, so every
//! operation is trivially atomic. Used by tests and by `--dry-run`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use jiff::Timestamp;

use crate::error::{AppError, AppResult};
use crate::jobs::types::{
    Batch, BatchId, BatchStatus, Job, JobId, JobStatus, QueueStatistics, StatusCounts,
};
use crate::store::traits::{BatchStore, JobStore, UsageStore};

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<JobId, Job>,
    batches: HashMap<BatchId, Batch>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    usage: Arc<DashMap<(String, Timestamp), u32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> AppResult<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| AppError::Internal {
            source: anyhow::anyhow!("memory store lock poisoned"),
        })
    }

    fn duplicate(entity: &str, id: impl ToString) -> AppError {
        AppError::Duplicate {
            entity: entity.to_string(),
            field: "id".to_string(),
            value: id.to_string(),
        }
    }
}

fn claim_order(a: &Job, b: &Job) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn enqueue(&self, job: Job) -> AppResult<JobId> {
        let mut state = self.state()?;
        if state.jobs.contains_key(&job.id) {
            return Err(Self::duplicate("jobs", job.id));
        }
        if let Some(batch_id) = job.batch_id
            && !state.batches.contains_key(&batch_id)
        {
            return Err(AppError::validation(
                "batch_id",
                format!("batch {batch_id} does not exist"),
            ));
        }

        let id = job.id;
        state.jobs.insert(id, job);
        Ok(id)
    }

    async fn claim_batch(&self, limit: u32, now: Timestamp) -> AppResult<Vec<Job>> {
        let mut state = self.state()?;

        let mut candidates: Vec<&Job> = state.jobs.values().filter(|j| j.is_due(now)).collect();
        candidates.sort_by(|a, b| claim_order(a, b));

        let mut per_batch: HashMap<BatchId, u32> = HashMap::new();
        let mut chosen = Vec::new();
        for job in candidates {
            if chosen.len() >= limit as usize {
                break;
            }
            if let Some(batch_id) = job.batch_id {
                let cap = state
                    .batches
                    .get(&batch_id)
                    .map_or(u32::MAX, |b| b.options.batch_size);
                let taken = per_batch.entry(batch_id).or_insert(0);
                if *taken >= cap {
                    continue;
                }
                *taken += 1;
            }
            chosen.push(job.id);
        }

        let mut claimed = Vec::with_capacity(chosen.len());
        for id in chosen {
            if let Some(job) = state.jobs.get_mut(&id) {
                job.status = JobStatus::Processing;
                job.updated_at = now;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        message: Option<String>,
        now: Timestamp,
    ) -> AppResult<bool> {
        let mut state = self.state()?;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status == status || job.status.is_terminal() {
            return Ok(false);
        }

        job.status = status;
        job.status_message = message;
        job.updated_at = now;
        Ok(true)
    }

    async fn mark_running(
        &self,
        id: JobId,
        claimed_at: Timestamp,
        now: Timestamp,
    ) -> AppResult<bool> {
        let mut state = self.state()?;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Processing || job.updated_at != claimed_at {
            return Ok(false);
        }

        job.updated_at = now;
        Ok(true)
    }

    async fn increment_attempt(&self, id: JobId, now: Timestamp) -> AppResult<u32> {
        let mut state = self.state()?;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("Job", id))?;

        job.attempts = job.attempts.saturating_add(1).min(job.max_attempts);
        job.updated_at = now;
        Ok(job.attempts)
    }

    async fn reschedule(
        &self,
        id: JobId,
        at: Timestamp,
        message: Option<String>,
        now: Timestamp,
    ) -> AppResult<bool> {
        let mut state = self.state()?;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Processing {
            return Ok(false);
        }

        job.status = JobStatus::Pending;
        job.scheduled_at = job.scheduled_at.max(at);
        job.status_message = message;
        job.updated_at = now;
        Ok(true)
    }

    async fn cancel(&self, id: JobId, now: Timestamp) -> AppResult<bool> {
        let mut state = self.state()?;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Pending {
            return Ok(false);
        }

        job.status = JobStatus::Cancelled;
        job.status_message = Some("cancelled by request".to_string());
        job.updated_at = now;
        Ok(true)
    }

    async fn get(&self, id: JobId) -> AppResult<Option<Job>> {
        Ok(self.state()?.jobs.get(&id).cloned())
    }

    async fn find_by_batch(&self, batch_id: BatchId) -> AppResult<Vec<Job>> {
        let state = self.state()?;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| j.batch_id == Some(batch_id))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn count_by_batch_status(&self, batch_id: BatchId) -> AppResult<StatusCounts> {
        let state = self.state()?;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.batch_id == Some(batch_id))
            .map(|j| j.status)
            .collect())
    }

    async fn cancel_expired(&self, now: Timestamp) -> AppResult<Vec<Job>> {
        let mut state = self.state()?;
        let mut cancelled = Vec::new();
        for job in state.jobs.values_mut() {
            if job.status == JobStatus::Pending && job.is_expired(now) {
                job.status = JobStatus::Cancelled;
                job.status_message = Some("expired before execution".to_string());
                job.updated_at = now;
                cancelled.push(job.clone());
            }
        }
        Ok(cancelled)
    }

    async fn release_stale(&self, before: Timestamp, now: Timestamp) -> AppResult<u64> {
        let mut state = self.state()?;
        let mut released = 0;
        for job in state.jobs.values_mut() {
            if job.status == JobStatus::Processing && job.updated_at < before {
                job.status = JobStatus::Pending;
                job.status_message = Some("released after stalled claim".to_string());
                job.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn purge_terminal(&self, before: Timestamp) -> AppResult<u64> {
        let mut state = self.state()?;
        let count = state.jobs.len();
        state
            .jobs
            .retain(|_, j| !(j.status.is_terminal() && j.updated_at < before));
        Ok((count - state.jobs.len()) as u64)
    }

    async fn statistics(&self) -> AppResult<QueueStatistics> {
        let state = self.state()?;
        Ok(QueueStatistics {
            jobs: state.jobs.values().map(|j| j.status).collect(),
            open_batches: state
                .batches
                .values()
                .filter(|b| !b.is_terminal())
                .count() as u64,
            oldest_pending: state
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Pending)
                .map(|j| j.scheduled_at)
                .min(),
        })
    }
}

#[async_trait]
impl BatchStore for MemoryStore {
    async fn create_with_jobs(&self, batch: Batch, jobs: Vec<Job>) -> AppResult<BatchId> {
        let mut state = self.state()?;
        if state.batches.contains_key(&batch.id) {
            return Err(Self::duplicate("batches", batch.id));
        }
        if let Some(job) = jobs.iter().find(|j| state.jobs.contains_key(&j.id)) {
            return Err(Self::duplicate("jobs", job.id));
        }

        let id = batch.id;
        state.batches.insert(id, batch);
        for job in jobs {
            state.jobs.insert(job.id, job);
        }
        Ok(id)
    }

    async fn get_batch(&self, id: BatchId) -> AppResult<Option<Batch>> {
        Ok(self.state()?.batches.get(&id).cloned())
    }

    async fn mark_processing(&self, id: BatchId, now: Timestamp) -> AppResult<bool> {
        let mut state = self.state()?;
        match state.batches.get_mut(&id) {
            Some(batch) if batch.status == BatchStatus::Pending => {
                batch.status = BatchStatus::Processing;
                batch.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_progress(
        &self,
        id: BatchId,
        processed_items: u32,
        failed_items: u32,
        status: BatchStatus,
        now: Timestamp,
    ) -> AppResult<bool> {
        let mut state = self.state()?;
        let batch = state
            .batches
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("Batch", id))?;
        if batch.is_terminal() {
            return Ok(false);
        }

        let changed = batch.status != status;
        batch.processed_items = processed_items;
        batch.failed_items = failed_items;
        batch.status = status;
        batch.updated_at = now;
        if status.is_terminal() {
            batch.completed_at = Some(now);
        }
        Ok(changed)
    }

    async fn open_batches(&self) -> AppResult<Vec<BatchId>> {
        let state = self.state()?;
        let mut open: Vec<&Batch> = state.batches.values().filter(|b| !b.is_terminal()).collect();
        open.sort_by_key(|b| b.created_at);
        Ok(open.into_iter().map(|b| b.id).collect())
    }

    async fn purge_finished(&self, before: Timestamp) -> AppResult<u64> {
        let mut state = self.state()?;
        let MemoryState { jobs, batches } = &mut *state;
        let count = batches.len();
        batches.retain(|id, b| {
            let finished = b.is_terminal() && b.completed_at.is_some_and(|at| at < before);
            !(finished && !jobs.values().any(|j| j.batch_id == Some(*id)))
        });
        Ok((count - batches.len()) as u64)
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn try_consume(
        &self,
        resource_key: &str,
        window_start: Timestamp,
        cost: u32,
        limit: u32,
        _now: Timestamp,
    ) -> AppResult<bool> {
        let granted = match self.usage.entry((resource_key.to_string(), window_start)) {
            Entry::Occupied(mut entry) => {
                let used = entry.get().saturating_add(cost);
                if used > limit {
                    false
                } else {
                    *entry.get_mut() = used;
                    true
                }
            }
            Entry::Vacant(entry) => {
                if cost > limit {
                    false
                } else {
                    entry.insert(cost);
                    true
                }
            }
        };
        Ok(granted)
    }

    async fn usage(&self, resource_key: &str, window_start: Timestamp) -> AppResult<u32> {
        Ok(self
            .usage
            .get(&(resource_key.to_string(), window_start))
            .map_or(0, |used| *used))
    }

    async fn purge_before(&self, before: Timestamp) -> AppResult<u64> {
        let mut removed = 0;
        self.usage.retain(|(_, window_start), _| {
            let keep = *window_start >= before;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
