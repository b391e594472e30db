//! Periodic upkeep: stale-claim recovery and retention cleanup.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::RetentionConfig;
use crate::error::AppResult;
use crate::jobs::batch::BatchCoordinator;
use crate::jobs::clock::{Clock, before};
use crate::store::{BatchStore, JobStore, UsageStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Abandoned `processing` jobs returned to the queue
    pub released: u64,
    /// Batches that reconciliation moved to a terminal state
    pub finalized: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub jobs: u64,
    pub batches: u64,
    pub usage_windows: u64,
}

#[derive(Clone)]
pub struct Maintenance {
    jobs: Arc<dyn JobStore>,
    batches: Arc<dyn BatchStore>,
    usage: Arc<dyn UsageStore>,
    coordinator: BatchCoordinator,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
    retention: RetentionConfig,
}

impl Maintenance {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        batches: Arc<dyn BatchStore>,
        usage: Arc<dyn UsageStore>,
        coordinator: BatchCoordinator,
        clock: Arc<dyn Clock>,
        stale_after: Duration,
        retention: RetentionConfig,
    ) -> Self {
        Self {
            jobs,
            batches,
            usage,
            coordinator,
            clock,
            stale_after,
            retention,
        }
    }

    /// Requeue jobs whose dispatcher vanished mid-flight, then reconcile
    /// open batches. A released job keeps its attempt count.
    pub async fn recover(&self) -> AppResult<RecoveryReport> {
        let now = self.clock.now();
        let released = self
            .jobs
            .release_stale(before(now, self.stale_after), now)
            .await?;
        if released > 0 {
            tracing::warn!(released, stale_after_secs = self.stale_after.as_secs(), "Released stale jobs");
        }

        let finalized = self.coordinator.reconcile().await?;
        Ok(RecoveryReport {
            released,
            finalized,
        })
    }

    /// Delete terminal jobs, finished batches and old rate-limit windows past
    /// their retention
    pub async fn cleanup(&self) -> AppResult<CleanupReport> {
        let now = self.clock.now();
        let job_cutoff = before(
            now,
            Duration::from_secs(u64::from(self.retention.job_retention_days) * 86_400),
        );
        let usage_cutoff = before(
            now,
            Duration::from_secs(u64::from(self.retention.usage_retention_hours) * 3_600),
        );

        let report = CleanupReport {
            jobs: self.jobs.purge_terminal(job_cutoff).await?,
            batches: self.batches.purge_finished(job_cutoff).await?,
            usage_windows: self.usage.purge_before(usage_cutoff).await?,
        };

        tracing::info!(
            jobs = report.jobs,
            batches = report.batches,
            usage_windows = report.usage_windows,
            "Retention cleanup finished"
        );
        Ok(report)
    }
}
