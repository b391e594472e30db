//! Job engine: submission, dispatch, retries, rate limits and batches.
//!
//! The engine only talks to storage through the traits in [`crate::store`]
//! and takes time from an injected [`clock::Clock`].

pub mod batch;
pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod maintenance;
pub mod queue;
pub mod rate_limiter;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod tasks;
pub mod types;

#[cfg(test)]
mod tests;

pub use batch::{BatchCoordinator, BatchProgress};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{CycleReport, Dispatcher, DispatcherOptions};
pub use error::{ExecutorError, ExecutorResult, FailureKind};
pub use executor::{ExecutionContext, JobExecutor};
pub use maintenance::{CleanupReport, Maintenance, RecoveryReport};
pub use queue::{JobQueue, SubmissionDefaults};
pub use rate_limiter::{RateLimitStatus, RateLimiter};
pub use registry::ExecutorRegistry;
pub use retry::{BackoffStrategy, RetryDecision, RetryPolicy};
pub use scheduler::{JobScheduler, Triggers};
pub use types::{
    Actor, Batch, BatchId, BatchOptions, BatchStatus, Job, JobId, JobKind, JobStatus, NewJob,
    QueueStatistics, StatusCounts,
};
