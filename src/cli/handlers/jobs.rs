//! Handlers for single-job and queue-wide commands

use serde::Serialize;

use crate::cli::parser::SubmitArgs;
use crate::error::AppResult;
use crate::jobs::{Actor, CleanupReport, Job, JobId, NewJob, QueueStatistics, RateLimitStatus};
use crate::state::AppState;

use super::print_json;

#[derive(Debug, Serialize)]
struct StatsOutput {
    queue: QueueStatistics,
    rate_limits: Vec<RateLimitStatus>,
}

/// Handler for `submit`, `status`, `cancel`, `stats` and `cleanup`
pub struct JobCommandHandler {
    state: AppState,
}

impl JobCommandHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn submit(&self, args: SubmitArgs) -> AppResult<JobId> {
        let mut request = NewJob::new(args.kind, args.payload).priority(args.priority);
        if let Some(max_attempts) = args.max_attempts {
            request = request.max_attempts(max_attempts);
        }
        if let Some(at) = args.run_at {
            request = request.run_at(at);
        }
        if let Some(at) = args.expires_at {
            request = request.expires_at(at);
        }
        if let Some(key) = args.resource_key {
            request = request.resource_key(key);
        }

        let id = self.state.queue.submit(request, &Actor::new(args.actor)).await?;
        println!("{id}");
        Ok(id)
    }

    pub async fn status(&self, id: JobId) -> AppResult<Job> {
        let job = self.state.queue.get(id).await?;
        print_json(&job)?;
        Ok(job)
    }

    pub async fn cancel(&self, id: JobId, actor: &str) -> AppResult<bool> {
        let cancelled = self.state.queue.cancel(id, &Actor::new(actor)).await?;
        if cancelled {
            println!("✓ Job {id} cancelled");
        } else {
            println!("Job {id} is no longer pending; nothing cancelled");
        }
        Ok(cancelled)
    }

    pub async fn stats(&self) -> AppResult<()> {
        let output = StatsOutput {
            queue: self.state.queue.statistics().await?,
            rate_limits: self.state.rate_limiter.snapshot().await?,
        };
        print_json(&output)
    }

    pub async fn cleanup(&self) -> AppResult<CleanupReport> {
        let report = self.state.maintenance.cleanup().await?;
        print_json(&report)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use clap::Parser;
    use jiff::Timestamp;
    use serde_json::{Value as JsonValue, json};

    use crate::cli::parser::{Cli, Commands};
    use crate::config::Settings;
    use crate::jobs::{
        ExecutionContext, ExecutorRegistry, ExecutorResult, JobExecutor, JobKind, JobStatus,
        ManualClock,
    };
    use crate::services::notifications::LogNotifier;
    use crate::store::MemoryStore;

    struct Noop;

    #[async_trait]
    impl JobExecutor for Noop {
        async fn execute(&self, _ctx: &ExecutionContext) -> ExecutorResult<Option<JsonValue>> {
            Ok(None)
        }
    }

    fn handler() -> JobCommandHandler {
        let mut registry = ExecutorRegistry::new();
        registry.register(JobKind::Content, Arc::new(Noop));

        let state = AppState::in_memory(
            Settings::default(),
            MemoryStore::new(),
            registry,
            Arc::new(LogNotifier),
            Arc::new(ManualClock::new(Timestamp::from_second(1_700_000_000).unwrap())),
        );
        JobCommandHandler::new(state)
    }

    fn submit_args(argv: &[&str]) -> SubmitArgs {
        let mut full = vec!["mfw-queue", "submit"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Some(Commands::Submit(args)) => args,
            other => panic!("Expected Submit command, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_submit_then_cancel() {
        let handler = handler();
        let id = handler
            .submit(submit_args(&[
                "content",
                "--payload",
                r#"{"n": 1}"#,
                "--priority",
                "3",
                "--actor",
                "ops",
            ]))
            .await
            .unwrap();

        let job = handler.status(id).await.unwrap();
        assert_eq!(job.payload, json!({"n": 1}));
        assert_eq!(job.priority, 3);
        assert_eq!(job.created_by.as_deref(), Some("ops"));

        assert!(handler.cancel(id, "ops").await.unwrap());
        assert!(!handler.cancel(id, "ops").await.unwrap());
        assert_eq!(handler.status(id).await.unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_submit_for_kind_without_executor_is_rejected() {
        let handler = handler();
        assert!(handler.submit(submit_args(&["image"])).await.is_err());
    }

    #[tokio::test]
    async fn test_status_of_unknown_job_is_not_found() {
        let handler = handler();
        let result = handler.status(uuid::Uuid::new_v4()).await;
        assert!(matches!(
            result,
            Err(crate::error::AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_stats_and_cleanup_on_empty_queue() {
        let handler = handler();
        assert!(handler.stats().await.is_ok());
        assert_eq!(handler.cleanup().await.unwrap(), CleanupReport::default());
    }
}
