use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::error::AppResult;
use crate::jobs::error::ExecutorResult;
use crate::jobs::types::{BatchId, Job, JobId, JobKind};

/// Everything an executor gets to see about the job it runs
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub job_id: JobId,
    pub kind: JobKind,
    pub payload: JsonValue,
    /// 1-based number of this attempt
    pub attempt: u32,
    pub max_attempts: u32,
    pub batch_id: Option<BatchId>,
    pub resource_key: String,
    /// Cancelled when the job times out or the dispatcher shuts down
    pub cancellation_token: CancellationToken,
}

impl ExecutionContext {
    pub fn new(job: &Job, cancellation_token: CancellationToken) -> Self {
        Self {
            job_id: job.id,
            kind: job.kind,
            payload: job.payload.clone(),
            attempt: job.attempts.saturating_add(1),
            max_attempts: job.max_attempts,
            batch_id: job.batch_id,
            resource_key: job.resource_key.clone(),
            cancellation_token,
        }
    }

    /// Deserialize the payload; a mismatch is a permanent failure
    pub fn payload_as<T: DeserializeOwned>(&self) -> ExecutorResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Performs the actual work for one job kind
///
/// Return `ExecutorError::Permanent` for failures that retrying cannot fix;
/// every other error is retried under the configured backoff.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, ctx: &ExecutionContext) -> ExecutorResult<Option<JsonValue>>;

    /// Reject a payload at submission time, before anything is stored
    fn validate(&self, _payload: &JsonValue) -> AppResult<()> {
        Ok(())
    }

    /// Name used in logs
    fn name(&self) -> &str {
        "executor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::error::{ExecutorError, FailureKind};
    use crate::jobs::types::{Actor, NewJob};
    use jiff::Timestamp;
    use serde::Deserialize;
    use serde_json::json;
    use uuid::Uuid;

    #[derive(Debug, Deserialize)]
    struct Prompt {
        prompt: String,
    }

    fn context(payload: JsonValue) -> ExecutionContext {
        let job = NewJob::new(JobKind::Content, payload).max_attempts(2).into_job(
            Uuid::new_v4(),
            Timestamp::UNIX_EPOCH,
            3,
            None,
            &Actor::system(),
        );
        ExecutionContext::new(&job, CancellationToken::new())
    }

    #[test]
    fn test_context_from_job() {
        let ctx = context(json!({"prompt": "spring recipes"}));
        assert_eq!(ctx.attempt, 1);
        assert_eq!(ctx.max_attempts, 2);
        assert_eq!(ctx.resource_key, "content");
        assert!(!ctx.is_last_attempt());
        assert!(!ctx.cancellation_token.is_cancelled());
    }

    #[test]
    fn test_payload_as() {
        let prompt: Prompt = context(json!({"prompt": "spring recipes"}))
            .payload_as()
            .unwrap();
        assert_eq!(prompt.prompt, "spring recipes");

        let err: ExecutorError = context(json!({"title": 1})).payload_as::<Prompt>().unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Permanent);
    }
}
