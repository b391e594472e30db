use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde_json::Value as JsonValue;

use crate::config::ExecutorEndpoint;
use crate::error::{AppError, AppResult};
use crate::external::HTTP_CLIENT;
use crate::jobs::error::{ExecutorError, ExecutorResult};
use crate::jobs::executor::{ExecutionContext, JobExecutor};
use crate::jobs::types::JobKind;

/// Longest response excerpt carried into an error message
const MAX_ERROR_BODY: usize = 512;

/// Delegates a job to an HTTP service
///
/// The payload is sent as the JSON request body with `X-Job-Id`,
/// `X-Job-Kind` and `X-Job-Attempt` headers. A 2xx JSON response becomes the
/// job output; a non-JSON 2xx body is returned as a string.
pub struct HttpExecutor {
    kind: JobKind,
    method: Method,
    url: Url,
    timeout: Duration,
    headers: Vec<(String, String)>,
}

impl HttpExecutor {
    pub fn new(kind: JobKind, endpoint: ExecutorEndpoint) -> AppResult<Self> {
        let field = format!("executors.{kind}");
        let url = Url::parse(&endpoint.url)
            .map_err(|e| AppError::validation(format!("{field}.url"), e.to_string()))?;
        let method = endpoint.method.to_uppercase().parse().map_err(|_| {
            AppError::validation(
                format!("{field}.method"),
                format!("invalid HTTP method '{}'", endpoint.method),
            )
        })?;

        let mut headers: Vec<_> = endpoint.headers.into_iter().collect();
        headers.sort();

        Ok(Self {
            kind,
            method,
            url,
            timeout: Duration::from_secs(endpoint.timeout_seconds),
            headers,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn call(&self, ctx: &ExecutionContext) -> ExecutorResult<Option<JsonValue>> {
        let mut request = HTTP_CLIENT
            .request(self.method.clone(), self.url.clone())
            .timeout(self.timeout)
            .header("X-Job-Id", ctx.job_id.to_string())
            .header("X-Job-Kind", ctx.kind.as_str())
            .header("X-Job-Attempt", ctx.attempt.to_string())
            .json(&ctx.payload);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExecutorError::transient(format!("request to {} failed: {e}", self.url)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExecutorError::transient(format!("reading response body failed: {e}")))?;

        interpret_response(status, &body)
    }
}

/// Map an HTTP outcome onto the executor contract
fn interpret_response(status: StatusCode, body: &str) -> ExecutorResult<Option<JsonValue>> {
    if status.is_success() {
        if body.trim().is_empty() {
            return Ok(None);
        }
        let output = serde_json::from_str(body).unwrap_or_else(|_| JsonValue::String(body.to_string()));
        return Ok(Some(output));
    }

    let message = format!("HTTP {status}: {}", excerpt(body));
    if is_retryable(status) {
        Err(ExecutorError::transient(message))
    } else {
        Err(ExecutorError::permanent(message))
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
        || !status.is_client_error()
}

fn excerpt(body: &str) -> &str {
    let body = body.trim();
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[async_trait]
impl JobExecutor for HttpExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> ExecutorResult<Option<JsonValue>> {
        tracing::debug!(
            job.id = %ctx.job_id,
            kind = %self.kind,
            url = %self.url,
            attempt = ctx.attempt,
            "Calling executor endpoint"
        );

        tokio::select! {
            result = self.call(ctx) => result,
            _ = ctx.cancellation_token.cancelled() => {
                Err(ExecutorError::transient("request cancelled"))
            }
        }
    }

    fn validate(&self, payload: &JsonValue) -> AppResult<()> {
        if payload.is_object() {
            Ok(())
        } else {
            Err(AppError::validation("payload", "expected a JSON object"))
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
