use thiserror::Error;

/// How the retry policy should treat a failed execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// May succeed later: network trouble, provider overload, timeouts
    Transient,
    /// Will never succeed: malformed payload, rejected request
    Permanent,
}

/// Error returned by a job executor
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Transient failure: {message}")]
    Transient { message: String },

    #[error("Permanent failure: {message}")]
    Permanent { message: String },

    #[error("Job execution timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Executor panicked: {message}")]
    Panicked { message: String },
}

impl ExecutorError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Only an explicit `Permanent` skips the retry budget
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ExecutorError::Permanent { .. } => FailureKind::Permanent,
            ExecutorError::Transient { .. }
            | ExecutorError::Timeout { .. }
            | ExecutorError::Panicked { .. } => FailureKind::Transient,
        }
    }
}

impl From<anyhow::Error> for ExecutorError {
    fn from(error: anyhow::Error) -> Self {
        ExecutorError::transient(format!("{error:#}"))
    }
}

/// A payload that does not deserialize will not deserialize next time either
impl From<serde_json::Error> for ExecutorError {
    fn from(error: serde_json::Error) -> Self {
        ExecutorError::permanent(format!("invalid payload: {error}"))
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
