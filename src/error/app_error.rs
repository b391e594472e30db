use crate::error::DatabaseErrorConverter;
use thiserror::Error;

/// Crate-wide error type for the job engine.
///
/// Storage failures (`Database`, `ConnectionPool`, `Duplicate`, `NotFound`) are
/// transient from the caller's point of view: the store call itself may be
/// retried. `Validation` rejects work at submission and is never retried.
/// `RateLimited` and `Expired` are outcomes the dispatcher turns into a
/// deferral and a cancellation respectively; neither counts as a job failure.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found error with entity, field, and value information
    #[error("Resource not found: {entity} with {field}={value}")]
    NotFound {
        entity: String,
        field: String,
        value: String,
    },

    /// Duplicate entry error for unique constraint violations
    #[error("Duplicate entry: {entity}.{field} = '{value}' already exists")]
    Duplicate {
        entity: String,
        field: String,
        value: String,
    },

    /// Invalid submission (bad payload, unknown job kind, out-of-range option)
    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Resource capacity exhausted for the current window
    #[error("Rate limit exceeded for resource '{resource}'")]
    RateLimited { resource: String },

    /// Job passed its `expires_at` before it could run
    #[error("Job {job_id} expired before execution")]
    Expired { job_id: String },

    /// Operation not allowed in the entity's current state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Database operation error with operation context
    #[error("Database operation failed: {operation}")]
    Database {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// Configuration error with key information
    #[error("Configuration error: {key}")]
    Configuration {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// Connection pool error
    #[error("Connection pool error")]
    ConnectionPool {
        #[source]
        source: anyhow::Error,
    },

    /// Internal error for unexpected failures
    #[error("Internal error")]
    Internal {
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    /// Shorthand for a missing entity looked up by id.
    pub fn not_found(entity: &str, value: impl ToString) -> Self {
        AppError::NotFound {
            entity: entity.to_string(),
            field: "id".to_string(),
            value: value.to_string(),
        }
    }

    /// Shorthand for a rejected submission field.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failing store call may succeed if simply retried.
    pub fn is_storage_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database { .. } | AppError::ConnectionPool { .. }
        )
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal { source: error }
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(error: diesel::result::Error) -> Self {
        DatabaseErrorConverter::convert_diesel_error(error, "database operation")
    }
}

impl From<bb8::RunError<diesel_async::pooled_connection::PoolError>> for AppError {
    fn from(error: bb8::RunError<diesel_async::pooled_connection::PoolError>) -> Self {
        AppError::ConnectionPool {
            source: anyhow::Error::from(error),
        }
    }
}

impl From<crate::config::error::ConfigError> for AppError {
    fn from(error: crate::config::error::ConfigError) -> Self {
        AppError::Configuration {
            key: error.key().to_string(),
            source: anyhow::Error::from(error),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "payload".to_string());
        AppError::Validation {
            field,
            reason: errors.to_string(),
        }
    }
}

/// Type alias for Result with AppError to simplify function signatures
pub type AppResult<T> = Result<T, AppError>;
