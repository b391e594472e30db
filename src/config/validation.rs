//! Configuration validation logic
//!
//! Each section validates itself; `Settings::validate` runs them in order and
//! stops at the first failure.

use std::str::FromStr;

use tokio_cron_scheduler::Job;

use crate::config::error::ConfigError;
use crate::config::settings::{
    BatchConfig, DatabaseConfig, DispatcherConfig, ExecutorEndpoint, FileSettings,
    LoggerSettings, NotificationsConfig, RateLimitRule, RetentionConfig, RetryConfig, Settings,
};
use crate::jobs::types::JobKind;

/// Valid log levels
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid log formats
const VALID_LOG_FORMATS: &[&str] = &["full", "compact", "json"];

/// Valid backoff strategies
const VALID_BACKOFF_STRATEGIES: &[&str] = &["exponential", "linear"];

/// Valid executor HTTP methods
const VALID_HTTP_METHODS: &[&str] = &["POST", "PUT"];

impl DatabaseConfig {
    /// Validate database configuration
    ///
    /// # Validation Rules
    /// - URL must not be empty and must be a PostgreSQL URL
    /// - Max and min connections must be greater than 0
    /// - Min connections must not exceed max connections
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::validation(
                "database.url",
                "Database URL is required. Set database.url or MFW_DATABASE__URL.",
            ));
        }

        if !self.url.starts_with("postgres://") && !self.url.starts_with("postgresql://") {
            return Err(ConfigError::validation(
                "database.url",
                "Invalid database URL format. Expected postgres://[user:password@]host[:port]/database",
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::validation(
                "database.max_connections",
                "Max connections must be greater than 0.",
            ));
        }

        if self.min_connections == 0 {
            return Err(ConfigError::validation(
                "database.min_connections",
                "Min connections must be greater than 0.",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::ValidationError {
                field: "database.min_connections".to_string(),
                message: format!(
                    "Min connections ({}) cannot exceed max connections ({}).",
                    self.min_connections, self.max_connections
                ),
            });
        }

        Ok(())
    }
}

impl FileSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.path.trim().is_empty() {
            return Err(ConfigError::validation(
                "logger.file.path",
                "File path is required when file logging is enabled.",
            ));
        }

        if !VALID_LOG_FORMATS.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError {
                field: "logger.file.format".to_string(),
                message: format!(
                    "Invalid log format '{}'. Valid formats are: {}",
                    self.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        Ok(())
    }
}

impl LoggerSettings {
    /// Validate logger settings
    ///
    /// The level may carry per-target directives (`info,mfw_queue=debug`);
    /// only its leading global level is checked here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self
            .level
            .split(',')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        if !VALID_LOG_LEVELS.contains(&base.as_str()) {
            return Err(ConfigError::ValidationError {
                field: "logger.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Valid levels are: {}",
                    self.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        if !self.console.enabled && !self.file.enabled {
            return Err(ConfigError::validation(
                "logger",
                "At least one output (console or file) must be enabled.",
            ));
        }

        self.file.validate()
    }
}

impl DispatcherConfig {
    /// Validate dispatcher configuration
    ///
    /// # Validation Rules
    /// - Claim limit, concurrency, job timeout and stale threshold must be positive
    /// - Every job of a full claim must be able to time out before it is
    ///   considered stale, including those queued behind `concurrency`
    /// - Both cron expressions must parse
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.claim_limit == 0 {
            return Err(ConfigError::validation(
                "dispatcher.claim_limit",
                "Claim limit must be greater than 0.",
            ));
        }

        if self.concurrency == 0 {
            return Err(ConfigError::validation(
                "dispatcher.concurrency",
                "Concurrency must be greater than 0.",
            ));
        }

        if self.job_timeout == 0 {
            return Err(ConfigError::validation(
                "dispatcher.job_timeout",
                "Job timeout must be greater than 0 seconds.",
            ));
        }

        // The last job of a full claim waits behind every earlier wave
        let waves = u64::from(self.claim_limit)
            .div_ceil(u64::try_from(self.concurrency).unwrap_or(u64::MAX));
        let longest_hold = waves.saturating_mul(self.job_timeout);
        if self.stale_after <= longest_hold {
            return Err(ConfigError::ValidationError {
                field: "dispatcher.stale_after".to_string(),
                message: format!(
                    "Stale threshold ({}s) must exceed the longest a claim can be held: {} wave(s) of {} jobs at a {}s timeout ({}s).",
                    self.stale_after, waves, self.concurrency, self.job_timeout, longest_hold
                ),
            });
        }

        validate_cron("dispatcher.cycle_cron", &self.cycle_cron)?;
        validate_cron("dispatcher.reconcile_cron", &self.reconcile_cron)
    }
}

impl RetryConfig {
    /// Validate retry configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_BACKOFF_STRATEGIES.contains(&self.strategy.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError {
                field: "retry.strategy".to_string(),
                message: format!(
                    "Invalid backoff strategy '{}'. Valid strategies are: {}",
                    self.strategy,
                    VALID_BACKOFF_STRATEGIES.join(", ")
                ),
            });
        }

        if self.base_delay == 0 {
            return Err(ConfigError::validation(
                "retry.base_delay",
                "Base delay must be greater than 0 seconds.",
            ));
        }

        if self.multiplier <= 1.0 || !self.multiplier.is_finite() {
            return Err(ConfigError::validation(
                "retry.multiplier",
                "Multiplier must be a finite number greater than 1.0.",
            ));
        }

        if self.max_delay < self.base_delay {
            return Err(ConfigError::ValidationError {
                field: "retry.max_delay".to_string(),
                message: format!(
                    "Max delay ({}s) cannot be less than base delay ({}s).",
                    self.max_delay, self.base_delay
                ),
            });
        }

        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::validation(
                "retry.jitter",
                "Jitter must be between 0.0 and 1.0.",
            ));
        }

        if self.default_max_attempts == 0 {
            return Err(ConfigError::validation(
                "retry.default_max_attempts",
                "Default max attempts must be at least 1.",
            ));
        }

        Ok(())
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_batch_size == 0 {
            return Err(ConfigError::validation(
                "batch.default_batch_size",
                "Default batch size must be greater than 0.",
            ));
        }
        Ok(())
    }
}

impl RetentionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job_retention_days == 0 {
            return Err(ConfigError::validation(
                "retention.job_retention_days",
                "Job retention must be at least 1 day.",
            ));
        }

        if self.usage_retention_hours == 0 {
            return Err(ConfigError::validation(
                "retention.usage_retention_hours",
                "Usage retention must be at least 1 hour.",
            ));
        }

        validate_cron("retention.cleanup_cron", &self.cleanup_cron)
    }
}

impl RateLimitRule {
    fn validate(&self, key: &str) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError::ValidationError {
                field: format!("rate_limits.{key}.max_requests"),
                message: "Max requests must be greater than 0.".to_string(),
            });
        }

        if self.window_seconds == 0 {
            return Err(ConfigError::ValidationError {
                field: format!("rate_limits.{key}.window_seconds"),
                message: "Window must be greater than 0 seconds.".to_string(),
            });
        }

        Ok(())
    }
}

impl NotificationsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.webhook_url
            && !is_http_url(url)
        {
            return Err(ConfigError::validation(
                "notifications.webhook_url",
                "Webhook URL must start with http:// or https://.",
            ));
        }

        if self.timeout_seconds == 0 {
            return Err(ConfigError::validation(
                "notifications.timeout_seconds",
                "Notification timeout must be greater than 0 seconds.",
            ));
        }

        Ok(())
    }
}

impl ExecutorEndpoint {
    fn validate(&self, kind: &str) -> Result<(), ConfigError> {
        if JobKind::from_str(kind).is_err() {
            return Err(ConfigError::ValidationError {
                field: format!("executors.{kind}"),
                message: format!("Unknown job kind '{kind}'."),
            });
        }

        if !is_http_url(&self.url) {
            return Err(ConfigError::ValidationError {
                field: format!("executors.{kind}.url"),
                message: "Executor URL must start with http:// or https://.".to_string(),
            });
        }

        if !VALID_HTTP_METHODS.contains(&self.method.to_uppercase().as_str()) {
            return Err(ConfigError::ValidationError {
                field: format!("executors.{kind}.method"),
                message: format!(
                    "Invalid method '{}'. Valid methods are: {}",
                    self.method,
                    VALID_HTTP_METHODS.join(", ")
                ),
            });
        }

        if self.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError {
                field: format!("executors.{kind}.timeout_seconds"),
                message: "Executor timeout must be greater than 0 seconds.".to_string(),
            });
        }

        Ok(())
    }
}

impl Settings {
    /// Validate all configuration sections
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.logger.validate()?;
        self.dispatcher.validate()?;
        self.retry.validate()?;
        self.batch.validate()?;
        self.retention.validate()?;
        self.notifications.validate()?;

        for (key, rule) in &self.rate_limits {
            rule.validate(key)?;
        }
        for (kind, endpoint) in &self.executors {
            endpoint.validate(kind)?;
        }

        Ok(())
    }
}

fn validate_cron(field: &str, expression: &str) -> Result<(), ConfigError> {
    Job::new(expression, |_, _| {}).map_err(|e| ConfigError::ValidationError {
        field: field.to_string(),
        message: format!("Invalid cron expression '{expression}': {e}"),
    })?;
    Ok(())
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
