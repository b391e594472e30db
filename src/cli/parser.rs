//! CLI argument parsing with clap
//!
//! This module defines the command-line interface structure using clap,
//! including all commands, arguments, and their documentation.

use clap::{Parser, Subcommand, ValueEnum};
use jiff::Timestamp;
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use uuid::Uuid;

use crate::build;
use crate::jobs::JobKind;

/// Durable job queue with retries, rate limits and batches
#[derive(Parser, Debug)]
#[command(name = "mfw-queue")]
#[command(about = "Durable job queue with retries, rate limits and batches")]
#[command(long_about = "
mfw-queue runs queued work against PostgreSQL. Jobs are claimed atomically,
executed with a timeout, retried with backoff and grouped into batches whose
completion is announced through a notification sink.

EXAMPLES:
    # Run the dispatcher daemon (default command)
    mfw-queue run

    # Validate configuration and print the triggers without starting
    mfw-queue run --dry-run

    # Run a single dispatch cycle, e.g. from an OS cron
    mfw-queue cycle

    # Apply pending database migrations
    mfw-queue migrate

    # Submit a job
    mfw-queue submit content --payload '{\"url\": \"https://example.com\"}'

    # Submit a batch from a JSON array of jobs
    mfw-queue batch create --file items.json --batch-size 10

    # Inspect a job or batch
    mfw-queue status 3f1c2f5e-0000-4000-8000-000000000000
    mfw-queue batch status 3f1c2f5e-0000-4000-8000-000000000000

    # Queue-wide counters
    mfw-queue stats
")]
#[command(version = build::CLAP_LONG_VERSION)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    ///
    /// Load this single TOML file instead of the layered `config/` directory.
    /// `MFW_*` environment variables still override its values.
    ///
    /// Example: --config /etc/mfw-queue/production.toml
    #[arg(short, long, value_name = "FILE", value_parser = super::validation::validate_config_file_path)]
    pub config: Option<PathBuf>,

    /// Override environment detection
    ///
    /// Selects which `{environment}.toml` layer is loaded.
    /// Available values: development (dev), staging, production (prod), test
    #[arg(short, long, value_enum)]
    pub env: Option<Environment>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the dispatcher daemon (default)
    ///
    /// Releases jobs left behind by a crashed process, then drives dispatch
    /// cycles, batch reconciliation and retention cleanup from their cron
    /// expressions until interrupted.
    ///
    /// Examples:
    ///   mfw-queue run
    ///   mfw-queue run --dry-run
    Run {
        /// Log level override for this process
        #[arg(long, value_enum)]
        log_level: Option<LogLevel>,

        /// Validate configuration, print the triggers and exit
        #[arg(long)]
        dry_run: bool,
    },

    /// Run one dispatch cycle and print its report
    Cycle,

    /// Database migration operations
    ///
    /// Examples:
    ///   mfw-queue migrate                    # Apply all pending migrations
    ///   mfw-queue migrate --dry-run          # Show pending migrations without applying
    ///   mfw-queue migrate --rollback 3       # Rollback the last 3 migrations
    Migrate {
        /// Show pending migrations without applying
        #[arg(long, conflicts_with = "rollback")]
        dry_run: bool,

        /// Number of migrations to rollback (1-100)
        #[arg(long, value_name = "STEPS", conflicts_with = "dry_run", value_parser = super::validation::validate_rollback_steps)]
        rollback: Option<u32>,
    },

    /// Submit a single job
    Submit(SubmitArgs),

    /// Batch operations
    #[command(subcommand)]
    Batch(BatchCommands),

    /// Show a job
    Status {
        #[arg(value_parser = super::validation::validate_uuid)]
        id: Uuid,
    },

    /// Cancel a pending job
    ///
    /// Jobs already processing run to completion.
    Cancel {
        #[arg(value_parser = super::validation::validate_uuid)]
        id: Uuid,

        /// Name recorded as the cancelling actor
        #[arg(long, default_value = "cli")]
        actor: String,
    },

    /// Purge terminal jobs, finished batches and old rate-limit windows
    Cleanup,

    /// Print queue statistics and rate-limit usage
    Stats,
}

/// Arguments of `submit`
#[derive(clap::Args, Debug)]
pub struct SubmitArgs {
    /// Job kind: content, image, api_call, batch_member
    #[arg(value_parser = super::validation::validate_job_kind)]
    pub kind: JobKind,

    /// JSON payload handed to the executor
    #[arg(long, value_name = "JSON", default_value = "{}", value_parser = super::validation::validate_json)]
    pub payload: JsonValue,

    /// Higher runs first (-1000..=1000)
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i32,

    /// Defaults to `retry.default_max_attempts`
    #[arg(long, value_parser = super::validation::validate_max_attempts)]
    pub max_attempts: Option<u32>,

    /// Earliest start, RFC 3339
    #[arg(long, value_name = "TIMESTAMP", value_parser = super::validation::validate_timestamp)]
    pub run_at: Option<Timestamp>,

    /// Cancel instead of running after this instant, RFC 3339
    #[arg(long, value_name = "TIMESTAMP", value_parser = super::validation::validate_timestamp)]
    pub expires_at: Option<Timestamp>,

    /// Rate-limit bucket; defaults to the kind's bucket
    #[arg(long)]
    pub resource_key: Option<String>,

    /// Name recorded as the submitting actor
    #[arg(long, default_value = "cli")]
    pub actor: String,
}

/// Subcommands of `batch`
#[derive(Subcommand, Debug)]
pub enum BatchCommands {
    /// Create a batch from a JSON array of jobs
    ///
    /// Each element has the shape of a submission:
    /// `{"kind": "content", "payload": {...}, "priority": 0}`
    Create {
        /// File holding the JSON array
        #[arg(short, long, value_name = "FILE", value_parser = super::validation::validate_config_file_path)]
        file: PathBuf,

        /// Members claimed per dispatch cycle
        #[arg(long)]
        batch_size: Option<u32>,

        /// Attempts for members that do not set their own
        #[arg(long, value_parser = super::validation::validate_max_attempts)]
        max_attempts: Option<u32>,

        /// Do not send a notification when the batch finishes
        #[arg(long)]
        no_notify: bool,

        #[arg(long, default_value = "cli")]
        actor: String,
    },

    /// Show batch progress
    Status {
        #[arg(value_parser = super::validation::validate_uuid)]
        id: Uuid,
    },
}

/// Environment options
#[derive(ValueEnum, Clone, Debug)]
pub enum Environment {
    #[value(name = "development", alias = "dev")]
    Development,
    #[value(name = "staging")]
    Staging,
    #[value(name = "production", alias = "prod")]
    Production,
    #[value(name = "test")]
    Test,
}

/// Log level options
#[derive(ValueEnum, Clone, Debug)]
pub enum LogLevel {
    #[value(name = "error")]
    Error,
    #[value(name = "warn", alias = "warning")]
    Warn,
    #[value(name = "info")]
    Info,
    #[value(name = "debug")]
    Debug,
    #[value(name = "trace")]
    Trace,
}

impl Cli {
    /// Checks clap cannot express on its own
    pub fn validate(&self) -> Result<(), String> {
        if let Some(Commands::Submit(args)) = &self.command {
            if !args.payload.is_object() {
                return Err("--payload must be a JSON object".to_string());
            }
            if let (Some(run_at), Some(expires_at)) = (args.run_at, args.expires_at)
                && expires_at <= run_at
            {
                return Err("--expires-at must be later than --run-at".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use --verbose and --quiet together".to_string());
        }

        Ok(())
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => "error".to_string(),
            LogLevel::Warn => "warn".to_string(),
            LogLevel::Info => "info".to_string(),
            LogLevel::Debug => "debug".to_string(),
            LogLevel::Trace => "trace".to_string(),
        }
    }
}

impl From<Environment> for crate::config::Environment {
    fn from(env: Environment) -> Self {
        match env {
            Environment::Development => crate::config::Environment::Development,
            Environment::Staging => crate::config::Environment::Staging,
            Environment::Production => crate::config::Environment::Production,
            Environment::Test => crate::config::Environment::Test,
        }
    }
}
