use std::fmt;
use std::str::FromStr;

use diesel_derive_enum::DbEnum;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;

pub type JobId = Uuid;
pub type BatchId = Uuid;

/// Kind of work a job performs; selects the executor and default resource key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::JobKind")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Content,
    Image,
    ApiCall,
    BatchMember,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Content,
        JobKind::Image,
        JobKind::ApiCall,
        JobKind::BatchMember,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Content => "content",
            JobKind::Image => "image",
            JobKind::ApiCall => "api_call",
            JobKind::BatchMember => "batch_member",
        }
    }

    /// Rate-limit bucket used when a submission does not name one
    pub fn default_resource_key(&self) -> &'static str {
        match self {
            JobKind::Content | JobKind::BatchMember => "content",
            JobKind::Image => "image",
            JobKind::ApiCall => "api",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AppError::validation("kind", format!("unknown job kind '{s}'")))
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::JobStatus")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Batch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::BatchStatus")]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who submitted a piece of work; recorded on jobs and batches
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor(String);

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Work created by the engine itself or by an operator without a name
    pub fn system() -> Self {
        Self("system".to_string())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// A unit of background work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub payload: JsonValue,
    pub status: JobStatus,
    /// Higher runs first
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub resource_key: String,
    /// Earliest time the job may be claimed
    pub scheduled_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub batch_id: Option<BatchId>,
    pub status_message: Option<String>,
    pub created_by: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// A job whose `expires_at` has been reached may no longer run
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Claimable right now, ignoring batch caps
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.status == JobStatus::Pending && self.scheduled_at <= now && !self.is_expired(now)
    }
}

/// Submission request for a single job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewJob {
    pub kind: JobKind,

    #[serde(default)]
    pub payload: JsonValue,

    #[serde(default)]
    #[validate(range(min = -1000, max = 1000))]
    pub priority: i32,

    /// Falls back to `retry.default_max_attempts`
    #[serde(default)]
    #[validate(range(min = 1, max = 100))]
    pub max_attempts: Option<u32>,

    /// Delay the first claim until this instant
    #[serde(default)]
    pub run_at: Option<Timestamp>,

    #[serde(default)]
    pub expires_at: Option<Timestamp>,

    /// Falls back to the kind's default resource key
    #[serde(default)]
    #[validate(length(min = 1, max = 100))]
    pub resource_key: Option<String>,
}

impl NewJob {
    pub fn new(kind: JobKind, payload: JsonValue) -> Self {
        Self {
            kind,
            payload,
            priority: 0,
            max_attempts: None,
            run_at: None,
            expires_at: None,
            resource_key: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn run_at(mut self, at: Timestamp) -> Self {
        self.run_at = Some(at);
        self
    }

    pub fn expires_at(mut self, at: Timestamp) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn resource_key(mut self, key: impl Into<String>) -> Self {
        self.resource_key = Some(key.into());
        self
    }

    /// Materialize the stored job. Scheduling never lies in the past.
    pub(crate) fn into_job(
        self,
        id: JobId,
        now: Timestamp,
        default_max_attempts: u32,
        batch_id: Option<BatchId>,
        actor: &Actor,
    ) -> Job {
        let resource_key = self
            .resource_key
            .unwrap_or_else(|| self.kind.default_resource_key().to_string());

        Job {
            id,
            kind: self.kind,
            payload: self.payload,
            status: JobStatus::Pending,
            priority: self.priority,
            attempts: 0,
            max_attempts: self.max_attempts.unwrap_or(default_max_attempts),
            resource_key,
            scheduled_at: self.run_at.map_or(now, |at| at.max(now)),
            expires_at: self.expires_at,
            batch_id,
            status_message: None,
            created_by: Some(actor.name().to_string()),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-batch processing options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct BatchOptions {
    /// Members of this batch claimed per dispatch cycle
    #[validate(range(min = 1, max = 1000))]
    pub batch_size: u32,

    /// `max_attempts` for every member
    #[validate(range(min = 1, max = 100))]
    pub max_attempts: u32,

    pub notify_on_complete: bool,
}

/// A group of jobs tracked as one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub status: BatchStatus,
    pub total_items: u32,
    /// Members that completed
    pub processed_items: u32,
    /// Members that failed or were cancelled
    pub failed_items: u32,
    pub options: BatchOptions,
    pub created_by: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl Batch {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Members not yet in a terminal state
    pub fn remaining(&self) -> u32 {
        self.total_items
            .saturating_sub(self.processed_items)
            .saturating_sub(self.failed_items)
    }
}

/// Job counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
            JobStatus::Cancelled => self.cancelled += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed + self.cancelled
    }

    /// Jobs that may still change state
    pub fn open(&self) -> u64 {
        self.pending + self.processing
    }
}

impl FromIterator<JobStatus> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = JobStatus>>(iter: I) -> Self {
        let mut counts = StatusCounts::default();
        for status in iter {
            counts.add(status, 1);
        }
        counts
    }
}

/// Queue-wide snapshot for operators
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub jobs: StatusCounts,
    pub open_batches: u64,
    /// Scheduled time of the oldest job still waiting to run
    pub oldest_pending: Option<Timestamp>,
}
