use diesel::prelude::*;
use jiff_diesel::Timestamp;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::jobs::types::{Job, JobKind, JobStatus};

/// Row of the `jobs` table
///
/// Derives `QueryableByName` as well so the raw claim query can load it.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable, Insertable)]
#[diesel(table_name = crate::schema::jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct JobRow {
    pub id: Uuid,
    pub kind: JobKind,
    pub payload: JsonValue,
    pub status: JobStatus,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub resource_key: String,
    pub scheduled_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub batch_id: Option<Uuid>,
    pub status_message: Option<String>,
    pub created_by: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<Job> for JobRow {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind,
            payload: job.payload,
            status: job.status,
            priority: job.priority,
            attempts: to_db_count(job.attempts),
            max_attempts: to_db_count(job.max_attempts),
            resource_key: job.resource_key,
            scheduled_at: job.scheduled_at.into(),
            expires_at: job.expires_at.map(Into::into),
            batch_id: job.batch_id,
            status_message: job.status_message,
            created_by: job.created_by,
            created_at: job.created_at.into(),
            updated_at: job.updated_at.into(),
        }
    }
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            kind: row.kind,
            payload: row.payload,
            status: row.status,
            priority: row.priority,
            attempts: from_db_count(row.attempts),
            max_attempts: from_db_count(row.max_attempts),
            resource_key: row.resource_key,
            scheduled_at: row.scheduled_at.to_jiff(),
            expires_at: row.expires_at.map(|at| at.to_jiff()),
            batch_id: row.batch_id,
            status_message: row.status_message,
            created_by: row.created_by,
            created_at: row.created_at.to_jiff(),
            updated_at: row.updated_at.to_jiff(),
        }
    }
}

/// Counters are `INTEGER` columns guarded by CHECK constraints
pub(crate) fn to_db_count(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

pub(crate) fn from_db_count(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}
