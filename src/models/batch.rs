use diesel::prelude::*;
use jiff_diesel::Timestamp;
use uuid::Uuid;

use super::job::{from_db_count, to_db_count};
use crate::jobs::types::{Batch, BatchOptions, BatchStatus};

/// Row of the `batches` table
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::batches)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BatchRow {
    pub id: Uuid,
    pub status: BatchStatus,
    pub total_items: i32,
    pub processed_items: i32,
    pub failed_items: i32,
    pub batch_size: i32,
    pub max_attempts: i32,
    pub notify_on_complete: bool,
    pub created_by: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl From<Batch> for BatchRow {
    fn from(batch: Batch) -> Self {
        Self {
            id: batch.id,
            status: batch.status,
            total_items: to_db_count(batch.total_items),
            processed_items: to_db_count(batch.processed_items),
            failed_items: to_db_count(batch.failed_items),
            batch_size: to_db_count(batch.options.batch_size),
            max_attempts: to_db_count(batch.options.max_attempts),
            notify_on_complete: batch.options.notify_on_complete,
            created_by: batch.created_by,
            created_at: batch.created_at.into(),
            updated_at: batch.updated_at.into(),
            completed_at: batch.completed_at.map(Into::into),
        }
    }
}

impl From<BatchRow> for Batch {
    fn from(row: BatchRow) -> Self {
        Self {
            id: row.id,
            status: row.status,
            total_items: from_db_count(row.total_items),
            processed_items: from_db_count(row.processed_items),
            failed_items: from_db_count(row.failed_items),
            options: BatchOptions {
                batch_size: from_db_count(row.batch_size),
                max_attempts: from_db_count(row.max_attempts),
                notify_on_complete: row.notify_on_complete,
            },
            created_by: row.created_by,
            created_at: row.created_at.to_jiff(),
            updated_at: row.updated_at.to_jiff(),
            completed_at: row.completed_at.map(|at| at.to_jiff()),
        }
    }
}
