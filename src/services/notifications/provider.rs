//! Batch lifecycle events and the sink trait that delivers them.

use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::jobs::types::{Batch, BatchId, BatchStatus};

/// Emitted once when a batch reaches a terminal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    BatchCompleted {
        batch_id: BatchId,
        total_items: u32,
        processed_items: u32,
        completed_at: Timestamp,
    },
    BatchFailed {
        batch_id: BatchId,
        total_items: u32,
        processed_items: u32,
        failed_items: u32,
        completed_at: Timestamp,
    },
}

impl BatchEvent {
    /// Event for a terminal batch; `None` while the batch is still open
    pub fn from_batch(batch: &Batch, now: Timestamp) -> Option<Self> {
        let completed_at = batch.completed_at.unwrap_or(now);
        match batch.status {
            BatchStatus::Completed => Some(BatchEvent::BatchCompleted {
                batch_id: batch.id,
                total_items: batch.total_items,
                processed_items: batch.processed_items,
                completed_at,
            }),
            BatchStatus::Failed => Some(BatchEvent::BatchFailed {
                batch_id: batch.id,
                total_items: batch.total_items,
                processed_items: batch.processed_items,
                failed_items: batch.failed_items,
                completed_at,
            }),
            BatchStatus::Pending | BatchStatus::Processing => None,
        }
    }

    pub fn batch_id(&self) -> BatchId {
        match self {
            BatchEvent::BatchCompleted { batch_id, .. } | BatchEvent::BatchFailed { batch_id, .. } => {
                *batch_id
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BatchEvent::BatchCompleted { .. } => "batch_completed",
            BatchEvent::BatchFailed { .. } => "batch_failed",
        }
    }
}

/// Result of a delivery attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationResult {
    /// Whether delivery was successful
    pub success: bool,
    /// HTTP status code or sink-specific status
    pub status_code: Option<u16>,
    /// Response body or error message
    pub response: Option<String>,
    /// Time taken for the operation in milliseconds
    pub duration_ms: u64,
}

impl NotificationResult {
    pub fn delivered() -> Self {
        Self {
            success: true,
            status_code: None,
            response: None,
            duration_ms: 0,
        }
    }
}

/// Destination for batch events
///
/// Delivery is fire-and-forget from the engine's point of view: an `Err` or an
/// unsuccessful result is logged and never affects job or batch state.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &BatchEvent) -> AppResult<NotificationResult>;

    /// Sink name for logging
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::BatchOptions;
    use serde_json::json;
    use uuid::Uuid;

    fn batch(status: BatchStatus) -> Batch {
        let now = Timestamp::from_second(1_700_000_000).unwrap();
        Batch {
            id: Uuid::nil(),
            status,
            total_items: 3,
            processed_items: 2,
            failed_items: 1,
            options: BatchOptions {
                batch_size: 2,
                max_attempts: 3,
                notify_on_complete: true,
            },
            created_by: None,
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        }
    }

    #[test]
    fn test_event_only_for_terminal_batches() {
        let now = Timestamp::UNIX_EPOCH;
        assert!(BatchEvent::from_batch(&batch(BatchStatus::Processing), now).is_none());

        let event = BatchEvent::from_batch(&batch(BatchStatus::Failed), now).unwrap();
        assert_eq!(event.name(), "batch_failed");
        assert_eq!(event.batch_id(), Uuid::nil());
    }

    #[test]
    fn test_event_wire_format() {
        let event = BatchEvent::from_batch(&batch(BatchStatus::Completed), Timestamp::UNIX_EPOCH).unwrap();
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], json!("batch_completed"));
        assert_eq!(value["processed_items"], json!(2));
        assert!(value.get("failed_items").is_none());
    }
}
