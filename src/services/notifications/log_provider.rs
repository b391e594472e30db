use async_trait::async_trait;

use super::provider::{BatchEvent, NotificationResult, NotificationSink};
use crate::error::AppResult;

/// Writes batch events to the log; used when no webhook is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, event: &BatchEvent) -> AppResult<NotificationResult> {
        tracing::info!(
            event = event.name(),
            batch.id = %event.batch_id(),
            "Batch finished"
        );
        Ok(NotificationResult::delivered())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
