//! Batch command handlers

use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::jobs::{Actor, BatchId, BatchOptions, BatchProgress, NewJob};
use crate::state::AppState;

use super::print_json;

/// Handler for `batch create` and `batch status`
pub struct BatchCommandHandler {
    state: AppState,
}

impl BatchCommandHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Submit the JSON array in `file` as one batch
    ///
    /// Unset options fall back to the `[batch]` and `[retry]` configuration.
    pub async fn create(
        &self,
        file: &Path,
        batch_size: Option<u32>,
        max_attempts: Option<u32>,
        notify: bool,
        actor: &str,
    ) -> AppResult<BatchId> {
        let items = read_items(file)?;

        let defaults = self.state.queue.defaults().batch_options();
        let options = BatchOptions {
            batch_size: batch_size.unwrap_or(defaults.batch_size),
            max_attempts: max_attempts.unwrap_or(defaults.max_attempts),
            notify_on_complete: notify && defaults.notify_on_complete,
        };

        let id = self
            .state
            .queue
            .submit_batch(items, Some(options), &Actor::new(actor))
            .await?;
        println!("{id}");
        Ok(id)
    }

    pub async fn status(&self, id: BatchId) -> AppResult<BatchProgress> {
        let progress = self.state.queue.batch_progress(id).await?;
        print_json(&progress)?;
        Ok(progress)
    }
}

fn read_items(file: &Path) -> AppResult<Vec<NewJob>> {
    let raw = std::fs::read_to_string(file).map_err(|e| AppError::Validation {
        field: "file".to_string(),
        reason: format!("cannot read '{}': {}", file.display(), e),
    })?;

    serde_json::from_str(&raw).map_err(|e| AppError::Validation {
        field: "file".to_string(),
        reason: format!("expected a JSON array of jobs: {}", e),
    })
}
