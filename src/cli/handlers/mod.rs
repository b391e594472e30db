//! Command handlers for CLI operations
//!
//! This module contains handlers for different CLI commands,
//! separating command execution logic from parsing and validation.

pub mod batch;
pub mod jobs;
pub mod migrate;
pub mod run;

pub use batch::BatchCommandHandler;
pub use jobs::JobCommandHandler;
pub use migrate::MigrateCommandHandler;
pub use run::RunCommandHandler;

use serde::Serialize;

use crate::error::{AppError, AppResult};

/// Pretty-print a report or record on stdout
pub(crate) fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(|e| AppError::Internal {
        source: anyhow::Error::from(e),
    })?;
    println!("{rendered}");
    Ok(())
}
