//! Command executor for dispatching CLI commands
//!
//! Commands that only need configuration run directly; everything else gets an
//! [`AppState`] backed by PostgreSQL.

use super::handlers::{
    BatchCommandHandler, JobCommandHandler, MigrateCommandHandler, RunCommandHandler,
};
use super::parser::{BatchCommands, Cli, Commands};
use crate::config::settings::Settings;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Execute a CLI command with the given settings
///
/// No subcommand means `run`.
pub async fn execute_command(cli: Cli, settings: Settings) -> AppResult<()> {
    validate_command_args(&cli)?;

    match cli.command {
        None => RunCommandHandler::new(settings).execute(false).await,
        Some(Commands::Run { dry_run, .. }) => {
            RunCommandHandler::new(settings).execute(dry_run).await
        }
        Some(Commands::Cycle) => RunCommandHandler::new(settings).cycle().await.map(|_| ()),
        Some(Commands::Migrate { dry_run, rollback }) => {
            MigrateCommandHandler::new(settings)
                .execute(dry_run, rollback)
                .await
        }
        Some(Commands::Submit(args)) => {
            let state = AppState::with_postgres(settings).await?;
            JobCommandHandler::new(state).submit(args).await.map(|_| ())
        }
        Some(Commands::Status { id }) => {
            let state = AppState::with_postgres(settings).await?;
            JobCommandHandler::new(state).status(id).await.map(|_| ())
        }
        Some(Commands::Cancel { id, actor }) => {
            let state = AppState::with_postgres(settings).await?;
            JobCommandHandler::new(state)
                .cancel(id, &actor)
                .await
                .map(|_| ())
        }
        Some(Commands::Stats) => {
            let state = AppState::with_postgres(settings).await?;
            JobCommandHandler::new(state).stats().await
        }
        Some(Commands::Cleanup) => {
            let state = AppState::with_postgres(settings).await?;
            JobCommandHandler::new(state).cleanup().await.map(|_| ())
        }
        Some(Commands::Batch(command)) => {
            let state = AppState::with_postgres(settings).await?;
            let handler = BatchCommandHandler::new(state);
            match command {
                BatchCommands::Create {
                    file,
                    batch_size,
                    max_attempts,
                    no_notify,
                    actor,
                } => handler
                    .create(&file, batch_size, max_attempts, !no_notify, &actor)
                    .await
                    .map(|_| ()),
                BatchCommands::Status { id } => handler.status(id).await.map(|_| ()),
            }
        }
    }
}

/// Validate command arguments before anything connects to the database
fn validate_command_args(cli: &Cli) -> AppResult<()> {
    cli.validate().map_err(|msg| AppError::Validation {
        field: "cli_arguments".to_string(),
        reason: msg,
    })?;

    if let Some(Commands::Migrate {
        rollback: Some(steps),
        ..
    }) = &cli.command
        && *steps > 50
    {
        tracing::warn!(
            steps,
            "Rolling back this many migrations is a large operation. Consider using smaller steps."
        );
    }

    Ok(())
}
