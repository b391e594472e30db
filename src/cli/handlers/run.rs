//! Run and cycle command handlers

use crate::config::settings::Settings;
use crate::error::{AppError, AppResult};
use crate::jobs::{CycleReport, ExecutorRegistry, Triggers};
use crate::services::sink_from_config;
use crate::state::AppState;

use super::print_json;

/// Handler for `run` (daemon) and `cycle` (one-shot dispatch)
pub struct RunCommandHandler {
    config: Settings,
}

impl RunCommandHandler {
    pub fn new(config: Settings) -> Self {
        Self { config }
    }

    /// Start the daemon, or only check what it would start when `dry_run`
    pub async fn execute(&self, dry_run: bool) -> AppResult<()> {
        if dry_run {
            return self.dry_run();
        }

        let state = AppState::with_postgres(self.config.clone()).await?;

        let recovered = state.maintenance.recover().await?;
        tracing::info!(
            released = recovered.released,
            finalized = recovered.finalized,
            "Startup recovery finished"
        );

        let scheduler = state.scheduler().await?;
        scheduler.start(&Triggers::from_settings(&self.config)).await?;
        tracing::info!(
            version = crate::pkg_version(),
            kinds = ?state.registry.kinds(),
            "mfw-queue running, press Ctrl+C to stop"
        );

        tokio::signal::ctrl_c().await.map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?;
        tracing::info!("Shutdown signal received");

        scheduler.stop().await
    }

    /// Run exactly one dispatch cycle against the database
    pub async fn cycle(&self) -> AppResult<CycleReport> {
        let state = AppState::with_postgres(self.config.clone()).await?;
        let report = state.dispatcher.run_cycle().await?;
        print_json(&report)?;
        Ok(report)
    }

    /// Build everything that does not need the database and report it
    fn dry_run(&self) -> AppResult<()> {
        let registry = ExecutorRegistry::from_endpoints(&self.config.executors)?;
        let notifier = sink_from_config(&self.config.notifications)?;
        let triggers = Triggers::from_settings(&self.config);

        println!("✓ Configuration is valid");
        println!("  Executors:     {:?}", registry.kinds());
        println!("  Notifications: {}", notifier.name());
        println!("  Dispatch cron: {}", triggers.cycle.as_deref().unwrap_or("disabled"));
        println!(
            "  Reconcile:     {}",
            triggers.reconcile.as_deref().unwrap_or("disabled")
        );
        println!("  Cleanup:       {}", triggers.cleanup.as_deref().unwrap_or("disabled"));
        Ok(())
    }
}
