use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler as TokioCronScheduler};

use crate::config::Settings;
use crate::error::{AppError, AppResult};
use crate::jobs::dispatcher::Dispatcher;
use crate::jobs::maintenance::Maintenance;

/// Cron expressions for the periodic triggers; `None` disables one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Triggers {
    pub cycle: Option<String>,
    pub reconcile: Option<String>,
    pub cleanup: Option<String>,
}

impl Triggers {
    pub fn from_settings(settings: &Settings) -> Self {
        let dispatcher = &settings.dispatcher;
        Self {
            cycle: dispatcher.enabled.then(|| dispatcher.cycle_cron.clone()),
            reconcile: dispatcher.enabled.then(|| dispatcher.reconcile_cron.clone()),
            cleanup: settings
                .retention
                .enabled
                .then(|| settings.retention.cleanup_cron.clone()),
        }
    }
}

/// Drives the dispatcher and maintenance from tokio-cron-scheduler
///
/// Each trigger skips a tick while its previous run is still going, so a slow
/// cycle never overlaps the next one within this process.
pub struct JobScheduler {
    scheduler: Arc<Mutex<TokioCronScheduler>>,
    dispatcher: Dispatcher,
    maintenance: Maintenance,
}

impl JobScheduler {
    pub async fn new(dispatcher: Dispatcher, maintenance: Maintenance) -> AppResult<Self> {
        let scheduler = TokioCronScheduler::new()
            .await
            .map_err(|e| AppError::Internal {
                source: anyhow::Error::from(e),
            })?;

        Ok(Self {
            scheduler: Arc::new(Mutex::new(scheduler)),
            dispatcher,
            maintenance,
        })
    }

    /// Register the configured triggers and start ticking
    pub async fn start(&self, triggers: &Triggers) -> AppResult<()> {
        if let Some(cron) = &triggers.cycle {
            let dispatcher = self.dispatcher.clone();
            self.schedule("dispatch", cron, move || {
                let dispatcher = dispatcher.clone();
                async move {
                    if let Err(e) = dispatcher.run_cycle().await {
                        tracing::error!(error = %e, "Dispatch cycle failed");
                    }
                }
            })
            .await?;
        }

        if let Some(cron) = &triggers.reconcile {
            let maintenance = self.maintenance.clone();
            self.schedule("reconcile", cron, move || {
                let maintenance = maintenance.clone();
                async move {
                    if let Err(e) = maintenance.recover().await {
                        tracing::error!(error = %e, "Recovery failed");
                    }
                }
            })
            .await?;
        }

        if let Some(cron) = &triggers.cleanup {
            let maintenance = self.maintenance.clone();
            self.schedule("cleanup", cron, move || {
                let maintenance = maintenance.clone();
                async move {
                    if let Err(e) = maintenance.cleanup().await {
                        tracing::error!(error = %e, "Retention cleanup failed");
                    }
                }
            })
            .await?;
        }

        self.scheduler
            .lock()
            .await
            .start()
            .await
            .map_err(|e| AppError::Internal {
                source: anyhow::Error::from(e),
            })?;
        tracing::info!(?triggers, "Scheduler started");
        Ok(())
    }

    /// Stop ticking and signal running executors to wind down
    pub async fn stop(&self) -> AppResult<()> {
        self.dispatcher.shutdown_token().cancel();
        self.scheduler
            .lock()
            .await
            .shutdown()
            .await
            .map_err(|e| AppError::Internal {
                source: anyhow::Error::from(e),
            })?;
        tracing::info!("Scheduler stopped");
        Ok(())
    }

    async fn schedule<F, Fut>(&self, name: &'static str, cron: &str, task: F) -> AppResult<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = Arc::new(task);
        let running = Arc::new(Mutex::new(()));

        let cron_job = Job::new_async(cron, move |_uuid, _lock| {
            let task = Arc::clone(&task);
            let running = Arc::clone(&running);

            Box::pin(async move {
                let Ok(_guard) = running.try_lock() else {
                    tracing::warn!(task = name, "Previous run still in progress, skipping tick");
                    return;
                };
                task().await;
            })
        })
        .map_err(|e| AppError::Configuration {
            key: format!("{name}_cron"),
            source: anyhow::Error::from(e),
        })?;

        self.scheduler
            .lock()
            .await
            .add(cron_job)
            .await
            .map_err(|e| AppError::Internal {
                source: anyhow::Error::from(e),
            })?;
        tracing::debug!(task = name, cron, "Trigger registered");
        Ok(())
    }
}
