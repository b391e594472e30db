//! Wiring of the engine components.
//!
//! Every entry point (daemon, one-shot CLI commands, tests) builds the same
//! graph of components; only the stores and the clock differ.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::db::{AsyncDbPool, establish_async_connection_pool, run_migrations};
use crate::error::AppResult;
use crate::jobs::{
    BatchCoordinator, Clock, Dispatcher, DispatcherOptions, ExecutorRegistry, JobQueue,
    JobScheduler, Maintenance, RateLimiter, RetryPolicy, SubmissionDefaults, SystemClock,
};
use crate::repositories::Repositories;
use crate::services::notifications::{NotificationSink, sink_from_config};
use crate::store::{BatchStore, JobStore, MemoryStore, UsageStore};

/// Shared handles to every engine component. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    /// Present when backed by PostgreSQL
    pub db_pool: Option<AsyncDbPool>,
    pub queue: JobQueue,
    pub dispatcher: Dispatcher,
    pub maintenance: Maintenance,
    pub batches: BatchCoordinator,
    pub rate_limiter: Arc<RateLimiter>,
    pub registry: Arc<ExecutorRegistry>,
}

/// Storage backends for [`AppState::build`]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub batches: Arc<dyn BatchStore>,
    pub usage: Arc<dyn UsageStore>,
}

impl Stores {
    pub fn memory(store: MemoryStore) -> Self {
        Self {
            jobs: Arc::new(store.clone()),
            batches: Arc::new(store.clone()),
            usage: Arc::new(store),
        }
    }

    pub fn postgres(repos: Repositories) -> Self {
        Self {
            jobs: Arc::new(repos.jobs),
            batches: Arc::new(repos.batches),
            usage: Arc::new(repos.usage),
        }
    }
}

impl AppState {
    /// Connect to PostgreSQL and wire executors and notifications from settings
    ///
    /// # Example
    /// ```ignore
    /// let state = AppState::with_postgres(settings).await?;
    /// let report = state.dispatcher.run_cycle().await?;
    /// ```
    pub async fn with_postgres(settings: Settings) -> AppResult<Self> {
        if settings.database.auto_migrate {
            let applied = run_migrations(&settings.database.url).await?;
            if !applied.is_empty() {
                tracing::info!(count = applied.len(), "Applied pending migrations");
            }
        }

        let pool = establish_async_connection_pool(&settings.database).await?;
        let registry = ExecutorRegistry::from_endpoints(&settings.executors)?;
        let notifier = sink_from_config(&settings.notifications)?;

        let mut state = Self::build(
            settings,
            Stores::postgres(Repositories::new(pool.clone())),
            registry,
            notifier,
            Arc::new(SystemClock),
        );
        state.db_pool = Some(pool);
        Ok(state)
    }

    /// Everything in process; used by tests and embedding code
    pub fn in_memory(
        settings: Settings,
        store: MemoryStore,
        registry: ExecutorRegistry,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::build(settings, Stores::memory(store), registry, notifier, clock)
    }

    pub fn build(
        settings: Settings,
        stores: Stores,
        registry: ExecutorRegistry,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(registry);
        let batches = BatchCoordinator::new(
            stores.jobs.clone(),
            stores.batches.clone(),
            notifier,
            clock.clone(),
        );
        let rate_limiter = Arc::new(RateLimiter::new(
            settings.rate_limits.clone(),
            stores.usage.clone(),
            clock.clone(),
        ));

        let dispatcher = Dispatcher::new(
            stores.jobs.clone(),
            registry.clone(),
            rate_limiter.clone(),
            RetryPolicy::from_config(&settings.retry),
            batches.clone(),
            clock.clone(),
            DispatcherOptions::from(&settings.dispatcher),
        );
        let queue = JobQueue::new(
            stores.jobs.clone(),
            batches.clone(),
            registry.clone(),
            clock.clone(),
            SubmissionDefaults::from_settings(&settings),
        );
        let maintenance = Maintenance::new(
            stores.jobs,
            stores.batches,
            stores.usage,
            batches.clone(),
            clock,
            Duration::from_secs(settings.dispatcher.stale_after),
            settings.retention.clone(),
        );

        Self {
            settings: Arc::new(settings),
            db_pool: None,
            queue,
            dispatcher,
            maintenance,
            batches,
            rate_limiter,
            registry,
        }
    }

    /// Cron-driven scheduler over this state's dispatcher and maintenance
    pub async fn scheduler(&self) -> AppResult<JobScheduler> {
        JobScheduler::new(self.dispatcher.clone(), self.maintenance.clone()).await
    }
}
