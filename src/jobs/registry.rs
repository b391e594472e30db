use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::config::ExecutorEndpoint;
use crate::error::{AppError, AppResult};
use crate::jobs::executor::JobExecutor;
use crate::jobs::tasks::HttpExecutor;
use crate::jobs::types::JobKind;

/// Maps each job kind to the executor that performs it
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<JobKind, Arc<dyn JobExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build HTTP executors from `executors.<kind>` configuration
    pub fn from_endpoints(endpoints: &HashMap<String, ExecutorEndpoint>) -> AppResult<Self> {
        let mut registry = Self::new();
        for (kind, endpoint) in endpoints {
            let kind = JobKind::from_str(kind)?;
            registry.register(kind, Arc::new(HttpExecutor::new(kind, endpoint.clone())?));
        }
        Ok(registry)
    }

    /// Register an executor, replacing any previous one for `kind`
    pub fn register(&mut self, kind: JobKind, executor: Arc<dyn JobExecutor>) -> &mut Self {
        self.executors.insert(kind, executor);
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobExecutor>> {
        self.executors.get(&kind).cloned()
    }

    pub fn contains(&self, kind: JobKind) -> bool {
        self.executors.contains_key(&kind)
    }

    /// Registered kinds in declaration order
    pub fn kinds(&self) -> Vec<JobKind> {
        JobKind::ALL
            .into_iter()
            .filter(|kind| self.contains(*kind))
            .collect()
    }

    /// Submission-time check: the kind must be runnable and accept the payload
    pub fn validate(&self, kind: JobKind, payload: &JsonValue) -> AppResult<()> {
        let executor = self.executors.get(&kind).ok_or_else(|| {
            AppError::validation("kind", format!("no executor registered for '{kind}'"))
        })?;
        executor.validate(payload)
    }
}
