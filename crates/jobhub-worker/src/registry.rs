//! Process-local registry of job implementations.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use jobhub_core::error::AppError;
use jobhub_core::models::JobParameters;
use jobhub_core::result::AppResult;

use crate::job::Job;

/// Mapping from job name to its registered implementation.
///
/// Written only during bootstrap, before the pool starts; read-only
/// afterwards. Registering the same name twice is a programmer error and
/// aborts bootstrap.
#[derive(Default)]
pub struct JobRegistry {
    entries: HashMap<String, Arc<dyn Job>>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_names", &self.names())
            .finish()
    }
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job implementation under `name`.
    pub fn register(&mut self, name: &str, job: Arc<dyn Job>) -> AppResult<()> {
        if self.entries.contains_key(name) {
            return Err(AppError::conflict(format!("duplicate job '{name}' register")));
        }

        info!(job = %name, "Registered job");
        self.entries.insert(name.to_string(), job);
        Ok(())
    }

    /// Look up a job implementation.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Job>> {
        self.entries.get(name).cloned()
    }

    /// Whether `name` is registered.
    pub fn is_known(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All registered job names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the registered job's parameter validator.
    pub fn validate(&self, name: &str, parameters: &JobParameters) -> AppResult<()> {
        let job = self
            .get(name)
            .ok_or_else(|| AppError::validation(format!("job with name '{name}' is unknown")))?;
        job.validate_params(parameters)
    }
}
