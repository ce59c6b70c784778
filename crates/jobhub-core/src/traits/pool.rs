//! Worker pool capability trait.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{JobParameters, JobStats, WorkerPoolStats};
use crate::result::AppResult;

/// The operations a worker pool exposes to the controller.
///
/// The controller consumes the pool exclusively through this trait, which
/// keeps the policy layer free of any dependency on the pool's
/// construction and lets tests substitute a fake.
#[async_trait]
pub trait Pool: Send + Sync + 'static {
    /// Enqueue a generic job for immediate execution.
    async fn enqueue(
        &self,
        name: &str,
        parameters: JobParameters,
        unique: bool,
    ) -> AppResult<JobStats>;

    /// Enqueue a job to run once, `delay_seconds` from now.
    async fn schedule(
        &self,
        name: &str,
        parameters: JobParameters,
        delay_seconds: u64,
        unique: bool,
    ) -> AppResult<JobStats>;

    /// Register a periodic template firing per `cron_spec`.
    async fn periodically_enqueue(
        &self,
        name: &str,
        parameters: JobParameters,
        cron_spec: &str,
    ) -> AppResult<JobStats>;

    /// Stats of a job or periodic template.
    async fn get_job_stats(&self, id: Uuid) -> AppResult<JobStats>;

    /// Ask a job to halt gracefully, without retry.
    async fn stop_job(&self, id: Uuid) -> AppResult<()>;

    /// Cancel a job: immediately when not yet running, cooperatively
    /// otherwise.
    async fn cancel_job(&self, id: Uuid) -> AppResult<()>;

    /// Re-enqueue a job resting in the `error` state.
    async fn retry_job(&self, id: Uuid) -> AppResult<()>;

    /// Register a webhook notified on every status transition of the job.
    async fn register_hook(&self, id: Uuid, url: &str) -> AppResult<()>;

    /// Whether `name` is a registered job.
    fn is_known_job(&self, name: &str) -> bool;

    /// Run the registered job's parameter validator.
    fn validate_job_parameters(&self, name: &str, parameters: &JobParameters) -> AppResult<()>;

    /// Liveness stats of every pool sharing the backend.
    async fn stats(&self) -> AppResult<Vec<WorkerPoolStats>>;
}
