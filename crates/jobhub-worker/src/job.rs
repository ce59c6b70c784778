//! The job contract user implementations plug into.

use async_trait::async_trait;

use jobhub_core::error::AppError;
use jobhub_core::models::JobParameters;
use jobhub_core::result::AppResult;

use crate::context::RunContext;

/// Trait for job implementations.
///
/// One instance per job name is registered at bootstrap and shared by all
/// executions; per-execution state travels through the [`RunContext`] and
/// the parameters.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Maximum failed executions before the job is marked dead.
    /// Zero selects the service default of 4.
    fn max_fails(&self) -> u32 {
        0
    }

    /// Whether a failed execution may be re-scheduled at all.
    fn should_retry(&self) -> bool {
        true
    }

    /// Validate submission parameters before the job is accepted.
    fn validate_params(&self, parameters: &JobParameters) -> AppResult<()>;

    /// Execute the job.
    ///
    /// Implementations are expected to poll both cancellation signals on
    /// the context: the ambient process signal and the per-job op-command.
    /// Returning [`JobError::Stopped`] or [`JobError::Cancelled`] selects
    /// the matching terminal status with no retry; any other error takes
    /// the retry path.
    async fn run(&self, ctx: &RunContext, parameters: JobParameters) -> Result<(), JobError>;
}

/// Errors a job run can end with.
///
/// `Stopped` and `Cancelled` are sentinels the pool matches on by kind,
/// never by message; they are consumed inside the worker and never reach
/// the HTTP edge.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The job observed a stop command and halted gracefully.
    #[error("job exited on stop command")]
    Stopped,

    /// The job observed a cancel command and abandoned its work.
    #[error("job exited on cancel command")]
    Cancelled,

    /// The execution failed; the retry policy decides what happens next.
    #[error(transparent)]
    Failed(#[from] AppError),
}

impl JobError {
    /// A plain failure with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(AppError::internal(message))
    }
}
