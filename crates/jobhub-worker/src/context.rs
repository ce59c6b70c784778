//! Per-job execution context.
//!
//! A [`RunContext`] is built once per execution from a [`ContextTemplate`]
//! plus the two closures the pool provides: the op-command probe and the
//! check-in reporter. Both are explicit single-method contracts held as
//! typed references; building a context without them fails fast, so user
//! code can never hit a missing dispatch at run time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;

use jobhub_core::config::LogLevel;
use jobhub_core::error::AppError;
use jobhub_core::models::OpCommand;
use jobhub_core::result::AppResult;

use crate::joblog::JobLogger;

/// Probe for the most recent pending op-command of a job.
///
/// Non-blocking and idempotent: reading does not consume the command.
#[async_trait]
pub trait OpCommandProbe: Send + Sync {
    async fn pending_command(&self) -> Option<OpCommand>;
}

/// Reporter persisting a job's free-form progress messages.
///
/// Best-effort: failures are logged by the implementation and never
/// surfaced to the job.
#[async_trait]
pub trait CheckinReporter: Send + Sync {
    async fn checkin(&self, message: &str);
}

/// The per-execution context handed to user job code.
pub struct RunContext {
    system: watch::Receiver<bool>,
    logger: Arc<JobLogger>,
    op_probe: Arc<dyn OpCommandProbe>,
    checkin: Arc<dyn CheckinReporter>,
    properties: Arc<HashMap<String, serde_json::Value>>,
}

impl RunContext {
    /// A clone of the ambient process cancellation signal.
    pub fn system_signal(&self) -> watch::Receiver<bool> {
        self.system.clone()
    }

    /// Whether process-wide shutdown has been requested.
    pub fn system_cancelled(&self) -> bool {
        *self.system.borrow()
    }

    /// The pending op-command for this job, if any.
    pub async fn op_command(&self) -> Option<OpCommand> {
        self.op_probe.pending_command().await
    }

    /// Report a progress message.
    pub async fn check_in(&self, message: &str) {
        self.checkin.checkin(message).await;
    }

    /// The per-job file logger.
    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }

    /// Read-only property lookup for injected dependencies.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("log_path", &self.logger.path())
            .finish()
    }
}

/// Prototype from which one [`RunContext`] per execution is built.
#[derive(Debug, Clone)]
pub struct ContextTemplate {
    system: watch::Receiver<bool>,
    log_base: PathBuf,
    log_level: LogLevel,
    properties: Arc<HashMap<String, serde_json::Value>>,
}

impl ContextTemplate {
    /// Create a template from the ambient signal and logger settings.
    pub fn new(system: watch::Receiver<bool>, log_base: PathBuf, log_level: LogLevel) -> Self {
        Self {
            system,
            log_base,
            log_level,
            properties: Arc::new(HashMap::new()),
        }
    }

    /// Replace the injected property bag.
    pub fn with_properties(mut self, properties: HashMap<String, serde_json::Value>) -> Self {
        self.properties = Arc::new(properties);
        self
    }

    /// Build the context for one execution of job `id`.
    pub fn build(
        &self,
        id: Uuid,
        op_probe: Option<Arc<dyn OpCommandProbe>>,
        checkin: Option<Arc<dyn CheckinReporter>>,
    ) -> AppResult<RunContext> {
        let op_probe =
            op_probe.ok_or_else(|| AppError::internal("failed to inject the op-command probe"))?;
        let checkin =
            checkin.ok_or_else(|| AppError::internal("failed to inject the check-in reporter"))?;

        Ok(RunContext {
            system: self.system.clone(),
            logger: Arc::new(JobLogger::new(&self.log_base, id, self.log_level)),
            op_probe,
            checkin,
            properties: Arc::clone(&self.properties),
        })
    }
}
