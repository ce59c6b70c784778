//! Job models: submission payloads, persisted records, and the status machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Hook status recorded on a successfully registered status hook.
pub const HOOK_STATUS_ACTIVATED: &str = "activated";

/// Hook status recorded when hook registration failed.
pub const HOOK_STATUS_ERROR: &str = "error";

/// Free-form job parameters.
///
/// `serde_json::Map` keeps keys sorted, so serializing a parameter map is
/// already the canonical key-sorted form used for uniqueness digests.
pub type JobParameters = serde_json::Map<String, serde_json::Value>;

/// A job submission, as posted by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Registered job name.
    pub name: String,
    /// Job parameters, passed through to the job implementation.
    #[serde(default)]
    pub parameters: JobParameters,
    /// Optional webhook URL notified on every status transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_hook: Option<String>,
    /// Submission metadata. Validated by the controller.
    pub metadata: Option<JobMetadata>,
}

/// Metadata attached to a job submission.
///
/// `kind` stays a plain string here so the controller can report an
/// unsupported kind in its own validation order instead of failing JSON
/// decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    /// Job kind: `"Generic"`, `"Scheduled"` or `"Periodic"`.
    pub kind: String,
    /// Delay in seconds for `Scheduled` jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_delay: Option<u64>,
    /// Cron expression for `Periodic` jobs (second-precision grammar).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_spec: Option<String>,
    /// Whether the `(name, parameters)` tuple must be unique while the
    /// job is non-terminal.
    #[serde(default)]
    pub unique: bool,
}

/// Kind of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    /// Run once, FIFO.
    Generic,
    /// Run once at `enqueue_time + schedule_delay`.
    Scheduled,
    /// A cron template that spawns one concrete job per firing.
    Periodic,
}

impl JobKind {
    /// Return the kind as its wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "Generic",
            Self::Scheduled => "Scheduled",
            Self::Periodic => "Periodic",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Generic" => Ok(Self::Generic),
            "Scheduled" => Ok(Self::Scheduled),
            "Periodic" => Ok(Self::Periodic),
            other => Err(AppError::bad_request(format!(
                "job kind '{other}' is not supported, only 'Generic', 'Scheduled' and 'Periodic' are"
            ))),
        }
    }
}

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in a ready queue.
    Pending,
    /// Waiting for its `run_at` time (or a periodic template at rest).
    Scheduled,
    /// Currently executing on a worker.
    Running,
    /// Finished cleanly.
    Success,
    /// Last execution failed; a retry may still follow.
    Error,
    /// Halted on a stop command, before or during execution.
    Stopped,
    /// Cancelled before or during execution.
    Cancelled,
    /// Retry budget exhausted.
    Dead,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Stopped | Self::Cancelled | Self::Dead
        )
    }

    /// Whether moving to `next` is a legal transition.
    ///
    /// Encodes the status DAG: jobs start `pending` or `scheduled`, run,
    /// and end in exactly one terminal state; a failed run may loop back
    /// through `error` to `scheduled`. Stop and cancel commands may also
    /// retire a job that never started.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::Scheduled, Self::Running)
                | (
                    Self::Pending | Self::Scheduled | Self::Running,
                    Self::Cancelled | Self::Stopped
                )
                | (Self::Running, Self::Success | Self::Error)
                | (Self::Error, Self::Scheduled | Self::Dead)
        )
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Stopped => "stopped",
            Self::Cancelled => "cancelled",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A control command addressed to a specific job, observed cooperatively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpCommand {
    /// Graceful halt, do not retry.
    Stop,
    /// Abandon the job.
    Cancel,
}

impl OpCommand {
    /// Return the command as its wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for OpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Externally visible stats of a job, returned by the API and persisted
/// inside [`JobRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStats {
    /// Unique job identifier.
    pub id: Uuid,
    /// Registered job name.
    pub name: String,
    /// Job kind.
    pub kind: JobKind,
    /// Whether the job holds a uniqueness lock.
    pub unique: bool,
    /// Current status.
    pub status: JobStatus,
    /// API link for this job; for a periodic firing, the template's link.
    pub ref_link: String,
    /// When the job was accepted.
    pub enqueue_time: DateTime<Utc>,
    /// When the record was last written. Non-decreasing.
    pub update_time: DateTime<Utc>,
    /// Planned execution time for scheduled jobs and periodic firings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<DateTime<Utc>>,
    /// Cron expression for periodic templates and their firings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_spec: Option<String>,
    /// Latest progress message reported by the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in: Option<String>,
    /// When the latest check-in was reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in_at: Option<DateTime<Utc>>,
    /// When the job entered the `dead` state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub die_at: Option<DateTime<Utc>>,
    /// `"activated"` or `"error"`, set when a status hook was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_status: Option<String>,
}

/// The full persisted form of a job: visible stats plus the execution
/// payload and retry bookkeeping the workers need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Externally visible stats.
    pub stats: JobStats,
    /// Parameters handed to the job implementation.
    #[serde(default)]
    pub parameters: JobParameters,
    /// Number of failed executions so far.
    #[serde(default)]
    pub fails: u32,
}

impl JobRecord {
    fn base(name: &str, parameters: JobParameters, kind: JobKind, unique: bool) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            stats: JobStats {
                id,
                name: name.to_string(),
                kind,
                unique,
                status: JobStatus::Pending,
                ref_link: ref_link(id),
                enqueue_time: now,
                update_time: now,
                run_at: None,
                cron_spec: None,
                check_in: None,
                check_in_at: None,
                die_at: None,
                hook_status: None,
            },
            parameters,
            fails: 0,
        }
    }

    /// A generic run-once job, born `pending`.
    pub fn generic(name: &str, parameters: JobParameters, unique: bool) -> Self {
        Self::base(name, parameters, JobKind::Generic, unique)
    }

    /// A delayed run-once job, born `scheduled`.
    pub fn scheduled(
        name: &str,
        parameters: JobParameters,
        unique: bool,
        run_at: DateTime<Utc>,
    ) -> Self {
        let mut record = Self::base(name, parameters, JobKind::Scheduled, unique);
        record.stats.status = JobStatus::Scheduled;
        record.stats.run_at = Some(run_at);
        record
    }

    /// A periodic template. Persisted `scheduled` and never transitions;
    /// only its firings have a lifecycle.
    pub fn periodic_template(name: &str, parameters: JobParameters, cron_spec: &str) -> Self {
        let mut record = Self::base(name, parameters, JobKind::Periodic, false);
        record.stats.status = JobStatus::Scheduled;
        record.stats.cron_spec = Some(cron_spec.to_string());
        record
    }

    /// A concrete firing of a periodic template, due at `run_at`.
    ///
    /// The firing gets a fresh id; its `ref_link` points back at the
    /// template it was spawned from.
    pub fn periodic_firing(template: &JobRecord, run_at: DateTime<Utc>) -> Self {
        let mut record = Self::base(
            &template.stats.name,
            template.parameters.clone(),
            JobKind::Scheduled,
            false,
        );
        record.stats.status = JobStatus::Scheduled;
        record.stats.run_at = Some(run_at);
        record.stats.cron_spec = template.stats.cron_spec.clone();
        record.stats.ref_link = ref_link(template.stats.id);
        record
    }

    /// Effective retry budget: a zero `max_fails` declaration means 4.
    pub fn effective_max_fails(declared: u32) -> u32 {
        if declared == 0 { 4 } else { declared }
    }
}

/// Liveness record one worker pool publishes through the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolStats {
    /// Unique id of the pool process.
    pub pool_id: String,
    /// When the pool started.
    pub started_at: DateTime<Utc>,
    /// When the pool last refreshed its heartbeat.
    pub heartbeat_at: DateTime<Utc>,
    /// Number of worker slots.
    pub concurrency: usize,
    /// Job names the pool can execute.
    pub job_names: Vec<String>,
}

/// API link for a job id.
pub fn ref_link(id: Uuid) -> String {
    format!("/api/v1/jobs/{id}")
}

/// Deterministic digest of `(name, parameters)` used as the uniqueness
/// lock key. Parameters serialize key-sorted, so equal tuples always
/// yield equal digests.
pub fn unique_digest(name: &str, parameters: &JobParameters) -> String {
    let canonical = serde_json::Value::Object(parameters.clone()).to_string();
    let seed = format!("{name}|{canonical}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).to_string()
}
