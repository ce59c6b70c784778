//! Queue backend capability trait.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{JobRecord, JobStatus, OpCommand, WorkerPoolStats};
use crate::result::AppResult;

/// Trait for queue backends (Redis, or in-memory for tests).
///
/// The backend owns all persisted job state: job records, ready/scheduled/
/// dead queues, periodic templates, uniqueness locks, op-commands, hook
/// URLs, and pool heartbeats. Workers on any node coordinate exclusively
/// through these primitives; nothing job-related lives in process memory.
#[async_trait]
pub trait QueueBackend: Send + Sync + std::fmt::Debug + 'static {
    /// Persist a record and push it onto the ready queue for its job name.
    async fn enqueue(&self, record: &JobRecord) -> AppResult<()>;

    /// Persist a record and park it in the scheduled set, ordered by its
    /// `run_at` time.
    async fn schedule(&self, record: &JobRecord) -> AppResult<()>;

    /// Persist a periodic template.
    async fn register_periodic(&self, record: &JobRecord) -> AppResult<()>;

    /// All registered periodic templates.
    async fn periodic_templates(&self) -> AppResult<Vec<JobRecord>>;

    /// Claim a single periodic firing slot. Returns `false` when another
    /// pool already fired this template for `fire_at`.
    async fn mark_periodic_fired(
        &self,
        template_id: Uuid,
        fire_at: DateTime<Utc>,
        ttl: Duration,
    ) -> AppResult<bool>;

    /// Move scheduled jobs whose `run_at` has passed onto their ready
    /// queues. Returns the number of promoted jobs.
    async fn promote_scheduled(&self, now: DateTime<Utc>) -> AppResult<u64>;

    /// Pop one ready job from the given queues, leasing it to `pool_id`.
    async fn dequeue(&self, names: &[String], pool_id: &str) -> AppResult<Option<JobRecord>>;

    /// Release the in-flight lease `pool_id` holds on a job.
    async fn release(&self, pool_id: &str, id: Uuid) -> AppResult<()>;

    /// Persist a record verbatim.
    async fn save(&self, record: &JobRecord) -> AppResult<()>;

    /// Read a record by id.
    async fn read(&self, id: Uuid) -> AppResult<Option<JobRecord>>;

    /// Transition a job's status, enforcing the status DAG. Rejects
    /// terminal → non-terminal writes with a conflict. Returns the
    /// updated record.
    async fn set_status(&self, id: Uuid, status: JobStatus) -> AppResult<JobRecord>;

    /// Record a progress check-in message with the current timestamp.
    async fn record_check_in(&self, id: Uuid, message: &str) -> AppResult<()>;

    /// Acquire the uniqueness lock for a `(name, parameters)` digest on
    /// behalf of job `id`. Returns `false` if the lock is already held.
    async fn acquire_unique_lock(&self, digest: &str, id: Uuid) -> AppResult<bool>;

    /// Release a uniqueness lock.
    async fn release_unique_lock(&self, digest: &str) -> AppResult<()>;

    /// Persist the status-hook URL for a job.
    async fn save_hook(&self, id: Uuid, url: &str) -> AppResult<()>;

    /// Read the status-hook URL for a job, if registered.
    async fn read_hook(&self, id: Uuid) -> AppResult<Option<String>>;

    /// Address an op-command (`stop`/`cancel`) to a job.
    async fn write_command(&self, id: Uuid, command: OpCommand) -> AppResult<()>;

    /// Read the pending op-command for a job, if any. Reading does not
    /// consume the command.
    async fn read_command(&self, id: Uuid) -> AppResult<Option<OpCommand>>;

    /// Drop the pending op-command for a job.
    async fn clear_command(&self, id: Uuid) -> AppResult<()>;

    /// Remove a not-yet-running job from its ready queue or the scheduled
    /// set. Returns `true` when this caller removed it; `false` means a
    /// worker got there first.
    async fn remove_from_queue(&self, record: &JobRecord) -> AppResult<bool>;

    /// Record a job in the dead-letter set.
    async fn push_dead(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<()>;

    /// Refresh this pool's liveness record.
    async fn heartbeat(&self, stats: &WorkerPoolStats) -> AppResult<()>;

    /// Liveness records of all pools sharing this backend.
    async fn pool_stats(&self) -> AppResult<Vec<WorkerPoolStats>>;

    /// Remove pools whose heartbeat is older than `expiry` and collect
    /// the jobs they still held leases on. Each orphan is returned to
    /// exactly one caller across all nodes.
    async fn reap_expired_pools(&self, expiry: Duration) -> AppResult<Vec<JobRecord>>;

    /// Check that the backend is reachable.
    async fn health_check(&self) -> AppResult<bool>;
}
