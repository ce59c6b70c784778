//! The worker pool.
//!
//! A pool runs a bounded set of in-process workers that pull ready jobs
//! from the shared queue backend and execute them, plus the background
//! loops the job lifecycle needs: the scheduled-job promoter, the periodic
//! cron firer, the lease reaper, and the heartbeat emitter. Nothing
//! job-related is kept in process memory; pools on different nodes
//! coordinate purely through the backend.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use rand::Rng;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use jobhub_core::error::AppError;
use jobhub_core::models::{
    JobKind, JobParameters, JobRecord, JobStats, JobStatus, OpCommand, WorkerPoolStats,
    unique_digest,
};
use jobhub_core::result::AppResult;
use jobhub_core::traits::{Pool, QueueBackend};

use crate::context::{CheckinReporter, ContextTemplate, OpCommandProbe};
use crate::hooks::{HookDispatcher, HookEvent};
use crate::job::JobError;
use crate::registry::JobRegistry;

/// TTL of the marker that claims one periodic firing slot across pools.
const FIRED_MARKER_TTL: Duration = Duration::from_secs(300);

/// Tunables of a worker pool. The defaults are the production values;
/// tests shrink the intervals.
#[derive(Debug, Clone)]
pub struct WorkerPoolOptions {
    /// Number of concurrent worker slots.
    pub workers: usize,
    /// Sleep between empty ready-queue polls.
    pub poll_interval: Duration,
    /// Tick of the scheduled-job promoter.
    pub promote_interval: Duration,
    /// Tick of the periodic cron firer.
    pub cron_interval: Duration,
    /// Tick of the heartbeat emitter.
    pub heartbeat_interval: Duration,
    /// A pool whose heartbeat is older than this has lost its leases.
    pub lease_expiry: Duration,
    /// Base of the exponential retry backoff.
    pub backoff_base: Duration,
    /// Upper bound of the retry backoff.
    pub backoff_cap: Duration,
    /// How long shutdown waits for in-flight jobs.
    pub drain_window: Duration,
}

impl WorkerPoolOptions {
    /// Production defaults for `workers` slots.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            poll_interval: Duration::from_secs(1),
            promote_interval: Duration::from_secs(1),
            cron_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(15),
            lease_expiry: Duration::from_secs(60),
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(300),
            drain_window: Duration::from_secs(10),
        }
    }
}

impl Default for WorkerPoolOptions {
    fn default() -> Self {
        Self::with_workers(10)
    }
}

/// A pool of workers sharing one queue backend.
pub struct WorkerPool {
    pool_id: String,
    backend: Arc<dyn QueueBackend>,
    registry: Arc<JobRegistry>,
    template: ContextTemplate,
    hooks: HookDispatcher,
    options: WorkerPoolOptions,
    started_at: chrono::DateTime<Utc>,
    shutdown: watch::Receiver<bool>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("pool_id", &self.pool_id)
            .field("workers", &self.options.workers)
            .finish()
    }
}

impl WorkerPool {
    /// Create a pool. Call [`WorkerPool::start`] to spawn its loops.
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        registry: Arc<JobRegistry>,
        template: ContextTemplate,
        options: WorkerPoolOptions,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool_id: Uuid::new_v4().to_string(),
            backend,
            registry,
            template,
            hooks: HookDispatcher::start(shutdown.clone()),
            options,
            started_at: Utc::now(),
            shutdown,
        }
    }

    /// Id of this pool instance.
    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    /// Spawn the worker loop and all background loops.
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(
            pool_id = %self.pool_id,
            workers = self.options.workers,
            jobs = ?self.registry.names(),
            "Worker pool starting"
        );

        vec![
            tokio::spawn(Arc::clone(&self).run_workers()),
            tokio::spawn(Arc::clone(&self).run_promoter()),
            tokio::spawn(Arc::clone(&self).run_cron_firer()),
            tokio::spawn(Arc::clone(&self).run_reaper()),
            tokio::spawn(Arc::clone(&self).run_heartbeat()),
        ]
    }

    // ── worker loop ─────────────────────────────────────────────

    async fn run_workers(self: Arc<Self>) {
        let semaphore = Arc::new(Semaphore::new(self.options.workers));
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let worked = Self::poll_and_execute(&self, &semaphore).await;
            if !worked {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = time::sleep(self.options.poll_interval) => {}
                }
            }
        }

        info!(pool_id = %self.pool_id, "Waiting for in-flight jobs to complete...");
        let _ = time::timeout(
            self.options.drain_window,
            semaphore.acquire_many(self.options.workers as u32),
        )
        .await;
        info!(pool_id = %self.pool_id, "Worker pool shut down");
    }

    /// Poll for a ready job and execute it on a free slot. Returns whether
    /// a job was picked up.
    async fn poll_and_execute(pool: &Arc<Self>, semaphore: &Arc<Semaphore>) -> bool {
        let permit = match Arc::clone(semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return false,
        };

        let names = pool.registry.names();
        match pool.backend.dequeue(&names, &pool.pool_id).await {
            Ok(Some(record)) => {
                let worker = Arc::clone(pool);
                tokio::spawn(async move {
                    let _permit = permit;
                    worker.execute(record).await;
                });
                true
            }
            Ok(None) => {
                drop(permit);
                false
            }
            Err(err) => {
                drop(permit);
                warn!(%err, "Failed to dequeue job");
                false
            }
        }
    }

    async fn execute(self: Arc<Self>, record: JobRecord) {
        let id = record.stats.id;

        // A stop or cancel issued before pickup wins over execution.
        if let Ok(Some(command)) = self.backend.read_command(id).await {
            if !record.stats.status.is_terminal() && record.stats.status != JobStatus::Running {
                self.finish(id, terminal_for(command)).await;
                self.release_lease(id).await;
                return;
            }
        }

        let record = match self.backend.set_status(id, JobStatus::Running).await {
            Ok(updated) => {
                self.notify(&updated.stats).await;
                updated
            }
            Err(err) => {
                // Lost a race against a cancel; nothing to run.
                debug!(%id, %err, "Skipping job that left the runnable states");
                self.release_lease(id).await;
                return;
            }
        };

        let Some(job) = self.registry.get(&record.stats.name) else {
            self.fail_running(record, "no implementation registered for this job name")
                .await;
            self.release_lease(id).await;
            return;
        };

        let probe: Arc<dyn OpCommandProbe> = Arc::new(BackendProbe {
            backend: Arc::clone(&self.backend),
            id,
        });
        let reporter: Arc<dyn CheckinReporter> = Arc::new(BackendCheckin {
            backend: Arc::clone(&self.backend),
            id,
        });

        let ctx = match self.template.build(id, Some(probe), Some(reporter)) {
            Ok(ctx) => ctx,
            Err(err) => {
                self.fail_running(record, &err.message).await;
                self.release_lease(id).await;
                return;
            }
        };

        info!(%id, name = %record.stats.name, "Job execution started");
        let outcome = job.run(&ctx, record.parameters.clone()).await;

        match outcome {
            Ok(()) => {
                info!(%id, "Job finished successfully");
                self.finish(id, JobStatus::Success).await;
            }
            Err(JobError::Stopped) => {
                info!(%id, "Job observed the stop command");
                self.finish(id, JobStatus::Stopped).await;
            }
            Err(JobError::Cancelled) => {
                info!(%id, "Job observed the cancel command");
                self.finish(id, JobStatus::Cancelled).await;
            }
            Err(JobError::Failed(err)) => {
                self.fail_running(record, &err.message).await;
            }
        }

        self.release_lease(id).await;
    }

    /// Move a job to a terminal state and clean up its backend residue.
    async fn finish(&self, id: Uuid, status: JobStatus) {
        match self.backend.set_status(id, status).await {
            Ok(updated) => {
                self.notify(&updated.stats).await;
                self.cleanup_terminal(&updated).await;
            }
            Err(err) => {
                warn!(%id, %status, %err, "Failed to record terminal status");
            }
        }
    }

    /// Failure path of a running job: count the failure, then either
    /// re-schedule with exponential backoff or move the job to `dead`.
    async fn fail_running(&self, record: JobRecord, reason: &str) {
        let id = record.stats.id;
        let (max_fails, should_retry) = self
            .registry
            .get(&record.stats.name)
            .map(|job| (JobRecord::effective_max_fails(job.max_fails()), job.should_retry()))
            .unwrap_or((0, false));

        let mut updated = match self.backend.set_status(id, JobStatus::Error).await {
            Ok(updated) => {
                self.notify(&updated.stats).await;
                updated
            }
            Err(err) => {
                warn!(%id, %err, "Failed to record job failure");
                return;
            }
        };

        updated.fails += 1;
        if let Err(err) = self.backend.save(&updated).await {
            warn!(%id, %err, "Failed to persist fail counter");
        }

        warn!(%id, fails = updated.fails, %reason, "Job execution failed");

        if should_retry && updated.fails < max_fails {
            let delay = self.retry_delay(updated.fails);
            match self.backend.set_status(id, JobStatus::Scheduled).await {
                Ok(mut scheduled) => {
                    self.notify(&scheduled.stats).await;
                    scheduled.stats.run_at = Some(
                        Utc::now()
                            + chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::seconds(2)),
                    );
                    if let Err(err) = self.backend.schedule(&scheduled).await {
                        warn!(%id, %err, "Failed to re-schedule failed job");
                    } else {
                        debug!(%id, ?delay, "Failed job re-scheduled");
                    }
                }
                Err(err) => warn!(%id, %err, "Failed to move job back to scheduled"),
            }
        } else {
            match self.backend.set_status(id, JobStatus::Dead).await {
                Ok(dead) => {
                    self.notify(&dead.stats).await;
                    let die_at = dead.stats.die_at.unwrap_or_else(Utc::now);
                    if let Err(err) = self.backend.push_dead(id, die_at).await {
                        warn!(%id, %err, "Failed to record job in the dead set");
                    }
                    self.cleanup_terminal(&dead).await;
                }
                Err(err) => warn!(%id, %err, "Failed to mark job dead"),
            }
        }
    }

    /// Exponential backoff with jitter: base * 2^(fails-1), capped.
    fn retry_delay(&self, fails: u32) -> Duration {
        let base = self.options.backoff_base.as_millis() as u64;
        let cap = self.options.backoff_cap.as_millis() as u64;
        let shift = fails.saturating_sub(1).min(10);
        let exp = base.saturating_mul(1u64 << shift).min(cap);
        let jitter = rand::thread_rng().gen_range(0..=(base / 2));
        Duration::from_millis(exp + jitter)
    }

    async fn cleanup_terminal(&self, record: &JobRecord) {
        if let Err(err) = self.backend.clear_command(record.stats.id).await {
            debug!(id = %record.stats.id, %err, "Failed to clear op-command");
        }
        if record.stats.unique {
            let digest = unique_digest(&record.stats.name, &record.parameters);
            if let Err(err) = self.backend.release_unique_lock(&digest).await {
                warn!(id = %record.stats.id, %err, "Failed to release uniqueness lock");
            }
        }
    }

    async fn release_lease(&self, id: Uuid) {
        if let Err(err) = self.backend.release(&self.pool_id, id).await {
            debug!(%id, %err, "Failed to release job lease");
        }
    }

    /// Schedule one hook delivery for a status transition. Best-effort.
    async fn notify(&self, stats: &JobStats) {
        match self.backend.read_hook(stats.id).await {
            Ok(Some(url)) => self.hooks.dispatch(url, HookEvent::from_stats(stats)),
            Ok(None) => {}
            Err(err) => debug!(id = %stats.id, %err, "Failed to read status hook"),
        }
    }

    // ── background loops ────────────────────────────────────────

    async fn run_promoter(self: Arc<Self>) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = time::sleep(self.options.promote_interval) => {
                    if let Err(err) = self.backend.promote_scheduled(Utc::now()).await {
                        warn!(%err, "Failed to promote scheduled jobs");
                    }
                }
            }
        }
    }

    async fn run_cron_firer(self: Arc<Self>) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = time::sleep(self.options.cron_interval) => {
                    if let Err(err) = self.fire_periodic().await {
                        warn!(%err, "Periodic firing pass failed");
                    }
                }
            }
        }
    }

    /// Enqueue one concrete job per due firing of each periodic template.
    async fn fire_periodic(&self) -> AppResult<()> {
        let templates = self.backend.periodic_templates().await?;
        if templates.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let lookback = chrono::Duration::from_std(self.options.cron_interval * 2)
            .unwrap_or_else(|_| chrono::Duration::seconds(2));
        let window_start = now - lookback;

        for template in templates {
            let Some(spec) = template.stats.cron_spec.as_deref() else {
                continue;
            };
            let schedule = match Schedule::from_str(spec) {
                Ok(schedule) => schedule,
                Err(err) => {
                    warn!(id = %template.stats.id, %err, "Periodic template has an invalid cron spec");
                    continue;
                }
            };

            for fire_at in schedule.after(&window_start).take_while(|t| *t <= now) {
                // The fired marker arbitrates between pools: exactly one
                // node enqueues each (template, fire time) slot.
                if !self
                    .backend
                    .mark_periodic_fired(template.stats.id, fire_at, FIRED_MARKER_TTL)
                    .await?
                {
                    continue;
                }

                let firing = JobRecord::periodic_firing(&template, fire_at);
                self.backend.enqueue(&firing).await?;
                debug!(
                    template = %template.stats.id,
                    firing = %firing.stats.id,
                    %fire_at,
                    "Periodic firing enqueued"
                );
            }
        }

        Ok(())
    }

    async fn run_reaper(self: Arc<Self>) {
        let mut shutdown = self.shutdown.clone();
        let tick = (self.options.lease_expiry / 2).max(Duration::from_secs(1));
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = time::sleep(tick) => {
                    match self.backend.reap_expired_pools(self.options.lease_expiry).await {
                        Ok(orphans) => {
                            for orphan in orphans {
                                self.handle_orphan(orphan).await;
                            }
                        }
                        Err(err) => warn!(%err, "Lease reaping pass failed"),
                    }
                }
            }
        }
    }

    /// A job whose worker died mid-lease: count the interrupted run as a
    /// failure, or put a never-started job back on its queue.
    async fn handle_orphan(&self, record: JobRecord) {
        match record.stats.status {
            JobStatus::Running => {
                warn!(id = %record.stats.id, "Reaping job from an expired worker lease");
                self.fail_running(record, "worker lease expired").await;
            }
            JobStatus::Pending | JobStatus::Scheduled => {
                if let Err(err) = self.backend.enqueue(&record).await {
                    warn!(id = %record.stats.id, %err, "Failed to requeue orphaned job");
                }
            }
            _ => {}
        }
    }

    async fn run_heartbeat(self: Arc<Self>) {
        let mut shutdown = self.shutdown.clone();
        self.emit_heartbeat().await;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = time::sleep(self.options.heartbeat_interval) => {
                    self.emit_heartbeat().await;
                }
            }
        }
    }

    async fn emit_heartbeat(&self) {
        let stats = WorkerPoolStats {
            pool_id: self.pool_id.clone(),
            started_at: self.started_at,
            heartbeat_at: Utc::now(),
            concurrency: self.options.workers,
            job_names: self.registry.names(),
        };
        if let Err(err) = self.backend.heartbeat(&stats).await {
            warn!(%err, "Failed to refresh pool heartbeat");
        }
    }

    /// Acquire the uniqueness lock for a unique record, or fail with a
    /// conflict while an equal submission is non-terminal.
    async fn claim_unique(&self, record: &JobRecord) -> AppResult<Option<String>> {
        if !record.stats.unique {
            return Ok(None);
        }

        let digest = unique_digest(&record.stats.name, &record.parameters);
        if !self
            .backend
            .acquire_unique_lock(&digest, record.stats.id)
            .await?
        {
            return Err(AppError::conflict(format!(
                "job '{}' with the same parameters already exists",
                record.stats.name
            )));
        }
        Ok(Some(digest))
    }

    /// Address a stop/cancel command to a job. A job that has not been
    /// picked up yet is removed from its queue and retired immediately;
    /// a running job observes the command cooperatively.
    async fn issue_command(&self, id: Uuid, command: OpCommand) -> AppResult<()> {
        let record = self
            .backend
            .read(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("job {id} not found")))?;

        if record.stats.kind == JobKind::Periodic {
            return Err(AppError::conflict(
                "periodic templates accept no control commands",
            ));
        }
        if record.stats.status.is_terminal() {
            return Err(AppError::conflict(format!(
                "job {id} is already in terminal status '{}'",
                record.stats.status
            )));
        }

        self.backend.write_command(id, command).await?;

        // Before pickup the command applies immediately; queue removal is
        // the arbiter when a worker races us.
        if record.stats.status != JobStatus::Running
            && self.backend.remove_from_queue(&record).await?
        {
            match self.backend.set_status(id, terminal_for(command)).await {
                Ok(updated) => {
                    self.notify(&updated.stats).await;
                    self.cleanup_terminal(&updated).await;
                }
                Err(err) => warn!(%id, %command, %err, "Failed to finalize pre-pickup command"),
            }
        }

        Ok(())
    }

    async fn submit(&self, record: JobRecord) -> AppResult<JobStats> {
        let digest = self.claim_unique(&record).await?;

        let persisted = match record.stats.status {
            JobStatus::Scheduled => self.backend.schedule(&record).await,
            _ => self.backend.enqueue(&record).await,
        };

        if let Err(err) = persisted {
            if let Some(digest) = digest {
                let _ = self.backend.release_unique_lock(&digest).await;
            }
            return Err(err);
        }

        Ok(record.stats)
    }
}

#[async_trait]
impl Pool for WorkerPool {
    async fn enqueue(
        &self,
        name: &str,
        parameters: JobParameters,
        unique: bool,
    ) -> AppResult<JobStats> {
        self.submit(JobRecord::generic(name, parameters, unique)).await
    }

    async fn schedule(
        &self,
        name: &str,
        parameters: JobParameters,
        delay_seconds: u64,
        unique: bool,
    ) -> AppResult<JobStats> {
        let run_at = Utc::now() + chrono::Duration::seconds(delay_seconds as i64);
        self.submit(JobRecord::scheduled(name, parameters, unique, run_at))
            .await
    }

    async fn periodically_enqueue(
        &self,
        name: &str,
        parameters: JobParameters,
        cron_spec: &str,
    ) -> AppResult<JobStats> {
        let template = JobRecord::periodic_template(name, parameters, cron_spec);
        self.backend.register_periodic(&template).await?;
        info!(id = %template.stats.id, %name, %cron_spec, "Periodic template registered");
        Ok(template.stats)
    }

    async fn get_job_stats(&self, id: Uuid) -> AppResult<JobStats> {
        let record = self
            .backend
            .read(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("job {id} not found")))?;
        Ok(record.stats)
    }

    async fn stop_job(&self, id: Uuid) -> AppResult<()> {
        self.issue_command(id, OpCommand::Stop).await
    }

    async fn cancel_job(&self, id: Uuid) -> AppResult<()> {
        self.issue_command(id, OpCommand::Cancel).await
    }

    async fn retry_job(&self, id: Uuid) -> AppResult<()> {
        let record = self
            .backend
            .read(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("job {id} not found")))?;

        if record.stats.status != JobStatus::Error {
            return Err(AppError::not_retriable(format!(
                "job {id} in status '{}' cannot be retried",
                record.stats.status
            )));
        }

        let mut scheduled = self.backend.set_status(id, JobStatus::Scheduled).await?;
        self.notify(&scheduled.stats).await;
        scheduled.stats.run_at = Some(Utc::now());
        self.backend.schedule(&scheduled).await
    }

    async fn register_hook(&self, id: Uuid, url: &str) -> AppResult<()> {
        self.backend.save_hook(id, url).await
    }

    fn is_known_job(&self, name: &str) -> bool {
        self.registry.is_known(name)
    }

    fn validate_job_parameters(&self, name: &str, parameters: &JobParameters) -> AppResult<()> {
        self.registry.validate(name, parameters)
    }

    async fn stats(&self) -> AppResult<Vec<WorkerPoolStats>> {
        self.backend.pool_stats().await
    }
}

/// The terminal status an op-command retires a job to.
fn terminal_for(command: OpCommand) -> JobStatus {
    match command {
        OpCommand::Stop => JobStatus::Stopped,
        OpCommand::Cancel => JobStatus::Cancelled,
    }
}

/// Op-command probe reading through the backend.
struct BackendProbe {
    backend: Arc<dyn QueueBackend>,
    id: Uuid,
}

#[async_trait]
impl OpCommandProbe for BackendProbe {
    async fn pending_command(&self) -> Option<OpCommand> {
        match self.backend.read_command(self.id).await {
            Ok(command) => command,
            Err(err) => {
                debug!(id = %self.id, %err, "Failed to read op-command");
                None
            }
        }
    }
}

/// Check-in reporter writing through the backend.
struct BackendCheckin {
    backend: Arc<dyn QueueBackend>,
    id: Uuid,
}

#[async_trait]
impl CheckinReporter for BackendCheckin {
    async fn checkin(&self, message: &str) {
        if let Err(err) = self.backend.record_check_in(self.id, message).await {
            debug!(id = %self.id, %err, "Check-in dropped");
        }
    }
}
