//! In-memory queue backend.
//!
//! A mutex-guarded twin of the Redis driver with the same observable
//! semantics. Used by unit and integration tests; production deployments
//! configure the Redis backend.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use jobhub_core::error::AppError;
use jobhub_core::models::{JobRecord, JobStatus, OpCommand, WorkerPoolStats};
use jobhub_core::result::AppResult;
use jobhub_core::traits::QueueBackend;

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<Uuid, JobRecord>,
    queues: HashMap<String, VecDeque<Uuid>>,
    scheduled: BTreeSet<(i64, Uuid)>,
    dead: BTreeSet<(i64, Uuid)>,
    periodic: HashMap<Uuid, JobRecord>,
    fired: HashSet<String>,
    unique: HashMap<String, Uuid>,
    hooks: HashMap<Uuid, String>,
    commands: HashMap<Uuid, OpCommand>,
    pools: HashMap<String, WorkerPoolStats>,
    inflight: HashMap<String, HashSet<Uuid>>,
}

/// In-process queue backend.
#[derive(Debug, Default)]
pub struct MemoryQueueBackend {
    state: Mutex<State>,
}

impl MemoryQueueBackend {
    /// Create an empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AppError::backend("memory backend mutex poisoned"))
    }

    /// Number of entries currently parked in the scheduled set.
    pub fn scheduled_len(&self) -> usize {
        self.state.lock().map(|s| s.scheduled.len()).unwrap_or(0)
    }

    /// Number of entries in the dead-letter set.
    pub fn dead_len(&self) -> usize {
        self.state.lock().map(|s| s.dead.len()).unwrap_or(0)
    }

    /// Ids of every persisted job record.
    pub fn job_ids(&self) -> Vec<Uuid> {
        self.state
            .lock()
            .map(|s| s.jobs.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueueBackend for MemoryQueueBackend {
    async fn enqueue(&self, record: &JobRecord) -> AppResult<()> {
        let mut state = self.lock()?;
        state.jobs.insert(record.stats.id, record.clone());
        state
            .queues
            .entry(record.stats.name.clone())
            .or_default()
            .push_back(record.stats.id);
        Ok(())
    }

    async fn schedule(&self, record: &JobRecord) -> AppResult<()> {
        let run_at = record.stats.run_at.ok_or_else(|| {
            AppError::internal("scheduled job record is missing its run_at time")
        })?;

        let mut state = self.lock()?;
        state.jobs.insert(record.stats.id, record.clone());
        state.scheduled.insert((run_at.timestamp(), record.stats.id));
        Ok(())
    }

    async fn register_periodic(&self, record: &JobRecord) -> AppResult<()> {
        let mut state = self.lock()?;
        state.jobs.insert(record.stats.id, record.clone());
        state.periodic.insert(record.stats.id, record.clone());
        Ok(())
    }

    async fn periodic_templates(&self) -> AppResult<Vec<JobRecord>> {
        let state = self.lock()?;
        Ok(state.periodic.values().cloned().collect())
    }

    async fn mark_periodic_fired(
        &self,
        template_id: Uuid,
        fire_at: DateTime<Utc>,
        _ttl: Duration,
    ) -> AppResult<bool> {
        let marker = format!("{template_id}:{}", fire_at.timestamp());
        let mut state = self.lock()?;
        Ok(state.fired.insert(marker))
    }

    async fn promote_scheduled(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut state = self.lock()?;

        let due: Vec<(i64, Uuid)> = state
            .scheduled
            .iter()
            .take_while(|(at, _)| *at <= now.timestamp())
            .copied()
            .collect();

        let mut promoted = 0u64;
        for entry in due {
            state.scheduled.remove(&entry);
            let Some(name) = state.jobs.get(&entry.1).map(|r| r.stats.name.clone()) else {
                continue;
            };
            state.queues.entry(name).or_default().push_back(entry.1);
            promoted += 1;
        }
        Ok(promoted)
    }

    async fn dequeue(&self, names: &[String], pool_id: &str) -> AppResult<Option<JobRecord>> {
        let mut state = self.lock()?;

        for name in names {
            let Some(id) = state.queues.get_mut(name).and_then(VecDeque::pop_front) else {
                continue;
            };

            let Some(record) = state.jobs.get(&id).cloned() else {
                continue;
            };
            state
                .inflight
                .entry(pool_id.to_string())
                .or_default()
                .insert(id);
            return Ok(Some(record));
        }

        Ok(None)
    }

    async fn release(&self, pool_id: &str, id: Uuid) -> AppResult<()> {
        let mut state = self.lock()?;
        if let Some(leases) = state.inflight.get_mut(pool_id) {
            leases.remove(&id);
        }
        Ok(())
    }

    async fn save(&self, record: &JobRecord) -> AppResult<()> {
        let mut state = self.lock()?;
        state.jobs.insert(record.stats.id, record.clone());
        Ok(())
    }

    async fn read(&self, id: Uuid) -> AppResult<Option<JobRecord>> {
        let state = self.lock()?;
        Ok(state.jobs.get(&id).cloned())
    }

    async fn set_status(&self, id: Uuid, status: JobStatus) -> AppResult<JobRecord> {
        let mut state = self.lock()?;
        let record = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("job {id} not found")))?;

        let current = record.stats.status;
        if current == status {
            return Ok(record.clone());
        }
        if !current.can_transition_to(status) {
            return Err(AppError::conflict(format!(
                "job {id} cannot move from '{current}' to '{status}'"
            )));
        }

        record.stats.status = status;
        record.stats.update_time = Utc::now();
        if status == JobStatus::Dead {
            record.stats.die_at = Some(record.stats.update_time);
        }
        Ok(record.clone())
    }

    async fn record_check_in(&self, id: Uuid, message: &str) -> AppResult<()> {
        let mut state = self.lock()?;
        let record = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("job {id} not found")))?;

        let now = Utc::now();
        record.stats.check_in = Some(message.to_string());
        record.stats.check_in_at = Some(now);
        record.stats.update_time = now;
        Ok(())
    }

    async fn acquire_unique_lock(&self, digest: &str, id: Uuid) -> AppResult<bool> {
        let mut state = self.lock()?;
        if state.unique.contains_key(digest) {
            return Ok(false);
        }
        state.unique.insert(digest.to_string(), id);
        Ok(true)
    }

    async fn release_unique_lock(&self, digest: &str) -> AppResult<()> {
        let mut state = self.lock()?;
        state.unique.remove(digest);
        Ok(())
    }

    async fn save_hook(&self, id: Uuid, url: &str) -> AppResult<()> {
        let mut state = self.lock()?;
        state.hooks.insert(id, url.to_string());
        Ok(())
    }

    async fn read_hook(&self, id: Uuid) -> AppResult<Option<String>> {
        let state = self.lock()?;
        Ok(state.hooks.get(&id).cloned())
    }

    async fn write_command(&self, id: Uuid, command: OpCommand) -> AppResult<()> {
        let mut state = self.lock()?;
        state.commands.insert(id, command);
        Ok(())
    }

    async fn read_command(&self, id: Uuid) -> AppResult<Option<OpCommand>> {
        let state = self.lock()?;
        Ok(state.commands.get(&id).copied())
    }

    async fn clear_command(&self, id: Uuid) -> AppResult<()> {
        let mut state = self.lock()?;
        state.commands.remove(&id);
        Ok(())
    }

    async fn remove_from_queue(&self, record: &JobRecord) -> AppResult<bool> {
        let mut state = self.lock()?;
        let id = record.stats.id;

        let removed = match record.stats.status {
            JobStatus::Pending => state
                .queues
                .get_mut(&record.stats.name)
                .map(|queue| {
                    let before = queue.len();
                    queue.retain(|entry| *entry != id);
                    queue.len() < before
                })
                .unwrap_or(false),
            JobStatus::Scheduled => {
                let entry = record
                    .stats
                    .run_at
                    .map(|at| (at.timestamp(), id))
                    .filter(|entry| state.scheduled.remove(entry));
                entry.is_some()
            }
            _ => false,
        };

        Ok(removed)
    }

    async fn push_dead(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        let mut state = self.lock()?;
        state.dead.insert((at.timestamp(), id));
        Ok(())
    }

    async fn heartbeat(&self, stats: &WorkerPoolStats) -> AppResult<()> {
        let mut state = self.lock()?;
        state.pools.insert(stats.pool_id.clone(), stats.clone());
        Ok(())
    }

    async fn pool_stats(&self) -> AppResult<Vec<WorkerPoolStats>> {
        let state = self.lock()?;
        Ok(state.pools.values().cloned().collect())
    }

    async fn reap_expired_pools(&self, expiry: Duration) -> AppResult<Vec<JobRecord>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(expiry)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let mut state = self.lock()?;
        let expired: Vec<String> = state
            .pools
            .values()
            .filter(|pool| pool.heartbeat_at < cutoff)
            .map(|pool| pool.pool_id.clone())
            .collect();

        let mut orphans = Vec::new();
        for pool_id in expired {
            state.pools.remove(&pool_id);
            let leased = state.inflight.remove(&pool_id).unwrap_or_default();
            for id in leased {
                if let Some(record) = state.jobs.get(&id) {
                    orphans.push(record.clone());
                }
            }
        }
        Ok(orphans)
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }
}
