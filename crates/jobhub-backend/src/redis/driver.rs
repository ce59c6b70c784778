//! Redis implementation of the queue backend.
//!
//! Ready queues are lists (RPUSH/LPOP), the scheduled and dead sets are
//! sorted sets scored by epoch seconds, uniqueness locks and periodic
//! firing markers use SET NX, and job records persist as JSON strings.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use tracing::debug;
use uuid::Uuid;

use jobhub_core::error::{AppError, ErrorKind};
use jobhub_core::models::{JobRecord, JobStatus, OpCommand, WorkerPoolStats};
use jobhub_core::result::AppResult;
use jobhub_core::traits::QueueBackend;

use crate::keys;
use super::client::RedisClient;

/// Redis-backed queue driver.
#[derive(Debug, Clone)]
pub struct RedisQueueBackend {
    /// Redis client.
    client: RedisClient,
}

impl RedisQueueBackend {
    /// Create a new Redis queue backend.
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    fn ns(&self) -> &str {
        self.client.namespace()
    }

    /// Map a Redis error to an AppError.
    fn map_err(e: redis::RedisError) -> AppError {
        AppError::with_source(ErrorKind::Backend, format!("Redis error: {e}"), e)
    }

    async fn write_record(&self, record: &JobRecord) -> AppResult<()> {
        let key = keys::job(self.ns(), record.stats.id);
        let json = serde_json::to_string(record)?;
        let mut conn = self.client.conn_mut();
        let _: () = conn.set(&key, json).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn read_record(&self, id: Uuid) -> AppResult<Option<JobRecord>> {
        let key = keys::job(self.ns(), id);
        let mut conn = self.client.conn_mut();
        let json: Option<String> = conn.get(&key).await.map_err(Self::map_err)?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn enqueue(&self, record: &JobRecord) -> AppResult<()> {
        self.write_record(record).await?;

        let queue = keys::ready_queue(self.ns(), &record.stats.name);
        let mut conn = self.client.conn_mut();
        let _: () = conn
            .rpush(&queue, record.stats.id.to_string())
            .await
            .map_err(Self::map_err)?;

        debug!(id = %record.stats.id, name = %record.stats.name, "Enqueued job");
        Ok(())
    }

    async fn schedule(&self, record: &JobRecord) -> AppResult<()> {
        let run_at = record.stats.run_at.ok_or_else(|| {
            AppError::internal("scheduled job record is missing its run_at time")
        })?;

        self.write_record(record).await?;

        let key = keys::scheduled(self.ns());
        let mut conn = self.client.conn_mut();
        let _: () = conn
            .zadd(&key, record.stats.id.to_string(), run_at.timestamp())
            .await
            .map_err(Self::map_err)?;

        debug!(id = %record.stats.id, %run_at, "Scheduled job");
        Ok(())
    }

    async fn register_periodic(&self, record: &JobRecord) -> AppResult<()> {
        self.write_record(record).await?;

        let key = keys::periodic(self.ns());
        let json = serde_json::to_string(record)?;
        let mut conn = self.client.conn_mut();
        let _: () = conn
            .hset(&key, record.stats.id.to_string(), json)
            .await
            .map_err(Self::map_err)?;

        debug!(id = %record.stats.id, "Registered periodic template");
        Ok(())
    }

    async fn periodic_templates(&self) -> AppResult<Vec<JobRecord>> {
        let key = keys::periodic(self.ns());
        let mut conn = self.client.conn_mut();
        let entries: Vec<String> = conn.hvals(&key).await.map_err(Self::map_err)?;

        let mut templates = Vec::with_capacity(entries.len());
        for json in entries {
            templates.push(serde_json::from_str(&json)?);
        }
        Ok(templates)
    }

    async fn mark_periodic_fired(
        &self,
        template_id: Uuid,
        fire_at: DateTime<Utc>,
        ttl: Duration,
    ) -> AppResult<bool> {
        let key = keys::periodic_fired(self.ns(), template_id, fire_at);
        let mut conn = self.client.conn_mut();

        // SET key 1 EX ttl NX
        let claimed: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg("1")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        Ok(claimed.is_some())
    }

    async fn promote_scheduled(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let key = keys::scheduled(self.ns());
        let mut conn = self.client.conn_mut();

        let due: Vec<String> = conn
            .zrangebyscore(&key, "-inf", now.timestamp())
            .await
            .map_err(Self::map_err)?;

        let mut promoted = 0u64;
        for raw in due {
            // ZREM is the arbiter between pools: only the remover promotes.
            let removed: i64 = conn.zrem(&key, &raw).await.map_err(Self::map_err)?;
            if removed == 0 {
                continue;
            }

            let Ok(id) = raw.parse::<Uuid>() else {
                continue;
            };
            let Some(record) = self.read_record(id).await? else {
                continue;
            };

            let queue = keys::ready_queue(self.ns(), &record.stats.name);
            let _: () = conn.rpush(&queue, &raw).await.map_err(Self::map_err)?;
            promoted += 1;
        }

        if promoted > 0 {
            debug!(promoted, "Promoted due scheduled jobs");
        }
        Ok(promoted)
    }

    async fn dequeue(&self, names: &[String], pool_id: &str) -> AppResult<Option<JobRecord>> {
        let mut conn = self.client.conn_mut();

        for name in names {
            let queue = keys::ready_queue(self.ns(), name);
            let raw: Option<String> = conn.lpop(&queue, None).await.map_err(Self::map_err)?;

            let Some(raw) = raw else {
                continue;
            };
            let Ok(id) = raw.parse::<Uuid>() else {
                continue;
            };

            let inflight = keys::inflight(self.ns(), pool_id);
            let _: () = conn.sadd(&inflight, &raw).await.map_err(Self::map_err)?;

            match self.read_record(id).await? {
                Some(record) => return Ok(Some(record)),
                None => {
                    // Record vanished; drop the stray lease and keep looking.
                    let _: () = conn.srem(&inflight, &raw).await.map_err(Self::map_err)?;
                }
            }
        }

        Ok(None)
    }

    async fn release(&self, pool_id: &str, id: Uuid) -> AppResult<()> {
        let inflight = keys::inflight(self.ns(), pool_id);
        let mut conn = self.client.conn_mut();
        let _: () = conn
            .srem(&inflight, id.to_string())
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn save(&self, record: &JobRecord) -> AppResult<()> {
        self.write_record(record).await
    }

    async fn read(&self, id: Uuid) -> AppResult<Option<JobRecord>> {
        self.read_record(id).await
    }

    async fn set_status(&self, id: Uuid, status: JobStatus) -> AppResult<JobRecord> {
        let mut record = self
            .read_record(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("job {id} not found")))?;

        let current = record.stats.status;
        if current == status {
            return Ok(record);
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

        self.write_record(&record).await?;
        debug!(%id, from = %current, to = %status, "Job status transition");
        Ok(record)
    }

    async fn record_check_in(&self, id: Uuid, message: &str) -> AppResult<()> {
        let mut record = self
            .read_record(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("job {id} not found")))?;

        record.stats.check_in = Some(message.to_string());
        record.stats.check_in_at = Some(Utc::now());
        record.stats.update_time = record.stats.check_in_at.unwrap_or_else(Utc::now);

        self.write_record(&record).await
    }

    async fn acquire_unique_lock(&self, digest: &str, id: Uuid) -> AppResult<bool> {
        let key = keys::unique_lock(self.ns(), digest);
        let mut conn = self.client.conn_mut();

        // SET key id NX — the lock lives until the job turns terminal.
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(id.to_string())
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        Ok(acquired.is_some())
    }

    async fn release_unique_lock(&self, digest: &str) -> AppResult<()> {
        let key = keys::unique_lock(self.ns(), digest);
        let mut conn = self.client.conn_mut();
        let _: () = conn.del(&key).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn save_hook(&self, id: Uuid, url: &str) -> AppResult<()> {
        let key = keys::hook(self.ns(), id);
        let mut conn = self.client.conn_mut();
        let _: () = conn.set(&key, url).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn read_hook(&self, id: Uuid) -> AppResult<Option<String>> {
        let key = keys::hook(self.ns(), id);
        let mut conn = self.client.conn_mut();
        let url: Option<String> = conn.get(&key).await.map_err(Self::map_err)?;
        Ok(url)
    }

    async fn write_command(&self, id: Uuid, command: OpCommand) -> AppResult<()> {
        let key = keys::command(self.ns(), id);
        let mut conn = self.client.conn_mut();
        let _: () = conn.set(&key, command.as_str()).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn read_command(&self, id: Uuid) -> AppResult<Option<OpCommand>> {
        let key = keys::command(self.ns(), id);
        let mut conn = self.client.conn_mut();
        let raw: Option<String> = conn.get(&key).await.map_err(Self::map_err)?;

        Ok(raw.and_then(|raw| match raw.as_str() {
            "stop" => Some(OpCommand::Stop),
            "cancel" => Some(OpCommand::Cancel),
            _ => None,
        }))
    }

    async fn clear_command(&self, id: Uuid) -> AppResult<()> {
        let key = keys::command(self.ns(), id);
        let mut conn = self.client.conn_mut();
        let _: () = conn.del(&key).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn remove_from_queue(&self, record: &JobRecord) -> AppResult<bool> {
        let mut conn = self.client.conn_mut();
        let raw = record.stats.id.to_string();

        let removed = match record.stats.status {
            JobStatus::Pending => {
                let queue = keys::ready_queue(self.ns(), &record.stats.name);
                let n: i64 = conn.lrem(&queue, 1, &raw).await.map_err(Self::map_err)?;
                n > 0
            }
            JobStatus::Scheduled => {
                let key = keys::scheduled(self.ns());
                let n: i64 = conn.zrem(&key, &raw).await.map_err(Self::map_err)?;
                n > 0
            }
            _ => false,
        };

        Ok(removed)
    }

    async fn push_dead(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        let key = keys::dead(self.ns());
        let mut conn = self.client.conn_mut();
        let _: () = conn
            .zadd(&key, id.to_string(), at.timestamp())
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn heartbeat(&self, stats: &WorkerPoolStats) -> AppResult<()> {
        let key = keys::pools(self.ns());
        let json = serde_json::to_string(stats)?;
        let mut conn = self.client.conn_mut();
        let _: () = conn
            .hset(&key, &stats.pool_id, json)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn pool_stats(&self) -> AppResult<Vec<WorkerPoolStats>> {
        let key = keys::pools(self.ns());
        let mut conn = self.client.conn_mut();
        let entries: Vec<String> = conn.hvals(&key).await.map_err(Self::map_err)?;

        let mut pools = Vec::with_capacity(entries.len());
        for json in entries {
            pools.push(serde_json::from_str(&json)?);
        }
        Ok(pools)
    }

    async fn reap_expired_pools(&self, expiry: Duration) -> AppResult<Vec<JobRecord>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(expiry)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let mut orphans = Vec::new();
        let pools_key = keys::pools(self.ns());
        let mut conn = self.client.conn_mut();

        for pool in self.pool_stats().await? {
            if pool.heartbeat_at >= cutoff {
                continue;
            }

            let inflight_key = keys::inflight(self.ns(), &pool.pool_id);
            let leased: Vec<String> = conn
                .smembers(&inflight_key)
                .await
                .map_err(Self::map_err)?;

            for raw in leased {
                // SREM arbitrates between reapers on different nodes.
                let removed: i64 = conn
                    .srem(&inflight_key, &raw)
                    .await
                    .map_err(Self::map_err)?;
                if removed == 0 {
                    continue;
                }
                if let Ok(id) = raw.parse::<Uuid>() {
                    if let Some(record) = self.read_record(id).await? {
                        orphans.push(record);
                    }
                }
            }

            let _: () = conn
                .hdel(&pools_key, &pool.pool_id)
                .await
                .map_err(Self::map_err)?;
            let _: () = conn.del(&inflight_key).await.map_err(Self::map_err)?;
            debug!(pool_id = %pool.pool_id, "Reaped expired worker pool");
        }

        Ok(orphans)
    }

    async fn health_check(&self) -> AppResult<bool> {
        let mut conn = self.client.conn_mut();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(pong == "PONG")
    }
}
