//! Key builders for all persisted queue-backend state.
//!
//! Centralising key construction prevents typos and makes it easy to find
//! every key the service uses. All keys carry the configured namespace so
//! multiple deployments can share one Redis.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Ready queue (list) for one job name.
pub fn ready_queue(ns: &str, name: &str) -> String {
    format!("{ns}:queue:{name}")
}

/// Scheduled jobs (sorted set scored by `run_at` epoch seconds).
pub fn scheduled(ns: &str) -> String {
    format!("{ns}:scheduled")
}

/// Dead-letter set (sorted set scored by death time).
pub fn dead(ns: &str) -> String {
    format!("{ns}:dead")
}

/// Jobs currently leased by one pool (set of job ids).
pub fn inflight(ns: &str, pool_id: &str) -> String {
    format!("{ns}:inflight:{pool_id}")
}

/// Pool heartbeat records (hash pool_id -> json).
pub fn pools(ns: &str) -> String {
    format!("{ns}:pools")
}

/// Periodic templates (hash template id -> json).
pub fn periodic(ns: &str) -> String {
    format!("{ns}:periodic")
}

/// One-shot marker claiming a periodic firing slot across pools.
pub fn periodic_fired(ns: &str, template_id: Uuid, fire_at: DateTime<Utc>) -> String {
    format!("{ns}:periodic:fired:{template_id}:{}", fire_at.timestamp())
}

/// Uniqueness lock for a `(name, parameters)` digest.
pub fn unique_lock(ns: &str, digest: &str) -> String {
    format!("{ns}:unique:{digest}")
}

/// Persisted job record.
pub fn job(ns: &str, id: Uuid) -> String {
    format!("{ns}:job:{id}")
}

/// Status-hook URL of a job.
pub fn hook(ns: &str, id: Uuid) -> String {
    format!("{ns}:hook:{id}")
}

/// Pending op-command of a job.
pub fn command(ns: &str, id: Uuid) -> String {
    format!("{ns}:cmd:{id}")
}
