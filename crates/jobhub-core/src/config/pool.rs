//! Worker pool configuration.

use serde::{Deserialize, Serialize};

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of concurrent worker slots.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Queue backend. Only `"redis"` is supported.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Redis settings, required when `backend` is `"redis"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_pool: Option<RedisPoolConfig>,
}

/// Redis connection settings for the queue backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RedisPoolConfig {
    /// Redis URL, normalised to the `redis://` scheme on load.
    #[serde(default)]
    pub redis_url: String,
    /// Key namespace shared by all pools on the same backend.
    #[serde(default)]
    pub namespace: String,
}

fn default_workers() -> usize {
    10
}

fn default_backend() -> String {
    super::BACKEND_REDIS.to_string()
}
