//! Queue backend drivers for jobhub.
//!
//! This crate provides:
//! - Namespaced key builders for every persisted bucket
//! - A Redis driver implementing [`QueueBackend`]
//! - An in-memory driver with identical observable semantics, for tests

pub mod keys;
pub mod memory;
pub mod redis;

use std::sync::Arc;

use tracing::info;

use jobhub_core::config::{BACKEND_REDIS, PoolConfig};
use jobhub_core::error::AppError;
use jobhub_core::result::AppResult;
use jobhub_core::traits::QueueBackend;

/// Connect the queue backend selected by configuration.
pub async fn connect(config: &PoolConfig) -> AppResult<Arc<dyn QueueBackend>> {
    match config.backend.as_str() {
        BACKEND_REDIS => {
            let redis_cfg = config.redis_pool.as_ref().ok_or_else(|| {
                AppError::configuration("redis pool must be configured when backend is 'redis'")
            })?;

            info!("Initializing Redis queue backend");
            let client = redis::RedisClient::connect(redis_cfg).await?;
            Ok(Arc::new(redis::RedisQueueBackend::new(client)))
        }
        other => Err(AppError::configuration(format!(
            "Unknown queue backend: '{other}'. Supported: redis"
        ))),
    }
}
