//! Service configuration schemas.
//!
//! The configuration is loaded from a YAML file (the `-c <path>` flag),
//! then overridden field-by-field from environment variables, then
//! validated. Loading the same file and environment twice yields an
//! identical struct.

pub mod logger;
pub mod pool;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use self::logger::{LogLevel, LoggerConfig};
pub use self::pool::{PoolConfig, RedisPoolConfig};

use crate::error::AppError;
use crate::result::AppResult;

/// The `http` protocol.
pub const PROTOCOL_HTTP: &str = "http";
/// The `https` protocol.
pub const PROTOCOL_HTTPS: &str = "https";
/// The only supported worker-pool backend.
pub const BACKEND_REDIS: &str = "redis";

const ENV_PROTOCOL: &str = "JOB_SERVICE_PROTOCOL";
const ENV_PORT: &str = "JOB_SERVICE_PORT";
const ENV_HTTPS_CERT: &str = "JOB_SERVICE_HTTPS_CERT";
const ENV_HTTPS_KEY: &str = "JOB_SERVICE_HTTPS_KEY";
const ENV_POOL_WORKERS: &str = "JOB_SERVICE_POOL_WORKERS";
const ENV_POOL_BACKEND: &str = "JOB_SERVICE_POOL_BACKEND";
const ENV_POOL_REDIS_URL: &str = "JOB_SERVICE_POOL_REDIS_URL";
const ENV_POOL_REDIS_NAMESPACE: &str = "JOB_SERVICE_POOL_REDIS_NAMESPACE";
const ENV_LOGGER_BASE_PATH: &str = "JOB_SERVICE_LOGGER_BASE_PATH";
const ENV_LOGGER_LEVEL: &str = "JOB_SERVICE_LOGGER_LEVEL";
const ENV_LOGGER_ARCHIVE_PERIOD: &str = "JOB_SERVICE_LOGGER_ARCHIVE_PERIOD";
const ENV_AUTH_SECRET: &str = "CORE_SECRET";

const REDIS_SCHEME: &str = "redis://";

/// Root service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Protocol the server listens on: `"http"` or `"https"`.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Server listening port.
    #[serde(default = "default_port")]
    pub port: u32,
    /// Certificate settings, required when `protocol` is `"https"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_config: Option<HttpsConfig>,
    /// Worker pool settings.
    pub worker_pool: PoolConfig,
    /// Per-job logging settings.
    pub logger: LoggerConfig,
}

/// Certificate paths for https serving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HttpsConfig {
    /// Path to the PEM certificate file.
    #[serde(default)]
    pub cert: String,
    /// Path to the PEM private key file.
    #[serde(default)]
    pub key: String,
}

impl AppConfig {
    /// Load configuration from a YAML file, apply environment overrides,
    /// and validate the result.
    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to read config: {e}")))?;

        let mut cfg: AppConfig = raw
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        cfg.apply_env_overrides();
        cfg.normalize();
        cfg.validate()?;

        Ok(cfg)
    }

    /// Environment variables override file settings field-by-field.
    fn apply_env_overrides(&mut self) {
        if let Some(protocol) = read_env(ENV_PROTOCOL) {
            self.protocol = protocol;
        }

        if let Some(port) = read_env(ENV_PORT) {
            if let Ok(port) = port.parse::<u32>() {
                self.port = port;
            }
        }

        if self.protocol == PROTOCOL_HTTPS {
            if let Some(cert) = read_env(ENV_HTTPS_CERT) {
                self.https_config.get_or_insert_with(Default::default).cert = cert;
            }
            if let Some(key) = read_env(ENV_HTTPS_KEY) {
                self.https_config.get_or_insert_with(Default::default).key = key;
            }
        }

        if let Some(backend) = read_env(ENV_POOL_BACKEND) {
            self.worker_pool.backend = backend;
        }

        if let Some(workers) = read_env(ENV_POOL_WORKERS) {
            if let Ok(workers) = workers.parse::<usize>() {
                self.worker_pool.workers = workers;
            }
        }

        if self.worker_pool.backend == BACKEND_REDIS {
            if let Some(url) = read_env(ENV_POOL_REDIS_URL) {
                self.worker_pool
                    .redis_pool
                    .get_or_insert_with(Default::default)
                    .redis_url = url;
            }
            if let Some(namespace) = read_env(ENV_POOL_REDIS_NAMESPACE) {
                self.worker_pool
                    .redis_pool
                    .get_or_insert_with(Default::default)
                    .namespace = namespace;
            }
        }

        if let Some(path) = read_env(ENV_LOGGER_BASE_PATH) {
            self.logger.path = path;
        }
        if let Some(level) = read_env(ENV_LOGGER_LEVEL) {
            self.logger.level = level;
        }
        if let Some(period) = read_env(ENV_LOGGER_ARCHIVE_PERIOD) {
            if let Ok(period) = period.parse::<u32>() {
                self.logger.archive_period = period;
            }
        }
    }

    /// Normalise a bare `host:port` redis address to a `redis://` URL.
    fn normalize(&mut self) {
        if let Some(redis) = self.worker_pool.redis_pool.as_mut() {
            if !redis.redis_url.is_empty() && !redis.redis_url.starts_with(REDIS_SCHEME) {
                redis.redis_url = format!("{REDIS_SCHEME}{}", redis.redis_url);
            }
        }
    }

    /// Check that the configuration is a valid set of settings.
    pub fn validate(&self) -> AppResult<()> {
        if self.protocol != PROTOCOL_HTTP && self.protocol != PROTOCOL_HTTPS {
            return Err(AppError::configuration(format!(
                "protocol should be {PROTOCOL_HTTP} or {PROTOCOL_HTTPS}, but current setting is {}",
                self.protocol
            )));
        }

        if self.port == 0 || self.port > 65535 {
            return Err(AppError::configuration(format!(
                "port should be a non-zero integer less or equal 65535, but current is {}",
                self.port
            )));
        }

        if self.protocol == PROTOCOL_HTTPS {
            let https = self.https_config.as_ref().ok_or_else(|| {
                AppError::configuration("certificate must be configured for https")
            })?;
            if https.cert.is_empty()
                || !Path::new(&https.cert).is_file()
                || https.key.is_empty()
                || !Path::new(&https.key).is_file()
            {
                return Err(AppError::configuration(
                    "certificate for https is not correctly configured",
                ));
            }
        }

        if self.worker_pool.backend != BACKEND_REDIS {
            return Err(AppError::configuration(format!(
                "worker pool backend '{}' is not supported",
                self.worker_pool.backend
            )));
        }

        let redis = self.worker_pool.redis_pool.as_ref().ok_or_else(|| {
            AppError::configuration("redis pool must be configured when backend is 'redis'")
        })?;
        if redis.redis_url.is_empty() {
            return Err(AppError::configuration("URL of redis pool is empty"));
        }
        if !redis.redis_url.starts_with(REDIS_SCHEME) {
            return Err(AppError::configuration("invalid redis URL"));
        }
        if redis.namespace.is_empty() {
            return Err(AppError::configuration("namespace of redis pool is required"));
        }

        if !Path::new(&self.logger.path).is_dir() {
            return Err(AppError::configuration(format!(
                "logger path {} does not exist or is not a directory",
                self.logger.path
            )));
        }
        self.logger.level.parse::<LogLevel>()?;
        if self.logger.archive_period == 0 {
            return Err(AppError::configuration(
                "logger archive period should be greater than 0",
            ));
        }

        Ok(())
    }
}

/// The shared auth secret the HTTP edge compares against, from `CORE_SECRET`.
pub fn auth_secret() -> Option<String> {
    read_env(ENV_AUTH_SECRET)
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn default_protocol() -> String {
    PROTOCOL_HTTP.to_string()
}

fn default_port() -> u32 {
    8080
}
