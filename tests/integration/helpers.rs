//! Shared test helpers for integration tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::watch;
use tower::ServiceExt;
use uuid::Uuid;

use jobhub_api::AppState;
use jobhub_api::router::build_router;
use jobhub_backend::memory::MemoryQueueBackend;
use jobhub_core::config::{AppConfig, LogLevel, LoggerConfig, PoolConfig, RedisPoolConfig};
use jobhub_core::error::AppError;
use jobhub_core::models::{JobParameters, JobStatus, OpCommand};
use jobhub_core::result::AppResult;
use jobhub_core::traits::{Pool, QueueBackend};
use jobhub_service::Controller;
use jobhub_worker::jobs::{DemoJob, KNOWN_JOB_DEMO};
use jobhub_worker::{
    ContextTemplate, Job, JobError, JobRegistry, RunContext, WorkerPool, WorkerPoolOptions,
};

pub const TEST_SECRET: &str = "integration-secret";

/// A job that loops until it observes an op-command.
pub struct LingerJob;

#[async_trait]
impl Job for LingerJob {
    fn validate_params(&self, _parameters: &JobParameters) -> AppResult<()> {
        Ok(())
    }

    async fn run(&self, ctx: &RunContext, _parameters: JobParameters) -> Result<(), JobError> {
        for _ in 0..500 {
            match ctx.op_command().await {
                Some(OpCommand::Stop) => return Err(JobError::Stopped),
                Some(OpCommand::Cancel) => return Err(JobError::Cancelled),
                None => {}
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }
}

/// A job that always fails, with a budget of two attempts.
pub struct FlakyJob;

#[async_trait]
impl Job for FlakyJob {
    fn max_fails(&self) -> u32 {
        2
    }

    fn validate_params(&self, _parameters: &JobParameters) -> AppResult<()> {
        Ok(())
    }

    async fn run(&self, _ctx: &RunContext, _parameters: JobParameters) -> Result<(), JobError> {
        Err(AppError::internal("flaky by design").into())
    }
}

/// Test application: router plus direct access to the backend.
pub struct TestApp {
    pub router: Router,
    pub backend: Arc<MemoryQueueBackend>,
    pub pool: Arc<WorkerPool>,
    pub log_dir: tempfile::TempDir,
    _shutdown_tx: watch::Sender<bool>,
}

impl TestApp {
    /// Boot a full in-process service on the memory backend.
    pub async fn new() -> Self {
        let backend = Arc::new(MemoryQueueBackend::new());
        let log_dir = tempfile::tempdir().expect("tempdir");

        let mut registry = JobRegistry::new();
        registry
            .register(KNOWN_JOB_DEMO, Arc::new(DemoJob))
            .expect("register demo");
        registry
            .register("linger", Arc::new(LingerJob))
            .expect("register linger");
        registry
            .register("flaky", Arc::new(FlakyJob))
            .expect("register flaky");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let template = ContextTemplate::new(
            shutdown_rx.clone(),
            log_dir.path().to_path_buf(),
            LogLevel::Debug,
        );

        let options = WorkerPoolOptions {
            workers: 4,
            poll_interval: Duration::from_millis(20),
            promote_interval: Duration::from_millis(40),
            cron_interval: Duration::from_millis(200),
            heartbeat_interval: Duration::from_millis(200),
            lease_expiry: Duration::from_secs(60),
            backoff_base: Duration::from_millis(40),
            backoff_cap: Duration::from_millis(200),
            drain_window: Duration::from_secs(1),
        };

        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&backend) as Arc<dyn QueueBackend>,
            Arc::new(registry),
            template,
            options,
            shutdown_rx,
        ));
        Arc::clone(&pool).start();

        let controller = Arc::new(Controller::new(
            Arc::clone(&pool) as Arc<dyn Pool>,
            log_dir.path().to_path_buf(),
        ));

        let config = Arc::new(test_config(&log_dir));
        let state = AppState::new(config, controller, Some(TEST_SECRET.to_string()));

        Self {
            router: build_router(state),
            backend,
            pool,
            log_dir,
            _shutdown_tx: shutdown_tx,
        }
    }

    /// Send a request with the test secret. Returns status and JSON body
    /// (`null` when the body is empty or not JSON).
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, bytes) = self
            .raw_request(method, path, body, Some(TEST_SECRET))
            .await;
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    /// Send a request with an arbitrary secret (or none).
    pub async fn raw_request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        secret: Option<&str>,
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(secret) = secret {
            builder = builder.header("authorization", format!("Core {secret}"));
        }

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes()
            .to_vec();
        (status, bytes)
    }

    /// Submit a job and return its id, asserting a 202.
    pub async fn submit(&self, body: Value) -> Uuid {
        let (status, json) = self.request("POST", "/api/v1/jobs", Some(body)).await;
        assert_eq!(status, StatusCode::ACCEPTED, "submit failed: {json}");
        json["id"]
            .as_str()
            .and_then(|id| id.parse().ok())
            .expect("job id in response")
    }

    /// Poll the API until the job reports `status`, or panic on timeout.
    pub async fn wait_for_status(&self, id: Uuid, status: JobStatus, timeout: Duration) -> Value {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let (code, json) = self
                .request("GET", &format!("/api/v1/jobs/{id}"), None)
                .await;
            if code == StatusCode::OK && json["status"] == Value::from(status.as_str()) {
                return json;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for job {id} to reach '{status}', last seen: {json}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn test_config(log_dir: &tempfile::TempDir) -> AppConfig {
    AppConfig {
        protocol: "http".to_string(),
        port: 8080,
        https_config: None,
        worker_pool: PoolConfig {
            workers: 4,
            backend: "redis".to_string(),
            redis_pool: Some(RedisPoolConfig {
                redis_url: "redis://localhost:6379".to_string(),
                namespace: "jobhub-test".to_string(),
            }),
        },
        logger: LoggerConfig {
            path: log_dir.path().display().to_string(),
            level: "DEBUG".to_string(),
            archive_period: 1,
        },
    }
}

/// A generic submission body for a registered job name.
pub fn generic_request(name: &str, image: &str) -> Value {
    serde_json::json!({
        "name": name,
        "parameters": {"image": image},
        "metadata": {"kind": "Generic", "unique": false}
    })
}
