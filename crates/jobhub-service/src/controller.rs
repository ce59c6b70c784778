//! The controller: validation and dispatch policy between the HTTP edge
//! and the worker pool.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use jobhub_core::error::AppError;
use jobhub_core::models::{
    HOOK_STATUS_ACTIVATED, HOOK_STATUS_ERROR, JobKind, JobRequest, JobStats, WorkerPoolStats,
};
use jobhub_core::result::AppResult;
use jobhub_core::traits::Pool;

/// Coordinates the lower components to serve job requests.
///
/// The pool is consumed through its capability trait only; the controller
/// never reaches back into the construction layer.
pub struct Controller {
    pool: Arc<dyn Pool>,
    log_base: PathBuf,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("log_base", &self.log_base)
            .finish()
    }
}

impl Controller {
    /// Create a controller over a pool and the job-log base directory.
    pub fn new(pool: Arc<dyn Pool>, log_base: PathBuf) -> Self {
        Self { pool, log_base }
    }

    /// Validate a submission and dispatch it by kind.
    ///
    /// A requested status hook is registered best-effort after the enqueue
    /// succeeded; its outcome lands in `hook_status` and never fails the
    /// launch.
    pub async fn launch_job(&self, request: JobRequest) -> AppResult<JobStats> {
        let kind = validate_request(&request)?;

        if !self.pool.is_known_job(&request.name) {
            return Err(AppError::validation(format!(
                "job with name '{}' is unknown",
                request.name
            )));
        }
        self.pool
            .validate_job_parameters(&request.name, &request.parameters)?;

        let metadata = request
            .metadata
            .as_ref()
            .ok_or_else(|| AppError::bad_request("metadata of job is missing"))?;

        let mut stats = match kind {
            JobKind::Scheduled => {
                self.pool
                    .schedule(
                        &request.name,
                        request.parameters.clone(),
                        metadata.schedule_delay.unwrap_or_default(),
                        metadata.unique,
                    )
                    .await?
            }
            JobKind::Periodic => {
                self.pool
                    .periodically_enqueue(
                        &request.name,
                        request.parameters.clone(),
                        metadata.cron_spec.as_deref().unwrap_or_default(),
                    )
                    .await?
            }
            JobKind::Generic => {
                self.pool
                    .enqueue(&request.name, request.parameters.clone(), metadata.unique)
                    .await?
            }
        };

        if let Some(hook_url) = request.status_hook.as_deref() {
            stats.hook_status = Some(
                match self.pool.register_hook(stats.id, hook_url).await {
                    Ok(()) => HOOK_STATUS_ACTIVATED,
                    Err(err) => {
                        warn!(id = %stats.id, %err, "Status hook registration failed");
                        HOOK_STATUS_ERROR
                    }
                }
                .to_string(),
            );
        }

        Ok(stats)
    }

    /// Stats of a job or periodic template.
    pub async fn get_job(&self, job_id: &str) -> AppResult<JobStats> {
        self.pool.get_job_stats(parse_id(job_id)?).await
    }

    /// Ask a job to halt gracefully.
    pub async fn stop_job(&self, job_id: &str) -> AppResult<()> {
        self.pool.stop_job(parse_id(job_id)?).await
    }

    /// Cancel a job.
    pub async fn cancel_job(&self, job_id: &str) -> AppResult<()> {
        self.pool.cancel_job(parse_id(job_id)?).await
    }

    /// Retry a job resting in the error state.
    pub async fn retry_job(&self, job_id: &str) -> AppResult<()> {
        self.pool.retry_job(parse_id(job_id)?).await
    }

    /// The log text of a job, if its log file exists.
    pub async fn job_log(&self, job_id: &str) -> AppResult<Vec<u8>> {
        let id = parse_id(job_id)?;
        let path = self.log_base.join(format!("{id}.log"));
        if !path.is_file() {
            return Err(AppError::not_found(format!("{id}.log not found")));
        }

        Ok(tokio::fs::read(&path).await?)
    }

    /// Liveness of every worker pool sharing the backend.
    pub async fn check_status(&self) -> AppResult<Vec<WorkerPoolStats>> {
        self.pool.stats().await
    }
}

/// Validate a submission. The order of checks is part of the contract:
/// name, metadata, kind, kind-specific fields.
fn validate_request(request: &JobRequest) -> AppResult<JobKind> {
    if request.name.is_empty() {
        return Err(AppError::bad_request("name of job must be specified"));
    }

    let metadata = request
        .metadata
        .as_ref()
        .ok_or_else(|| AppError::bad_request("metadata of job is missing"))?;

    let kind = JobKind::from_str(&metadata.kind)?;

    match kind {
        JobKind::Scheduled => {
            if metadata.schedule_delay.unwrap_or_default() == 0 {
                return Err(AppError::bad_request(
                    "'schedule_delay' must be specified if the job kind is 'Scheduled'",
                ));
            }
        }
        JobKind::Periodic => {
            let cron_spec = metadata.cron_spec.as_deref().unwrap_or_default();
            if cron_spec.is_empty() {
                return Err(AppError::bad_request(
                    "'cron_spec' must be specified if the job kind is 'Periodic'",
                ));
            }
            if let Err(err) = cron::Schedule::from_str(cron_spec) {
                return Err(AppError::bad_request(format!(
                    "'cron_spec' is not correctly set: {err}"
                )));
            }
        }
        JobKind::Generic => {}
    }

    Ok(kind)
}

fn parse_id(job_id: &str) -> AppResult<Uuid> {
    if job_id.is_empty() {
        return Err(AppError::bad_request("empty job ID"));
    }
    Uuid::parse_str(job_id).map_err(|_| AppError::bad_request(format!("invalid job ID '{job_id}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    use jobhub_core::error::ErrorKind;
    use jobhub_core::models::{JobMetadata, JobParameters, JobStatus, ref_link};

    #[derive(Debug, Default)]
    struct FakePool {
        known: bool,
        params_ok: bool,
        hook_fails: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakePool {
        fn permissive() -> Self {
            Self {
                known: true,
                params_ok: true,
                hook_fails: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, call: &str) {
            self.calls.lock().expect("calls mutex").push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls mutex").clone()
        }

        fn stats(kind: JobKind) -> JobStats {
            let id = Uuid::new_v4();
            let now = Utc::now();
            JobStats {
                id,
                name: "demo".to_string(),
                kind,
                unique: false,
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
            }
        }
    }

    #[async_trait]
    impl Pool for FakePool {
        async fn enqueue(
            &self,
            _name: &str,
            _parameters: JobParameters,
            _unique: bool,
        ) -> AppResult<JobStats> {
            self.record("enqueue");
            Ok(Self::stats(JobKind::Generic))
        }

        async fn schedule(
            &self,
            _name: &str,
            _parameters: JobParameters,
            _delay_seconds: u64,
            _unique: bool,
        ) -> AppResult<JobStats> {
            self.record("schedule");
            Ok(Self::stats(JobKind::Scheduled))
        }

        async fn periodically_enqueue(
            &self,
            _name: &str,
            _parameters: JobParameters,
            _cron_spec: &str,
        ) -> AppResult<JobStats> {
            self.record("periodically_enqueue");
            Ok(Self::stats(JobKind::Periodic))
        }

        async fn get_job_stats(&self, _id: Uuid) -> AppResult<JobStats> {
            Ok(Self::stats(JobKind::Generic))
        }

        async fn stop_job(&self, _id: Uuid) -> AppResult<()> {
            self.record("stop");
            Ok(())
        }

        async fn cancel_job(&self, _id: Uuid) -> AppResult<()> {
            self.record("cancel");
            Ok(())
        }

        async fn retry_job(&self, _id: Uuid) -> AppResult<()> {
            self.record("retry");
            Ok(())
        }

        async fn register_hook(&self, _id: Uuid, _url: &str) -> AppResult<()> {
            self.record("register_hook");
            if self.hook_fails {
                Err(AppError::backend("hook table unavailable"))
            } else {
                Ok(())
            }
        }

        fn is_known_job(&self, _name: &str) -> bool {
            self.known
        }

        fn validate_job_parameters(
            &self,
            _name: &str,
            _parameters: &JobParameters,
        ) -> AppResult<()> {
            if self.params_ok {
                Ok(())
            } else {
                Err(AppError::validation("parameters rejected"))
            }
        }

        async fn stats(&self) -> AppResult<Vec<WorkerPoolStats>> {
            Ok(Vec::new())
        }
    }

    fn controller(pool: FakePool) -> (Controller, Arc<FakePool>) {
        let pool = Arc::new(pool);
        let controller = Controller::new(
            Arc::clone(&pool) as Arc<dyn Pool>,
            std::env::temp_dir(),
        );
        (controller, pool)
    }

    fn request(kind: &str) -> JobRequest {
        JobRequest {
            name: "demo".to_string(),
            parameters: JobParameters::new(),
            status_hook: None,
            metadata: Some(JobMetadata {
                kind: kind.to_string(),
                schedule_delay: None,
                cron_spec: None,
                unique: false,
            }),
        }
    }

    #[tokio::test]
    async fn test_launch_rejects_empty_name_first() {
        let (controller, _) = controller(FakePool::permissive());
        let mut req = request("NoSuchKind");
        req.name = String::new();

        let err = controller.launch_job(req).await.unwrap_err();
        assert!(err.message.contains("name of job"));
    }

    #[tokio::test]
    async fn test_launch_rejects_missing_metadata() {
        let (controller, _) = controller(FakePool::permissive());
        let mut req = request("Generic");
        req.metadata = None;

        let err = controller.launch_job(req).await.unwrap_err();
        assert!(err.message.contains("metadata"));
    }

    #[tokio::test]
    async fn test_launch_rejects_unsupported_kind() {
        let (controller, _) = controller(FakePool::permissive());
        let err = controller.launch_job(request("Weekly")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert!(err.message.contains("not supported"));
    }

    #[tokio::test]
    async fn test_scheduled_requires_positive_delay() {
        let (controller, _) = controller(FakePool::permissive());

        let err = controller.launch_job(request("Scheduled")).await.unwrap_err();
        assert!(err.message.contains("schedule_delay"));

        let mut zero = request("Scheduled");
        zero.metadata.as_mut().expect("metadata").schedule_delay = Some(0);
        let err = controller.launch_job(zero).await.unwrap_err();
        assert!(err.message.contains("schedule_delay"));
    }

    #[tokio::test]
    async fn test_periodic_requires_parseable_cron() {
        let (controller, _) = controller(FakePool::permissive());

        let err = controller.launch_job(request("Periodic")).await.unwrap_err();
        assert!(err.message.contains("cron_spec"));

        let mut bad = request("Periodic");
        bad.metadata.as_mut().expect("metadata").cron_spec = Some("not a cron".to_string());
        let err = controller.launch_job(bad).await.unwrap_err();
        assert!(err.message.contains("cron_spec"));
    }

    #[tokio::test]
    async fn test_unknown_job_rejected_after_kind_checks() {
        let (controller, pool) = controller(FakePool {
            known: false,
            ..FakePool::permissive()
        });

        let err = controller.launch_job(request("Generic")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("unknown"));
        assert!(pool.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_parameters_stop_launch() {
        let (controller, pool) = controller(FakePool {
            params_ok: false,
            ..FakePool::permissive()
        });

        let err = controller.launch_job(request("Generic")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(pool.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_by_kind() {
        let (controller, pool) = controller(FakePool::permissive());

        controller.launch_job(request("Generic")).await.unwrap();

        let mut scheduled = request("Scheduled");
        scheduled.metadata.as_mut().expect("metadata").schedule_delay = Some(5);
        controller.launch_job(scheduled).await.unwrap();

        let mut periodic = request("Periodic");
        periodic.metadata.as_mut().expect("metadata").cron_spec =
            Some("*/1 * * * * *".to_string());
        controller.launch_job(periodic).await.unwrap();

        assert_eq!(
            pool.calls(),
            vec!["enqueue", "schedule", "periodically_enqueue"]
        );
    }

    #[tokio::test]
    async fn test_hook_failure_never_fails_launch() {
        let (controller, _) = controller(FakePool {
            hook_fails: true,
            ..FakePool::permissive()
        });

        let mut req = request("Generic");
        req.status_hook = Some("http://localhost:9999/hook".to_string());

        let stats = controller.launch_job(req).await.unwrap();
        assert_eq!(stats.hook_status.as_deref(), Some(HOOK_STATUS_ERROR));
    }

    #[tokio::test]
    async fn test_hook_success_reports_activated() {
        let (controller, pool) = controller(FakePool::permissive());

        let mut req = request("Generic");
        req.status_hook = Some("http://localhost:9999/hook".to_string());

        let stats = controller.launch_job(req).await.unwrap();
        assert_eq!(stats.hook_status.as_deref(), Some(HOOK_STATUS_ACTIVATED));
        assert!(pool.calls().contains(&"register_hook".to_string()));
    }

    #[tokio::test]
    async fn test_control_ops_validate_the_id() {
        let (controller, _) = controller(FakePool::permissive());

        assert_eq!(
            controller.stop_job("").await.unwrap_err().kind,
            ErrorKind::BadRequest
        );
        assert_eq!(
            controller.cancel_job("not-a-uuid").await.unwrap_err().kind,
            ErrorKind::BadRequest
        );
        controller
            .retry_job(&Uuid::new_v4().to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_job_log_missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = Arc::new(FakePool::permissive());
        let controller =
            Controller::new(pool as Arc<dyn Pool>, dir.path().to_path_buf());

        let id = Uuid::new_v4();
        let err = controller.job_log(&id.to_string()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        std::fs::write(dir.path().join(format!("{id}.log")), "line one\n").expect("write log");
        let bytes = controller.job_log(&id.to_string()).await.unwrap();
        assert_eq!(bytes, b"line one\n");
    }
}
