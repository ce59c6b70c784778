//! Domain models for jobhub.

pub mod job;

pub use job::{
    HOOK_STATUS_ACTIVATED, HOOK_STATUS_ERROR, JobKind, JobMetadata, JobParameters, JobRecord,
    JobRequest, JobStats, JobStatus, OpCommand, WorkerPoolStats, ref_link, unique_digest,
};
