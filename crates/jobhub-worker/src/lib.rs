//! Worker pool and job execution for jobhub.
//!
//! This crate provides:
//! - The [`Job`] trait user job implementations plug into, with sentinel
//!   errors for cooperative stop/cancel
//! - The process-local job registry populated at bootstrap
//! - The per-job execution context (cancellation polling, check-ins,
//!   per-job file logger, property bag)
//! - The worker pool itself: bounded workers, scheduled-job promotion,
//!   periodic cron firing, lease reaping, and heartbeats
//! - The status-hook dispatcher and the log-file sweeper

pub mod context;
pub mod hooks;
pub mod job;
pub mod joblog;
pub mod jobs;
pub mod pool;
pub mod registry;
pub mod sweeper;

pub use context::{CheckinReporter, ContextTemplate, OpCommandProbe, RunContext};
pub use job::{Job, JobError};
pub use joblog::JobLogger;
pub use pool::{WorkerPool, WorkerPoolOptions};
pub use registry::JobRegistry;
pub use sweeper::LogSweeper;
