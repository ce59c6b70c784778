//! Per-job file logger.
//!
//! Each execution writes to `{log_base}/{jobID}.log`. The file is created
//! on first write, appended to while the job runs, and read back by the
//! log-retrieval endpoint. One worker owns the file while the job runs.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use jobhub_core::config::LogLevel;

/// Level-filtered logger writing to one job's log file.
#[derive(Debug)]
pub struct JobLogger {
    path: PathBuf,
    level: LogLevel,
    file: Mutex<Option<File>>,
}

impl JobLogger {
    /// Create a logger for a job id under the base directory.
    pub fn new(base: &Path, id: Uuid, level: LogLevel) -> Self {
        Self {
            path: log_path(base, id),
            level,
            file: Mutex::new(None),
        }
    }

    /// Path of the log file this logger writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one line at `level`. Lines below the configured level are
    /// dropped; write failures are swallowed so logging never fails a job.
    pub fn log(&self, level: LogLevel, message: &str) {
        if level < self.level {
            return;
        }

        let Ok(mut guard) = self.file.lock() else {
            return;
        };

        if guard.is_none() {
            match OpenOptions::new().create(true).append(true).open(&self.path) {
                Ok(file) => *guard = Some(file),
                Err(err) => {
                    tracing::warn!(path = %self.path.display(), %err, "Failed to open job log");
                    return;
                }
            }
        }

        if let Some(file) = guard.as_mut() {
            let line = format!(
                "{} [{}] {message}\n",
                Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                level
            );
            let _ = file.write_all(line.as_bytes());
            let _ = file.flush();
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn fatal(&self, message: &str) {
        self.log(LogLevel::Fatal, message);
    }
}

/// Log file path for a job id.
pub fn log_path(base: &Path, id: Uuid) -> PathBuf {
    base.join(format!("{id}.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_filtered_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let id = Uuid::new_v4();
        let logger = JobLogger::new(dir.path(), id, LogLevel::Info);

        logger.debug("hidden");
        logger.info("visible");
        logger.error("also visible");

        let content = std::fs::read_to_string(logger.path()).expect("log file");
        assert!(!content.contains("hidden"));
        assert!(content.contains("[INFO] visible"));
        assert!(content.contains("[ERROR] also visible"));
    }

    #[test]
    fn test_file_created_on_first_write_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let id = Uuid::new_v4();
        let logger = JobLogger::new(dir.path(), id, LogLevel::Warning);

        logger.info("dropped");
        assert!(!logger.path().exists());

        logger.warning("kept");
        assert!(logger.path().exists());
    }
}
