//! Outdated job-log sweeper.
//!
//! Periodically scans the log base directory and deletes per-job log files
//! older than the configured archive period. Runs under the ambient
//! shutdown signal and is never on the job execution hot path.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

/// Sweeper for old per-job log files.
#[derive(Debug)]
pub struct LogSweeper {
    base_path: PathBuf,
    archive_period_days: u32,
}

impl LogSweeper {
    /// Create a sweeper over `base_path` keeping `archive_period_days` of logs.
    pub fn new(base_path: PathBuf, archive_period_days: u32) -> Self {
        Self {
            base_path,
            archive_period_days,
        }
    }

    /// Spawn the sweep loop. One pass runs immediately, then one per
    /// archive period.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let period = Duration::from_secs(u64::from(self.archive_period_days) * 24 * 60 * 60);

        tokio::spawn(async move {
            info!(
                path = %self.base_path.display(),
                days = self.archive_period_days,
                "Log sweeper started"
            );

            loop {
                self.sweep();

                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Log sweeper shutting down");
                            break;
                        }
                    }
                    _ = time::sleep(period) => {}
                }
            }
        })
    }

    /// Delete log files older than the archive period.
    fn sweep(&self) {
        let cutoff = SystemTime::now()
            - Duration::from_secs(u64::from(self.archive_period_days) * 24 * 60 * 60);

        let entries = match std::fs::read_dir(&self.base_path) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %self.base_path.display(), %err, "Failed to scan log directory");
                return;
            }
        };

        let mut removed = 0u64;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("log") {
                continue;
            }

            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };

            if modified < cutoff {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(err) => warn!(path = %path.display(), %err, "Failed to remove old job log"),
                }
            }
        }

        if removed > 0 {
            debug!(removed, "Swept outdated job logs");
        }
    }
}
