//! Status-hook delivery.
//!
//! Every status transition of a job with a registered hook URL becomes one
//! delivery attempt set: an HTTP POST retried up to 10 times with
//! exponential backoff, then silently dropped. Delivery runs on its own
//! task and never blocks a worker; events are delivered in enqueue order,
//! which keeps per-job deliveries in status-transition order.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use jobhub_core::models::{JobStats, JobStatus};

const MAX_DELIVERY_ATTEMPTS: u32 = 10;
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 5_000;

/// Body POSTed to the registered hook URL.
#[derive(Debug, Clone, Serialize)]
pub struct HookEvent {
    /// Id of the job that transitioned.
    pub job_id: Uuid,
    /// The status the job moved to.
    pub status: JobStatus,
    /// When the transition was observed.
    pub timestamp: DateTime<Utc>,
    /// Snapshot of the job's stats at transition time.
    pub metadata: JobStats,
}

impl HookEvent {
    /// Build an event from a stats snapshot.
    pub fn from_stats(stats: &JobStats) -> Self {
        Self {
            job_id: stats.id,
            status: stats.status,
            timestamp: stats.update_time,
            metadata: stats.clone(),
        }
    }
}

#[derive(Debug)]
struct Delivery {
    url: String,
    event: HookEvent,
}

/// Hands status transitions off to the background delivery task.
#[derive(Debug, Clone)]
pub struct HookDispatcher {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl HookDispatcher {
    /// Start the delivery task and return its dispatcher handle.
    pub fn start(mut shutdown: watch::Receiver<bool>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        let client = reqwest::Client::new();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Hook dispatcher shutting down");
                            break;
                        }
                    }
                    delivery = rx.recv() => {
                        let Some(delivery) = delivery else {
                            break;
                        };
                        deliver(&client, delivery).await;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Schedule one delivery attempt set. Best-effort.
    pub fn dispatch(&self, url: String, event: HookEvent) {
        if self.tx.send(Delivery { url, event }).is_err() {
            warn!("Hook dispatcher is gone; dropping status event");
        }
    }
}

async fn deliver(client: &reqwest::Client, delivery: Delivery) {
    let Delivery { url, event } = delivery;

    for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
        match client.post(&url).json(&event).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(job_id = %event.job_id, status = %event.status, %url, "Hook delivered");
                return;
            }
            Ok(response) => {
                debug!(
                    job_id = %event.job_id,
                    attempt,
                    code = response.status().as_u16(),
                    "Hook endpoint answered with an error"
                );
            }
            Err(err) => {
                debug!(job_id = %event.job_id, attempt, %err, "Hook delivery failed");
            }
        }

        if attempt < MAX_DELIVERY_ATTEMPTS {
            let backoff = (BACKOFF_BASE_MS << (attempt - 1)).min(BACKOFF_CAP_MS);
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
    }

    // Give up silently; delivery is best-effort.
    warn!(job_id = %event.job_id, %url, "Hook delivery abandoned after max attempts");
}
