//! Job lifecycle scenarios end-to-end: happy path, cancel, uniqueness,
//! scheduled and periodic firing, retry exhaustion.

use std::time::Duration;

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde_json::json;

use jobhub_core::models::JobStatus;
use jobhub_core::traits::QueueBackend;

use crate::helpers::{TestApp, generic_request};

#[tokio::test]
async fn test_happy_generic_job() {
    let app = TestApp::new().await;

    let (status, submitted) = app
        .request(
            "POST",
            "/api/v1/jobs",
            Some(generic_request("demo", "demo-x")),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(submitted["name"], "demo");
    assert_eq!(submitted["kind"], "Generic");
    assert_eq!(submitted["status"], "pending");

    let id: uuid::Uuid = submitted["id"].as_str().unwrap().parse().unwrap();
    let done = app
        .wait_for_status(id, JobStatus::Success, Duration::from_secs(5))
        .await;

    // Timestamps are consistent with the lifecycle.
    let enqueue: DateTime<Utc> = done["enqueue_time"].as_str().unwrap().parse().unwrap();
    let update: DateTime<Utc> = done["update_time"].as_str().unwrap().parse().unwrap();
    assert!(update >= enqueue);
    let check_in_at: DateTime<Utc> = done["check_in_at"].as_str().unwrap().parse().unwrap();
    assert!(check_in_at >= enqueue);
    assert!(check_in_at <= update);

    // The per-job log exists and is retrievable as text.
    let (status, log) = app
        .raw_request(
            "GET",
            &format!("/api/v1/jobs/{id}/log"),
            None,
            Some(crate::helpers::TEST_SECRET),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(log).expect("log is text");
    assert!(text.contains("processing image 'demo-x'"));
}

#[tokio::test]
async fn test_cooperative_cancel_of_running_job() {
    let app = TestApp::new().await;
    let id = app.submit(generic_request("linger", "x")).await;

    app.wait_for_status(id, JobStatus::Running, Duration::from_secs(5))
        .await;

    let (status, _) = app
        .request(
            "POST",
            &format!("/api/v1/jobs/{id}"),
            Some(json!({"action": "cancel"})),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    app.wait_for_status(id, JobStatus::Cancelled, Duration::from_secs(5))
        .await;

    // No failed execution was recorded.
    let record = app.backend.read(id).await.unwrap().unwrap();
    assert_eq!(record.fails, 0);
}

#[tokio::test]
async fn test_stop_before_pickup_retires_scheduled_job() {
    let app = TestApp::new().await;

    let (status, submitted) = app
        .request(
            "POST",
            "/api/v1/jobs",
            Some(json!({
                "name": "demo",
                "parameters": {"image": "demo-x"},
                "metadata": {"kind": "Scheduled", "schedule_delay": 30}
            })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id: uuid::Uuid = submitted["id"].as_str().unwrap().parse().unwrap();

    let (status, _) = app
        .request(
            "POST",
            &format!("/api/v1/jobs/{id}"),
            Some(json!({"action": "stop"})),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    app.wait_for_status(id, JobStatus::Stopped, Duration::from_secs(2))
        .await;
}

#[tokio::test]
async fn test_unique_jobs_conflict_while_non_terminal() {
    let app = TestApp::new().await;

    let body = json!({
        "name": "linger",
        "parameters": {"image": "same"},
        "metadata": {"kind": "Generic", "unique": true}
    });

    let (status, first) = app.request("POST", "/api/v1/jobs", Some(body.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(first["unique"], true);

    let (status, second) = app.request("POST", "/api/v1/jobs", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(second["code"], 409);
    assert_eq!(second["err"], "CONFLICT");
}

#[tokio::test]
async fn test_scheduled_job_fires_after_delay() {
    let app = TestApp::new().await;

    let (status, submitted) = app
        .request(
            "POST",
            "/api/v1/jobs",
            Some(json!({
                "name": "demo",
                "parameters": {"image": "demo-x"},
                "metadata": {"kind": "Scheduled", "schedule_delay": 1}
            })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(submitted["status"], "scheduled");

    let enqueue: DateTime<Utc> = submitted["enqueue_time"].as_str().unwrap().parse().unwrap();
    let run_at: DateTime<Utc> = submitted["run_at"].as_str().unwrap().parse().unwrap();
    let delta = (run_at - enqueue).num_milliseconds();
    assert!((900..=1500).contains(&delta), "run_at off by {delta}ms");

    let id: uuid::Uuid = submitted["id"].as_str().unwrap().parse().unwrap();
    app.wait_for_status(id, JobStatus::Success, Duration::from_secs(5))
        .await;
}

#[tokio::test]
async fn test_periodic_template_spawns_distinct_firings() {
    let app = TestApp::new().await;

    let (status, template) = app
        .request(
            "POST",
            "/api/v1/jobs",
            Some(json!({
                "name": "demo",
                "parameters": {"image": "demo-x"},
                "metadata": {"kind": "Periodic", "cron_spec": "*/1 * * * * *"}
            })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(template["kind"], "Periodic");
    assert_eq!(template["cron_spec"], "*/1 * * * * *");

    tokio::time::sleep(Duration::from_secs(3)).await;

    let template_id: uuid::Uuid = template["id"].as_str().unwrap().parse().unwrap();
    let template_link = template["ref_link"].as_str().unwrap();

    let mut firing_ids = Vec::new();
    for id in app.backend.job_ids() {
        if id == template_id {
            continue;
        }
        let record = app.backend.read(id).await.unwrap().unwrap();
        if record.stats.ref_link == template_link {
            firing_ids.push(id);
        }
    }
    firing_ids.dedup();
    assert!(
        firing_ids.len() >= 2,
        "expected at least 2 distinct firings, saw {}",
        firing_ids.len()
    );

    // The template itself is visible and at rest.
    let (status, fetched) = app
        .request("GET", &format!("/api/v1/jobs/{template_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["status"], "scheduled");
}

#[tokio::test]
async fn test_retry_budget_exhaustion_marks_dead() {
    let app = TestApp::new().await;
    let id = app.submit(generic_request("flaky", "x")).await;

    let dead = app
        .wait_for_status(id, JobStatus::Dead, Duration::from_secs(10))
        .await;
    assert!(dead["die_at"].is_string());

    let record = app.backend.read(id).await.unwrap().unwrap();
    assert_eq!(record.fails, 2);
    assert_eq!(app.backend.dead_len(), 1);

    // Dead is terminal: manual retry answers 501.
    let (status, body) = app
        .request(
            "POST",
            &format!("/api/v1/jobs/{id}"),
            Some(json!({"action": "retry"})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body["err"], "NOT_RETRIABLE");
}
