//! HTTP surface behaviour: auth, validation errors, error bodies.

use http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use crate::helpers::{TestApp, generic_request};

#[tokio::test]
async fn test_requests_without_secret_are_unauthorized() {
    let app = TestApp::new().await;

    let (status, _) = app
        .raw_request("GET", "/api/v1/stats", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .raw_request("GET", "/api/v1/stats", None, Some("wrong-secret"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let json: serde_json::Value = serde_json::from_slice(&body).expect("error body is json");
    assert_eq!(json["code"], 401);
    assert_eq!(json["err"], "UNAUTHORIZED");
    assert!(json["description"].is_string());
}

#[tokio::test]
async fn test_submit_validation_failures_are_bad_requests() {
    let app = TestApp::new().await;

    // Unsupported kind.
    let (status, json) = app
        .request(
            "POST",
            "/api/v1/jobs",
            Some(json!({
                "name": "demo",
                "parameters": {"image": "demo-x"},
                "metadata": {"kind": "Weekly"}
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], 400);

    // Scheduled without a positive delay.
    let (status, _) = app
        .request(
            "POST",
            "/api/v1/jobs",
            Some(json!({
                "name": "demo",
                "parameters": {"image": "demo-x"},
                "metadata": {"kind": "Scheduled", "schedule_delay": 0}
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Periodic with an unparseable cron spec.
    let (status, _) = app
        .request(
            "POST",
            "/api/v1/jobs",
            Some(json!({
                "name": "demo",
                "parameters": {"image": "demo-x"},
                "metadata": {"kind": "Periodic", "cron_spec": "often"}
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unknown job name.
    let (status, _) = app
        .request("POST", "/api/v1/jobs", Some(generic_request("nope", "x")))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Parameters rejected by the job's validator.
    let (status, _) = app
        .request(
            "POST",
            "/api/v1/jobs",
            Some(json!({
                "name": "demo",
                "parameters": {},
                "metadata": {"kind": "Generic"}
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_job_lookup_errors() {
    let app = TestApp::new().await;

    let (status, _) = app
        .request("GET", "/api/v1/jobs/not-a-uuid", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = app
        .request("GET", &format!("/api/v1/jobs/{}", Uuid::new_v4()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["err"], "NOT_FOUND");

    let (status, _) = app
        .request(
            "GET",
            &format!("/api/v1/jobs/{}/log", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unsupported_action_is_rejected() {
    let app = TestApp::new().await;
    let id = app.submit(generic_request("linger", "x")).await;

    let (status, _) = app
        .request(
            "POST",
            &format!("/api/v1/jobs/{id}"),
            Some(json!({"action": "pause"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(
            "POST",
            &format!("/api/v1/jobs/{id}"),
            Some(json!({"action": "cancel"})),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_stats_lists_this_pool() {
    let app = TestApp::new().await;

    // The pool heartbeats immediately on start.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let (status, json) = app.request("GET", "/api/v1/stats", None).await;
    assert_eq!(status, StatusCode::OK);

    let pools = json.as_array().expect("stats is a list");
    assert_eq!(pools.len(), 1);
    assert_eq!(pools[0]["pool_id"], app.pool.pool_id());
    assert_eq!(pools[0]["concurrency"], 4);
    let names = pools[0]["job_names"].as_array().expect("job names");
    assert!(names.iter().any(|n| n == "demo"));
}
