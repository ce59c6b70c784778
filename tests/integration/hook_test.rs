//! Status-hook delivery: one POST per status transition, in order.

use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::http::StatusCode as AxumStatus;
use axum::routing::post;
use http::StatusCode;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use jobhub_core::models::JobStatus;

use crate::helpers::TestApp;

/// A local endpoint capturing every hook POST it receives.
async fn hook_server() -> (String, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel::<Value>();

    let app = Router::new().route(
        "/hook",
        post(move |Json(body): Json<Value>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(body);
                AxumStatus::OK
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind hook server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}/hook"), rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("hook event within deadline")
        .expect("hook channel open")
}

#[tokio::test]
async fn test_hook_receives_transitions_in_order() {
    let app = TestApp::new().await;
    let (hook_url, mut events) = hook_server().await;

    // A short delay guarantees the hook is registered before pickup.
    let (status, submitted) = app
        .request(
            "POST",
            "/api/v1/jobs",
            Some(json!({
                "name": "demo",
                "parameters": {"image": "demo-x"},
                "status_hook": hook_url,
                "metadata": {"kind": "Scheduled", "schedule_delay": 1}
            })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(submitted["hook_status"], "activated");

    let id: uuid::Uuid = submitted["id"].as_str().unwrap().parse().unwrap();
    app.wait_for_status(id, JobStatus::Success, Duration::from_secs(5))
        .await;

    let first = next_event(&mut events).await;
    assert_eq!(first["job_id"], submitted["id"]);
    assert_eq!(first["status"], "running");
    assert!(first["timestamp"].is_string());
    assert_eq!(first["metadata"]["name"], "demo");

    let second = next_event(&mut events).await;
    assert_eq!(second["job_id"], submitted["id"]);
    assert_eq!(second["status"], "success");
}

#[tokio::test]
async fn test_failing_job_notifies_every_transition() {
    let app = TestApp::new().await;
    let (hook_url, mut events) = hook_server().await;

    let (status, submitted) = app
        .request(
            "POST",
            "/api/v1/jobs",
            Some(json!({
                "name": "flaky",
                "parameters": {},
                "status_hook": hook_url,
                "metadata": {"kind": "Scheduled", "schedule_delay": 1}
            })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let id: uuid::Uuid = submitted["id"].as_str().unwrap().parse().unwrap();
    app.wait_for_status(id, JobStatus::Dead, Duration::from_secs(10))
        .await;

    // Two failing executions with a retry in between:
    // running, error, scheduled, running, error, dead.
    let expected = ["running", "error", "scheduled", "running", "error", "dead"];
    for expected_status in expected {
        let event = next_event(&mut events).await;
        assert_eq!(
            event["status"], expected_status,
            "unexpected transition order"
        );
    }
}
