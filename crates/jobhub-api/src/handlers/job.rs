//! Job submission, status, control, and log handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use serde::Deserialize;

use jobhub_core::error::AppError;
use jobhub_core::models::JobRequest;

use crate::state::AppState;

/// Body of `POST /api/v1/jobs/{id}`.
#[derive(Debug, Deserialize)]
pub struct JobActionRequest {
    /// `"stop"`, `"cancel"` or `"retry"`.
    pub action: String,
}

/// POST /api/v1/jobs
pub async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, AppError> {
    let request: JobRequest = serde_json::from_value(body)
        .map_err(|err| AppError::bad_request(format!("invalid job request: {err}")))?;

    let stats = state.controller.launch_job(request).await?;
    Ok((StatusCode::ACCEPTED, Json(stats)))
}

/// GET /api/v1/jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let stats = state.controller.get_job(&id).await?;
    Ok(Json(stats))
}

/// POST /api/v1/jobs/:id with `{action: stop|cancel|retry}`
pub async fn job_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, AppError> {
    let request: JobActionRequest = serde_json::from_value(body)
        .map_err(|err| AppError::bad_request(format!("invalid action request: {err}")))?;

    match request.action.as_str() {
        "stop" => state.controller.stop_job(&id).await?,
        "cancel" => state.controller.cancel_job(&id).await?,
        "retry" => state.controller.retry_job(&id).await?,
        other => {
            return Err(AppError::bad_request(format!(
                "action '{other}' is not supported, only 'stop', 'cancel' and 'retry' are"
            )));
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/jobs/:id/log
pub async fn job_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let text = state.controller.job_log(&id).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    ))
}
