//! Worker pool health handler.

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;

use jobhub_core::error::AppError;

use crate::state::AppState;

/// GET /api/v1/stats
pub async fn check_status(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let pools = state.controller.check_status().await?;
    Ok(Json(pools))
}
