//! Shared-secret authentication middleware.
//!
//! Every request must carry `Authorization: <scheme> <secret>` whose
//! trailing token equals the secret from the `CORE_SECRET` environment
//! variable. There are no users or sessions; the edge trusts exactly one
//! caller.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use jobhub_core::error::AppError;

use crate::state::AppState;

/// Rejects requests whose `Authorization` header does not carry the
/// expected secret.
pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.auth_secret.as_deref() else {
        return AppError::unauthorized("no auth secret is configured").into_response();
    };

    let presented = request
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let Some(presented) = presented else {
        return AppError::unauthorized("header 'Authorization' missing").into_response();
    };

    // Accept "<scheme> <secret>"; the scheme itself is not checked.
    let token = presented.split_whitespace().last().unwrap_or_default();
    if token != expected {
        return AppError::unauthorized("unauthorized").into_response();
    }

    next.run(request).await
}
