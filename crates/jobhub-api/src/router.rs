//! Route definitions for the jobhub HTTP API.
//!
//! All routes are versioned under `/api/v1` and guarded by the
//! shared-secret auth layer.

use axum::{
    Router,
    middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware;
use crate::state::AppState;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/jobs", post(handlers::job::submit_job))
        .route(
            "/jobs/:id",
            get(handlers::job::get_job).post(handlers::job::job_action),
        )
        .route("/jobs/:id/log", get(handlers::job::job_log))
        .route("/stats", get(handlers::stats::check_status));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ))
        .with_state(state)
}
