//! Application state shared across all handlers and middleware.

use std::sync::Arc;

use jobhub_core::config::AppConfig;
use jobhub_service::Controller;

/// State passed to every handler via axum's `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Arc<AppConfig>,
    /// The controller serving all job operations.
    pub controller: Arc<Controller>,
    /// Shared auth secret expected in the `Authorization` header.
    /// `None` rejects every request.
    pub auth_secret: Option<String>,
}

impl AppState {
    /// Assemble the state.
    pub fn new(
        config: Arc<AppConfig>,
        controller: Arc<Controller>,
        auth_secret: Option<String>,
    ) -> Self {
        Self {
            config,
            controller,
            auth_secret,
        }
    }
}
