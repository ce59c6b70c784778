//! Server runner: binds the listener (plain or TLS) and serves the router
//! until the ambient shutdown signal fires.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use tokio::sync::watch;
use tracing::info;

use jobhub_core::config::{AppConfig, PROTOCOL_HTTPS};
use jobhub_core::error::AppError;
use jobhub_core::result::AppResult;

use crate::router::build_router;
use crate::state::AppState;

/// How long shutdown waits for in-flight requests before closing.
const DRAIN_WINDOW: Duration = Duration::from_secs(10);

/// Serve the API until shutdown is signalled. Blocks the calling task.
pub async fn serve(state: AppState, shutdown: watch::Receiver<bool>) -> AppResult<()> {
    let config: Arc<AppConfig> = Arc::clone(&state.config);
    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port as u16));

    let handle = Handle::new();
    spawn_shutdown_watcher(handle.clone(), shutdown);

    info!(
        "Server is started at {addr} with {protocol}",
        protocol = config.protocol
    );

    let served = if config.protocol == PROTOCOL_HTTPS {
        let https = config
            .https_config
            .as_ref()
            .ok_or_else(|| AppError::configuration("https selected without https_config"))?;

        let tls = RustlsConfig::from_pem_file(&https.cert, &https.key)
            .await
            .map_err(|err| {
                AppError::configuration(format!("Failed to load TLS certificate: {err}"))
            })?;

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(router.into_make_service())
            .await
    } else {
        axum_server::bind(addr)
            .handle(handle)
            .serve(router.into_make_service())
            .await
    };

    served.map_err(|err| AppError::internal(format!("Server error: {err}")))
}

/// Translate the watch signal into a graceful server shutdown.
fn spawn_shutdown_watcher(handle: Handle, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        loop {
            if shutdown.changed().await.is_err() {
                break;
            }
            if *shutdown.borrow() {
                break;
            }
        }
        info!("Shutting down HTTP server");
        handle.graceful_shutdown(Some(DRAIN_WINDOW));
    });
}
