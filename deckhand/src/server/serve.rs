//! HTTP server setup

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::errors::DeckhandError;
use crate::server::handlers::{health_handler, root_handler, version_handler};
use crate::server::state::ServerState;
use crate::storage::settings::BackendSettings;

/// Backend routes
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the backend HTTP server
pub async fn serve(
    settings: &BackendSettings,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, JoinHandle<Result<(), DeckhandError>>), DeckhandError> {
    let app = router(state);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DeckhandError::ServerError(format!("backend bind {}: {}", addr, e)))?;
    let local_addr = listener.local_addr()?;
    info!("Backend listening on {}", local_addr);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| DeckhandError::ServerError(e.to_string()))
    });

    Ok((local_addr, handle))
}
