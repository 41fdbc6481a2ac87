//! Reverse proxy server

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::Request, extract::State, response::Response, routing::any, Router};
use reqwest::Client;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;
use url::Url;

use crate::errors::DeckhandError;
use crate::proxy::forward::forward;
use crate::storage::settings::ProxySettings;

/// Proxy state shared across handlers
pub struct ProxyState {
    pub client: Client,
    pub upstream: String,
    pub request_timeout: Duration,
    pub health_timeout: Duration,
}

impl ProxyState {
    pub fn from_settings(settings: &ProxySettings) -> Result<Self, DeckhandError> {
        let upstream = Url::parse(&settings.upstream_url)
            .map_err(|e| DeckhandError::ConfigError(format!("invalid upstream url: {}", e)))?;
        if !matches!(upstream.scheme(), "http" | "https") {
            return Err(DeckhandError::ConfigError(format!(
                "unsupported upstream scheme '{}'",
                upstream.scheme()
            )));
        }
        if settings.health_timeout_ms == 0 || settings.request_timeout_ms == 0 {
            return Err(DeckhandError::ConfigError(
                "proxy timeouts must be greater than zero".to_string(),
            ));
        }

        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            upstream: settings.upstream_url.trim_end_matches('/').to_string(),
            request_timeout: settings.request_timeout(),
            health_timeout: settings.health_timeout(),
        })
    }
}

async fn health_handler(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    forward(&state.client, &state.upstream, state.health_timeout, request).await
}

async fn forward_handler(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    forward(&state.client, &state.upstream, state.request_timeout, request).await
}

/// Build the proxy router: a dedicated health route plus a catch-all
pub fn router(health_path: &str, state: Arc<ProxyState>) -> Result<Router, DeckhandError> {
    if !health_path.starts_with('/') {
        return Err(DeckhandError::ConfigError(format!(
            "proxy health path '{}' must start with '/'",
            health_path
        )));
    }

    Ok(Router::new()
        .route(health_path, any(health_handler))
        .fallback(forward_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http()))
}

/// Start the proxy server
pub async fn serve(
    settings: &ProxySettings,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, JoinHandle<Result<(), DeckhandError>>), DeckhandError> {
    let state = Arc::new(ProxyState::from_settings(settings)?);
    let app = router(&settings.health_path, state)?;

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DeckhandError::ServerError(format!("proxy bind {}: {}", addr, e)))?;
    let local_addr = listener.local_addr()?;
    info!(
        "Proxy listening on {} -> {}",
        local_addr, settings.upstream_url
    );

    let handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| DeckhandError::ProxyError(e.to_string()))
    });

    Ok((local_addr, handle))
}
