//! Load balancer listener: routes only to healthy targets

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use reqwest::Client;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::balancer::group::TargetGroup;
use crate::errors::DeckhandError;
use crate::proxy::forward::forward;
use crate::storage::settings::BalancerSettings;

/// Balancer state shared across handlers
pub struct BalancerState {
    pub group: Arc<TargetGroup>,
    pub client: Client,
    pub request_timeout: Duration,
}

impl BalancerState {
    pub fn new(group: Arc<TargetGroup>, request_timeout: Duration) -> Result<Self, DeckhandError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            group,
            client,
            request_timeout,
        })
    }
}

async fn route_handler(State(state): State<Arc<BalancerState>>, request: Request) -> Response {
    match state.group.next_target() {
        Some(target) => forward(&state.client, &target, state.request_timeout, request).await,
        None => {
            warn!("No healthy targets for {}", request.uri());
            (StatusCode::SERVICE_UNAVAILABLE, "no healthy targets").into_response()
        }
    }
}

pub fn router(state: Arc<BalancerState>) -> Router {
    Router::new()
        .fallback(route_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the balancer listener
pub async fn serve(
    settings: &BalancerSettings,
    state: Arc<BalancerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, JoinHandle<Result<(), DeckhandError>>), DeckhandError> {
    let app = router(state);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DeckhandError::ServerError(format!("balancer bind {}: {}", addr, e)))?;
    let local_addr = listener.local_addr()?;
    info!("Balancer listening on {}", local_addr);

    let handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| DeckhandError::ServerError(e.to_string()))
    });

    Ok((local_addr, handle))
}
