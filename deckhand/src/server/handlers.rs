//! HTTP request handlers

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::server::state::ServerState;
use crate::utils::unix_now;

/// Root handler: the application content
pub async fn root_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    format!("{} (v{})\n", state.greeting, state.version.version)
}

/// Liveness probe. No dependency checks: once startup is done it is 200.
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.readiness.is_ready() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
    pub uptime_secs: u64,
}

/// Version handler
pub async fn version_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(VersionResponse {
        version: state.version.version.clone(),
        git_hash: state.version.git_hash.clone(),
        build_time: state.version.build_time.clone(),
        uptime_secs: unix_now().saturating_sub(state.started_at),
    })
}
