//! Liveness and metrics endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;

use crate::config::Configuration;

/// `OK <version>` while the process serves requests.
pub async fn healthcheck(State(config): State<Arc<Configuration>>) -> String {
    format!("OK {}", config.version())
}

/// Prometheus exposition of collected metrics.
pub async fn metrics(
    State(state): State<crate::AppState>,
) -> Result<String, StatusCode> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(StatusCode::NOT_FOUND)
}
