//! Health check endpoints for liveness and readiness probes.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

/// Readiness probe detail.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub browser: String,
}

/// Liveness probe: always returns OK if the process is running.
pub async fn live() -> &'static str {
    "OK"
}

/// Readiness probe: asks the shared browser for its version.
pub async fn ready(State(state): State<AppState>) -> Json<HealthStatus> {
    let (status, browser) = match state.browser.version().await {
        Ok(version) => ("ok", version),
        Err(e) => {
            tracing::warn!(error = %e, "Browser health check failed");
            ("degraded", format!("error: {e}"))
        }
    };

    Json(HealthStatus {
        status: status.to_string(),
        browser,
    })
}
