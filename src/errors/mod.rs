//! Unified error handling for configuration, the browser boundary and HTTP responses.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::models::scan::ScanPhase;

/// Status block of an error response, shaped like a scan record's `responseData`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStatus {
    pub status_code: u16,
    pub status_msg: String,
    pub error_msg: String,
}

/// JSON envelope for requests that never produced a scan record.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub response_data: ErrorStatus,
}

impl ErrorEnvelope {
    pub fn new(status: StatusCode, error_msg: impl Into<String>) -> Json<Self> {
        Json(Self {
            response_data: ErrorStatus {
                status_code: status.as_u16(),
                status_msg: status.canonical_reason().unwrap_or("Error").to_string(),
                error_msg: error_msg.into(),
            },
        })
    }
}

/// Invalid structured configuration detected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid console ignore list in {var}: {source}")]
    ConsoleIgnoreList {
        var: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid blocklist pattern: {0}")]
    BlocklistPattern(#[from] regex::Error),
}

/// Failures reported by the browser-automation layer.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Unable to start browser: {0}")]
    Launch(String),

    #[error("Unable to create browser context: {0}")]
    Context(String),

    #[error("Unable to prepare page: {0}")]
    Page(String),

    /// Raw navigation failure text (DNS, TLS, connection, ...).
    #[error("{0}")]
    Navigation(String),

    #[error("Navigation timeout of {} ms exceeded", .0.as_millis())]
    NavigationTimeout(Duration),

    #[error("Page evaluation failed: {0}")]
    Evaluation(String),
}

/// Request-level error type mapping to HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Request body could not be decoded at all.
    #[error("Invalid request body: {0}")]
    Validation(String),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: ScanPhase, to: ScanPhase },

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Timeout(_) => (StatusCode::REQUEST_TIMEOUT, self.to_string()),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::InvalidTransition { .. } => {
                tracing::error!(error = %self, "Scan state machine misuse");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Browser(e) => {
                tracing::error!(error = %e, "Browser error");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        (status, ErrorEnvelope::new(status, message)).into_response()
    }
}
