//! Whole-request timeout.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::errors::AppError;
use crate::AppState;

/// Bound the handler by the configured request timeout and answer 408 on expiry.
///
/// Dropping the handler future releases its scan page in the background.
pub async fn request_timeout(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    match tokio::time::timeout(state.config.request_timeout(), next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(
                path = %path,
                timeout_secs = state.config.request_timeout_secs,
                "Request timed out"
            );
            AppError::Timeout(state.config.request_timeout_secs).into_response()
        }
    }
}
