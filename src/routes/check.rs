//! The scan endpoint.

use axum::{
    extract::{FromRequest, Request, State},
    http::{header, StatusCode},
    Form, Json,
};

use crate::errors::AppError;
use crate::models::scan::{CheckParams, ScanRecord};
use crate::AppState;

/// `/check` parameters from either a JSON or a form-encoded body.
#[derive(Debug)]
pub struct CheckRequest(pub CheckParams);

impl<S> FromRequest<S> for CheckRequest
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        let params = if is_json {
            let Json(params) = Json::<CheckParams>::from_request(req, state)
                .await
                .map_err(|e| AppError::Validation(e.body_text()))?;
            params
        } else {
            let Form(params) = Form::<CheckParams>::from_request(req, state)
                .await
                .map_err(|e| AppError::Validation(e.body_text()))?;
            params
        };
        Ok(Self(params))
    }
}

/// POST /check: scan a target and return the scan record.
pub async fn check(
    State(state): State<AppState>,
    CheckRequest(params): CheckRequest,
) -> Result<(StatusCode, Json<ScanRecord>), AppError> {
    let record = state.scanner.scan(params).await?;

    let status = if record.is_rejected() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    Ok((status, Json(record)))
}

/// GET /check: usage hint.
pub async fn info() -> &'static str {
    "Send a POST request to /check with checkUrl and queryString to scan for XSS."
}
