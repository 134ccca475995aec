//! Route definitions for the scan API.

pub mod check;
pub mod health;

use axum::{middleware, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::map_request_body::MapRequestBodyLayer;
use tower_http::map_response_body::MapResponseBodyLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::timeout::request_timeout;
use crate::AppState;

/// Request bodies larger than this are refused before parsing.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the full router. Shared by `main` and the integration tests.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let service_builder = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(MapResponseBodyLayer::new(axum::body::Body::new))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(MapRequestBodyLayer::new(axum::body::Body::new))
        .layer(middleware::from_fn_with_state(state.clone(), request_timeout));

    Router::new()
        .route("/check", get(check::info).post(check::check))
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .layer(service_builder)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::browser::{BrowserBackend, ContextMode, ScanPage};
    use crate::config::AppConfig;
    use crate::errors::BrowserError;

    struct DownBrowser;

    #[async_trait]
    impl BrowserBackend for DownBrowser {
        async fn open_page(&self, _mode: ContextMode) -> Result<Box<dyn ScanPage>, BrowserError> {
            Err(BrowserError::Page("browser is down".to_string()))
        }

        async fn version(&self) -> Result<String, BrowserError> {
            Err(BrowserError::Launch("browser is down".to_string()))
        }
    }

    fn app() -> Router {
        create_router(AppState::new(AppConfig::default(), Arc::new(DownBrowser)).unwrap())
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn readiness_reports_browser_failure() {
        let response = app()
            .oneshot(Request::get("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "degraded");
        assert!(body["browser"].as_str().unwrap().starts_with("error:"));
    }

    #[tokio::test]
    async fn page_failure_is_a_500_envelope() {
        let request = Request::post("/check")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"checkUrl":"https://target.test/","queryString":"q=1"}"#))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["responseData"]["statusCode"], 500);
        assert_eq!(
            body["responseData"]["errorMsg"],
            "Unable to prepare page: browser is down"
        );
    }

    #[tokio::test]
    async fn oversized_body_is_refused() {
        let request = Request::post("/check")
            .header("content-type", "application/x-www-form-urlencoded")
            .header("content-length", MAX_BODY_BYTES + 1)
            .body(Body::from(vec![b'a'; MAX_BODY_BYTES + 1]))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
