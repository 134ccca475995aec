//! One-shot rewrite of the probe (top-level) request.

use crate::models::events::{InterceptedRequest, RequestOverride};
use crate::models::scan::HttpMethod;

/// Content type of the POST probe body.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Builds the outbound method/body/headers for the first request of a scan.
///
/// `rewrite` consumes the rewriter, so it can produce at most one override.
#[derive(Debug, Clone)]
pub struct RequestRewriter {
    method: HttpMethod,
    payload: String,
}

impl RequestRewriter {
    /// `payload` must already have its leading delimiter stripped.
    pub fn new(method: HttpMethod, payload: impl Into<String>) -> Self {
        Self {
            method,
            payload: payload.into(),
        }
    }

    /// GET needs no rewrite: the navigation URL already carries the payload.
    pub fn rewrite(self, request: &InterceptedRequest) -> Option<RequestOverride> {
        match self.method {
            HttpMethod::Get => None,
            HttpMethod::Post => {
                let mut headers: Vec<(String, String)> = request
                    .headers
                    .iter()
                    .filter(|(name, _)| !name.eq_ignore_ascii_case("content-type"))
                    .cloned()
                    .collect();
                headers.push(("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string()));

                Some(RequestOverride {
                    method: HttpMethod::Post.as_str().to_string(),
                    post_data: self.payload,
                    headers,
                })
            }
        }
    }
}
