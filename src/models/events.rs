//! Typed events and interception messages exchanged with the browser layer.

/// A `console.*` call made by the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleEvent {
    /// Console API type tag (`log`, `warning`, `error`, ...).
    pub event_type: String,
    pub text: String,
    /// Source location of the call, when the browser reports one.
    pub location: Option<SourceLocation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub url: String,
    pub line: i64,
}

/// A modal dialog opened by the page. Already dismissed by the browser layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogEvent {
    /// Dialog type tag (`alert`, `confirm`, `prompt`, `beforeunload`).
    pub dialog_type: String,
    pub message: String,
}

/// A sub-resource request that failed to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailure {
    pub url: String,
    pub error_code: String,
    /// Set only when a response was received before the failure.
    pub status_code: Option<i64>,
    pub status_text: Option<String>,
}

/// Every event the page reports back to the scan that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    Console(ConsoleEvent),
    Dialog(DialogEvent),
    RequestFailure(RequestFailure),
}

/// A network request paused before it leaves the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    /// True for top-level document loads.
    pub is_navigation: bool,
}

/// Replacement method/body/headers for the probe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOverride {
    pub method: String,
    pub post_data: String,
    pub headers: Vec<(String, String)>,
}

/// What to do with a paused request. Every request gets exactly one decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptDecision {
    Abort,
    Continue(Option<RequestOverride>),
}
