//! Scan request, scan record and the scan lifecycle graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker searched for in emitted events when the caller does not override it.
pub const DEFAULT_SEARCH_STRING: &str = "XSSed!";

// -- Inbound --

/// A boolean that may arrive as a JSON boolean or as a form string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Text(String),
}

impl FlagValue {
    /// Only a literal `"true"` (or JSON `true`) enables the flag.
    pub fn is_true(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Text(s) => s == "true",
        }
    }
}

/// Raw `/check` parameters as submitted by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckParams {
    pub check_url: Option<String>,
    pub query_string: Option<String>,
    pub search_string: Option<String>,
    pub alert_on_any_event: Option<FlagValue>,
    pub req_method: Option<String>,
}

/// HTTP method used for the top-level probe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    /// Parse a caller-supplied method (case-insensitive).
    ///
    /// Unsupported methods yield the tag `<METHOD>_NOT_SUPPORTED`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let upper = raw.trim().to_ascii_uppercase();
        match upper.as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            _ => Err(format!("{upper}_NOT_SUPPORTED")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

// -- Lifecycle --

/// Phases of a single scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanPhase {
    #[default]
    Admitted,
    Validated,
    PageOpening,
    Navigating,
    Evaluating,
    Finalized,
    Rejected,
}

impl ScanPhase {
    /// Check whether a phase change follows the scan lifecycle graph.
    pub fn can_advance(from: ScanPhase, to: ScanPhase) -> bool {
        matches!(
            (from, to),
            (ScanPhase::Admitted, ScanPhase::Validated)
                | (ScanPhase::Admitted, ScanPhase::Rejected)
                | (ScanPhase::Validated, ScanPhase::PageOpening)
                | (ScanPhase::PageOpening, ScanPhase::Navigating)
                | (ScanPhase::Navigating, ScanPhase::Evaluating)
                // Navigation failed
                | (ScanPhase::Navigating, ScanPhase::Finalized)
                | (ScanPhase::Evaluating, ScanPhase::Finalized)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanPhase::Finalized | ScanPhase::Rejected)
    }
}

// -- Record parts --

/// Echo of the (defaulted) request parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub alert_on_any_event: bool,
    pub check_url: Option<String>,
    pub query_string: Option<String>,
    pub req_method: String,
    pub search_string: String,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            alert_on_any_event: false,
            check_url: None,
            query_string: None,
            req_method: HttpMethod::Get.as_str().to_string(),
            search_string: DEFAULT_SEARCH_STRING.to_string(),
        }
    }
}

/// Outcome of the probe navigation. `status_code == 0` means "not yet run".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    pub status_code: i64,
    pub status_msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_time: Option<f64>,
}

/// An event whose content indicates the payload executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XssEvidence {
    pub event_type: String,
    pub event_msg: String,
}

/// A sub-resource that failed to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceError {
    pub url: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
}

/// A `console.warn` emitted by the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleWarning {
    pub url: String,
    pub line: i64,
    pub warn_text: String,
}

/// Durations (ms) derived from the navigation timing entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceData {
    pub total_dur_time: f64,
    pub dns_time: f64,
    pub connect_time: f64,
    pub ttfb_time: f64,
    pub download_time: f64,
    pub dom_int_time: f64,
    pub dom_content_time: f64,
    pub dom_complete_time: f64,
}

/// Everything the page hooks of one scan accumulate while the page is live.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanFindings {
    pub has_xss: bool,
    pub xss_data: Vec<XssEvidence>,
    pub blocked_urls: Vec<String>,
    pub resource_errors: Vec<ResourceError>,
    pub console_warnings: Vec<ConsoleWarning>,
}

// -- Scan record --

/// The unit of work and of event correlation; serialized as the `/check` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub request_id: String,
    pub check_time: DateTime<Utc>,
    pub has_xss: bool,
    pub request_data: ScanRequest,
    pub response_data: ScanResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_data: Option<PerformanceData>,
    pub xss_data: Vec<XssEvidence>,
    pub resource_errors: Vec<ResourceError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console_warnings: Option<Vec<ConsoleWarning>>,
    pub blocked_urls: Vec<String>,
    #[serde(skip)]
    pub phase: ScanPhase,
}

impl ScanRecord {
    pub fn new(request_id: String, check_time: DateTime<Utc>) -> Self {
        Self {
            request_id,
            check_time,
            has_xss: false,
            request_data: ScanRequest::default(),
            response_data: ScanResponse::default(),
            performance_data: None,
            xss_data: Vec::new(),
            resource_errors: Vec::new(),
            console_warnings: None,
            blocked_urls: Vec::new(),
            phase: ScanPhase::Admitted,
        }
    }

    /// Copy the hook results into the record.
    pub fn absorb(&mut self, findings: ScanFindings, include_warnings: bool) {
        self.has_xss = findings.has_xss;
        self.xss_data = findings.xss_data;
        self.blocked_urls = findings.blocked_urls;
        self.resource_errors = findings.resource_errors;
        self.console_warnings = include_warnings.then_some(findings.console_warnings);
    }

    pub fn is_rejected(&self) -> bool {
        self.phase == ScanPhase::Rejected
    }
}
