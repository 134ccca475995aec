//! Scan orchestration.
//!
//! Drives one scan through its lifecycle:
//! `Admitted -> Validated -> PageOpening -> Navigating -> Evaluating -> Finalized`,
//! with `Rejected` reachable from `Admitted` when the parameters are invalid.
//! Only validation failures are hard rejects. Navigation and evaluation
//! failures degrade to a partial record.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::browser::{BrowserBackend, ContextMode, PageHooks, ScanPage};
use crate::config::AppConfig;
use crate::errors::{AppError, BrowserError, ConfigError};
use crate::models::scan::{
    CheckParams, HttpMethod, ScanPhase, ScanRecord, ScanRequest, ScanResponse,
};
use crate::services::blocklist::Blocklist;
use crate::services::correlator::{CorrelationRules, EventCorrelator};
use crate::services::rewriter::RequestRewriter;
use crate::services::session::ScanSession;
use crate::services::{scan_id, timing};

/// Time kept back from the request timeout so a navigation that never
/// settles still ends in a partial record rather than a 408.
pub const NAVIGATION_HEADROOM: Duration = Duration::from_secs(2);

/// Error message returned for every rejected request.
pub const INVALID_PARAMS_MSG: &str = "Missing or invalid request parameters";

/// Why a request was rejected before touching the browser.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("request method {0}")]
    UnsupportedMethod(String),

    #[error("missing target URL")]
    MissingUrl,

    #[error("no payload and alertOnAnyEvent not set")]
    NoDetection,
}

/// A request that passed validation. Immutable from here on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedScan {
    pub target: String,
    /// Payload with its leading `?`/`&` stripped.
    pub payload: String,
    pub method: HttpMethod,
    pub search_string: String,
    pub alert_on_any_event: bool,
}

/// Capture the raw parameters into `request` (defaults already applied) and
/// validate them. The method is checked before any payload-derived field.
pub fn validate(params: &CheckParams, request: &mut ScanRequest) -> Result<ValidatedScan, Rejection> {
    request.check_url = params.check_url.clone();
    request.query_string = params.query_string.clone();
    if let Some(search) = params.search_string.as_deref().filter(|s| !s.is_empty()) {
        request.search_string = search.to_string();
    }
    request.alert_on_any_event = params
        .alert_on_any_event
        .as_ref()
        .is_some_and(|flag| flag.is_true());

    let method = match params.req_method.as_deref().filter(|m| !m.trim().is_empty()) {
        Some(raw) => match HttpMethod::parse(raw) {
            Ok(method) => method,
            Err(tag) => {
                request.req_method = tag.clone();
                return Err(Rejection::UnsupportedMethod(tag));
            }
        },
        None => HttpMethod::Get,
    };
    request.req_method = method.as_str().to_string();

    let target = request
        .check_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or(Rejection::MissingUrl)?;

    let payload = request
        .query_string
        .as_deref()
        .filter(|q| !q.is_empty());
    if payload.is_none() && !request.alert_on_any_event {
        return Err(Rejection::NoDetection);
    }

    Ok(ValidatedScan {
        target: target.to_string(),
        payload: strip_delimiter(payload.unwrap_or_default()).to_string(),
        method,
        search_string: request.search_string.clone(),
        alert_on_any_event: request.alert_on_any_event,
    })
}

/// Drop one leading `?` or `&`.
pub fn strip_delimiter(query: &str) -> &str {
    query
        .strip_prefix(|c: char| c == '?' || c == '&')
        .unwrap_or(query)
}

/// URL the page navigates to. GET carries the payload in the query string,
/// POST sends it in the body of the rewritten request.
pub fn probe_url(scan: &ValidatedScan) -> String {
    match scan.method {
        HttpMethod::Post => scan.target.clone(),
        HttpMethod::Get if scan.payload.is_empty() => scan.target.clone(),
        HttpMethod::Get => {
            let delimiter = if scan.target.contains('?') { '&' } else { '?' };
            format!("{}{}{}", scan.target, delimiter, scan.payload)
        }
    }
}

/// Navigation budget for a scan, measured from the moment it is admitted.
///
/// Never more than half of the request timeout is given up as headroom.
pub fn navigation_budget(request_timeout: Duration) -> Duration {
    request_timeout
        .saturating_sub(NAVIGATION_HEADROOM)
        .max(request_timeout / 2)
}

/// Settings the scanner reads for every scan.
#[derive(Debug, Clone)]
pub struct ScannerSettings {
    pub user_agent: String,
    pub navigation_budget: Duration,
    pub perf_mode: bool,
    pub return_warnings: bool,
    pub allow_cache: bool,
}

impl ScannerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            navigation_budget: navigation_budget(config.request_timeout()),
            perf_mode: config.perf_mode,
            return_warnings: config.return_warnings,
            allow_cache: config.allow_cache,
        }
    }
}

/// Runs scans against the shared browser.
pub struct Scanner {
    browser: Arc<dyn BrowserBackend>,
    blocklist: Arc<Blocklist>,
    rules: Arc<CorrelationRules>,
    settings: ScannerSettings,
}

impl Scanner {
    pub fn new(config: &AppConfig, browser: Arc<dyn BrowserBackend>) -> Result<Self, ConfigError> {
        let blocklist = Blocklist::new(&config.block_list)?;
        tracing::debug!(patterns = blocklist.len(), "Compiled resource blocklist");
        Ok(Self {
            browser,
            blocklist: Arc::new(blocklist),
            rules: Arc::new(CorrelationRules::from_config(config)),
            settings: ScannerSettings::from_config(config),
        })
    }

    /// Run one scan to completion.
    ///
    /// Rejected and navigation-failed scans are still `Ok` records; `Err` means
    /// no page could be prepared.
    pub async fn scan(&self, params: CheckParams) -> Result<ScanRecord, AppError> {
        let admitted = Instant::now();
        let check_time = Utc::now();
        let request_id = scan_id::compute(
            &check_time,
            params.check_url.as_deref().unwrap_or_default(),
            params.query_string.as_deref().unwrap_or_default(),
        );
        let mut record = ScanRecord::new(request_id, check_time);

        let scan = match validate(&params, &mut record.request_data) {
            Ok(scan) => scan,
            Err(reason) => {
                tracing::info!(request_id = %record.request_id, %reason, "Rejected scan request");
                advance(&mut record, ScanPhase::Rejected)?;
                record.response_data = ScanResponse {
                    status_code: 400,
                    status_msg: Some("Bad Request".to_string()),
                    error_msg: Some(INVALID_PARAMS_MSG.to_string()),
                    request_time: None,
                };
                return Ok(record);
            }
        };
        advance(&mut record, ScanPhase::Validated)?;

        advance(&mut record, ScanPhase::PageOpening)?;
        let session = Arc::new(ScanSession::new(
            record.request_id.clone(),
            Arc::clone(&self.blocklist),
            EventCorrelator::new(
                Arc::clone(&self.rules),
                scan.search_string.clone(),
                scan.alert_on_any_event,
            ),
            RequestRewriter::new(scan.method, scan.payload.clone()),
        ));
        let page = PageGuard::new(self.prepare_page(session.clone()).await?);

        advance(&mut record, ScanPhase::Navigating)?;
        let url = probe_url(&scan);
        tracing::info!(
            request_id = %record.request_id,
            url = %url,
            method = scan.method.as_str(),
            "Scanning target"
        );

        let remaining = self
            .settings
            .navigation_budget
            .saturating_sub(admitted.elapsed());
        match page.get().navigate(&url, remaining).await {
            Err(e) => {
                tracing::warn!(request_id = %record.request_id, error = %e, "Navigation failed");
                record.response_data.status_code = 400;
                record.response_data.status_msg = Some("Bad Request".to_string());
                record.response_data.error_msg = Some(e.to_string());
            }
            Ok(navigation) => {
                advance(&mut record, ScanPhase::Evaluating)?;
                if let Some(code) = navigation.status_code {
                    record.response_data.status_code = code;
                }
                record.response_data.status_msg = navigation.status_text;
                record.request_data.query_string = record
                    .request_data
                    .query_string
                    .as_deref()
                    .map(|q| strip_delimiter(q).to_string());
                self.read_timing(page.get(), &mut record).await;
            }
        }

        record.absorb(session.finish(), self.settings.return_warnings);
        advance(&mut record, ScanPhase::Finalized)?;
        debug_assert!(record.phase.is_terminal());
        tracing::info!(
            request_id = %record.request_id,
            has_xss = record.has_xss,
            blocked = record.blocked_urls.len(),
            "Scan finished"
        );

        Ok(record)
    }

    /// Open a page and register every hook before any navigation.
    async fn prepare_page(&self, hooks: Arc<dyn PageHooks>) -> Result<Box<dyn ScanPage>, BrowserError> {
        let mode = if self.settings.allow_cache {
            ContextMode::Shared
        } else {
            ContextMode::Isolated
        };
        let mut page = self.browser.open_page(mode).await?;

        if let Err(e) = page.set_user_agent(&self.settings.user_agent).await {
            tracing::warn!(error = %e, "Unable to set user agent");
        }
        if let Err(e) = page.attach(hooks).await {
            page.close().await;
            return Err(e);
        }
        Ok(page)
    }

    /// Best effort: any failure leaves the timing fields unset.
    async fn read_timing(&self, page: &dyn ScanPage, record: &mut ScanRecord) {
        let raw = match page.navigation_timing().await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(request_id = %record.request_id, error = %e, "Navigation timing unavailable");
                return;
            }
        };
        let entry = match timing::parse_entries(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(request_id = %record.request_id, error = %e, "Unparsable navigation timing");
                return;
            }
        };
        let Some(perf) = timing::extract(entry.as_ref()) else {
            return;
        };

        record.response_data.request_time = Some(perf.total_dur_time);
        if self.settings.perf_mode {
            record.performance_data = Some(perf);
        }
    }
}

fn advance(record: &mut ScanRecord, to: ScanPhase) -> Result<(), AppError> {
    let from = record.phase;
    if !ScanPhase::can_advance(from, to) {
        return Err(AppError::InvalidTransition { from, to });
    }
    tracing::debug!(request_id = %record.request_id, ?from, ?to, "Scan phase change");
    record.phase = to;
    Ok(())
}

/// Owns a scan page and closes it in the background when dropped, which
/// covers both a finished scan and a scan future cancelled by the request
/// timeout.
struct PageGuard(Arc<dyn ScanPage>);

impl PageGuard {
    fn new(page: Box<dyn ScanPage>) -> Self {
        Self(Arc::from(page))
    }

    fn get(&self) -> &dyn ScanPage {
        self.0.as_ref()
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let page = Arc::clone(&self.0);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { page.close().await });
            }
            Err(_) => tracing::warn!("No runtime available to close scan page"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::scan::FlagValue;
    use async_trait::async_trait;

    fn params(url: Option<&str>, query: Option<&str>) -> CheckParams {
        CheckParams {
            check_url: url.map(str::to_string),
            query_string: query.map(str::to_string),
            ..Default::default()
        }
    }

    /// Backend that must never be reached.
    struct NoBrowser;

    #[async_trait]
    impl BrowserBackend for NoBrowser {
        async fn open_page(&self, _mode: ContextMode) -> Result<Box<dyn ScanPage>, BrowserError> {
            panic!("rejected scans must not open a page");
        }

        async fn version(&self) -> Result<String, BrowserError> {
            Ok("none".to_string())
        }
    }

    fn scanner() -> Scanner {
        Scanner::new(&AppConfig::default(), Arc::new(NoBrowser)).unwrap()
    }

    #[test]
    fn validate_applies_defaults() {
        let mut request = ScanRequest::default();
        let scan = validate(&params(Some("https://target.test/"), Some("?q=1")), &mut request).unwrap();

        assert_eq!(scan.method, HttpMethod::Get);
        assert_eq!(scan.search_string, "XSSed!");
        assert_eq!(scan.payload, "q=1");
        assert!(!scan.alert_on_any_event);
        // Stored payload is only normalized after navigation.
        assert_eq!(request.query_string.as_deref(), Some("?q=1"));
    }

    #[test]
    fn validate_rejects_missing_url() {
        let mut request = ScanRequest::default();
        assert_eq!(
            validate(&params(None, Some("q=1")), &mut request),
            Err(Rejection::MissingUrl)
        );
        assert_eq!(
            validate(&params(Some("  "), Some("q=1")), &mut request),
            Err(Rejection::MissingUrl)
        );
    }

    #[test]
    fn validate_tags_unsupported_method() {
        let mut request = ScanRequest::default();
        let p = CheckParams {
            req_method: Some("put".to_string()),
            ..params(Some("https://target.test/"), Some("q=1"))
        };
        assert_eq!(
            validate(&p, &mut request),
            Err(Rejection::UnsupportedMethod("PUT_NOT_SUPPORTED".to_string()))
        );
        assert_eq!(request.req_method, "PUT_NOT_SUPPORTED");
    }

    #[test]
    fn validate_checks_method_before_payload() {
        let mut request = ScanRequest::default();
        let p = CheckParams {
            req_method: Some("PATCH".to_string()),
            ..params(Some("https://target.test/"), None)
        };
        assert_eq!(
            validate(&p, &mut request),
            Err(Rejection::UnsupportedMethod("PATCH_NOT_SUPPORTED".to_string()))
        );
    }

    #[test]
    fn validate_requires_payload_or_any_event() {
        let mut request = ScanRequest::default();
        assert_eq!(
            validate(&params(Some("https://target.test/"), None), &mut request),
            Err(Rejection::NoDetection)
        );

        let p = CheckParams {
            alert_on_any_event: Some(FlagValue::Text("true".to_string())),
            ..params(Some("https://target.test/"), None)
        };
        let scan = validate(&p, &mut request).unwrap();
        assert!(scan.alert_on_any_event);
        assert_eq!(scan.payload, "");
    }

    #[test]
    fn validate_overrides_search_string() {
        let mut request = ScanRequest::default();
        let p = CheckParams {
            search_string: Some("pwned".to_string()),
            req_method: Some("post".to_string()),
            ..params(Some("https://target.test/"), Some("q=1"))
        };
        let scan = validate(&p, &mut request).unwrap();
        assert_eq!(scan.search_string, "pwned");
        assert_eq!(request.search_string, "pwned");
        assert_eq!(request.req_method, "POST");
    }

    #[test]
    fn strip_delimiter_drops_one_char() {
        assert_eq!(strip_delimiter("?q=1"), "q=1");
        assert_eq!(strip_delimiter("&q=1"), "q=1");
        assert_eq!(strip_delimiter("q=1"), "q=1");
        assert_eq!(strip_delimiter("??q"), "?q");
    }

    fn validated(target: &str, payload: &str, method: HttpMethod) -> ValidatedScan {
        ValidatedScan {
            target: target.to_string(),
            payload: payload.to_string(),
            method,
            search_string: "XSSed!".to_string(),
            alert_on_any_event: false,
        }
    }

    #[test]
    fn probe_url_uses_question_mark_without_query() {
        let scan = validated("https://target.test/search", "q=1", HttpMethod::Get);
        assert_eq!(probe_url(&scan), "https://target.test/search?q=1");
    }

    #[test]
    fn probe_url_uses_ampersand_with_query() {
        let scan = validated("https://target.test/search?lang=en", "q=1", HttpMethod::Get);
        assert_eq!(probe_url(&scan), "https://target.test/search?lang=en&q=1");
    }

    #[test]
    fn probe_url_post_is_bare_target() {
        let scan = validated("https://target.test/search", "q=1", HttpMethod::Post);
        assert_eq!(probe_url(&scan), "https://target.test/search");
    }

    #[tokio::test]
    async fn rejected_scan_never_reaches_browser() {
        let record = scanner().scan(params(None, Some("q=1"))).await.unwrap();

        assert!(record.is_rejected());
        assert!(record.phase.is_terminal());
        assert_eq!(record.response_data.status_code, 400);
        assert_eq!(record.response_data.status_msg.as_deref(), Some("Bad Request"));
        assert_eq!(record.response_data.error_msg.as_deref(), Some(INVALID_PARAMS_MSG));
        assert!(!record.has_xss);
        assert!(record.blocked_urls.is_empty());
    }

    #[tokio::test]
    async fn put_scan_is_rejected_with_tag() {
        let p = CheckParams {
            req_method: Some("PUT".to_string()),
            ..params(Some("https://target.test/"), Some("q=1"))
        };
        let record = scanner().scan(p).await.unwrap();

        assert!(record.is_rejected());
        assert_eq!(record.request_data.req_method, "PUT_NOT_SUPPORTED");
    }

    /// Page that records the navigation budget it gets and whether it was closed.
    #[derive(Default)]
    struct Recorder {
        budget: std::sync::Mutex<Option<Duration>>,
        closed: std::sync::atomic::AtomicBool,
    }

    struct RecordingBrowser(Arc<Recorder>);

    struct RecordingPage(Arc<Recorder>);

    #[async_trait]
    impl BrowserBackend for RecordingBrowser {
        async fn open_page(&self, _mode: ContextMode) -> Result<Box<dyn ScanPage>, BrowserError> {
            Ok(Box::new(RecordingPage(Arc::clone(&self.0))))
        }

        async fn version(&self) -> Result<String, BrowserError> {
            Ok("recording".to_string())
        }
    }

    #[async_trait]
    impl ScanPage for RecordingPage {
        async fn set_user_agent(&self, _user_agent: &str) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn attach(&mut self, _hooks: Arc<dyn PageHooks>) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn navigate(
            &self,
            _url: &str,
            timeout: Duration,
        ) -> Result<crate::browser::NavigationResponse, BrowserError> {
            *self.0.budget.lock().unwrap() = Some(timeout);
            Ok(crate::browser::NavigationResponse {
                status_code: Some(200),
                status_text: Some("OK".to_string()),
            })
        }

        async fn navigation_timing(&self) -> Result<String, BrowserError> {
            Ok("[]".to_string())
        }

        async fn close(&self) {
            self.0.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn finished_scan_closes_page_within_budget() {
        let recorder = Arc::new(Recorder::default());
        let config = AppConfig::default();
        let scanner = Scanner::new(&config, Arc::new(RecordingBrowser(Arc::clone(&recorder)))).unwrap();

        let record = scanner
            .scan(params(Some("https://target.test/"), Some("q=1")))
            .await
            .unwrap();
        assert_eq!(record.phase, ScanPhase::Finalized);
        assert_eq!(record.response_data.status_code, 200);
        // Empty timing list: no request time.
        assert_eq!(record.response_data.request_time, None);

        let budget = recorder.budget.lock().unwrap().unwrap();
        assert!(budget <= navigation_budget(config.request_timeout()));
        assert!(budget < config.request_timeout());

        // Close runs on a spawned task.
        for _ in 0..10 {
            if recorder.closed.load(std::sync::atomic::Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(recorder.closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn navigation_budget_leaves_headroom() {
        assert_eq!(navigation_budget(Duration::from_secs(60)), Duration::from_secs(58));
        assert_eq!(navigation_budget(Duration::from_secs(3)), Duration::from_millis(1500));
        assert_eq!(navigation_budget(Duration::from_secs(1)), Duration::from_millis(500));
    }

    #[test]
    fn advance_rejects_illegal_transition() {
        let mut record = ScanRecord::new("id".to_string(), Utc::now());
        let err = advance(&mut record, ScanPhase::Evaluating).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        assert_eq!(record.phase, ScanPhase::Admitted);
    }
}
