//! Per-scan hook state.
//!
//! A `ScanSession` is created for exactly one scan and handed to that scan's
//! page at registration time. Every request and event the page reports lands
//! here, so concurrent scans never share mutable state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::browser::PageHooks;
use crate::models::events::{InterceptDecision, InterceptedRequest, PageEvent};
use crate::models::scan::ScanFindings;
use crate::services::blocklist::{Blocklist, Verdict};
use crate::services::correlator::EventCorrelator;
use crate::services::rewriter::RequestRewriter;

#[derive(Debug, Default)]
struct SessionState {
    findings: ScanFindings,
    /// Set once the record is finalized; later events are discarded.
    sealed: bool,
}

pub struct ScanSession {
    scan_id: String,
    blocklist: Arc<Blocklist>,
    correlator: EventCorrelator,
    /// Consumed by the first top-level navigation request.
    rewriter: Mutex<Option<RequestRewriter>>,
    state: Mutex<SessionState>,
}

impl ScanSession {
    pub fn new(
        scan_id: impl Into<String>,
        blocklist: Arc<Blocklist>,
        correlator: EventCorrelator,
        rewriter: RequestRewriter,
    ) -> Self {
        Self {
            scan_id: scan_id.into(),
            blocklist,
            correlator,
            rewriter: Mutex::new(Some(rewriter)),
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Seal the session and hand over what the hooks collected.
    pub fn finish(&self) -> ScanFindings {
        let mut state = lock(&self.state);
        state.sealed = true;
        std::mem::take(&mut state.findings)
    }

    /// Snapshot without sealing.
    #[cfg(test)]
    pub fn findings(&self) -> ScanFindings {
        lock(&self.state).findings.clone()
    }
}

impl PageHooks for ScanSession {
    fn on_request(&self, request: &InterceptedRequest) -> InterceptDecision {
        // The rewrite is taken before the blocklist looks at the request, and
        // only ever once.
        let rewrite = if request.is_navigation {
            lock(&self.rewriter)
                .take()
                .and_then(|rewriter| rewriter.rewrite(request))
        } else {
            None
        };

        match self.blocklist.check(&request.url) {
            Verdict::Block => {
                tracing::debug!(
                    scan_id = %self.scan_id,
                    url = %request.url,
                    "Blocklisted resource, not loading"
                );
                let mut state = lock(&self.state);
                if !state.sealed {
                    state.findings.blocked_urls.push(request.url.clone());
                }
                InterceptDecision::Abort
            }
            Verdict::Allow => InterceptDecision::Continue(rewrite),
        }
    }

    fn on_event(&self, event: PageEvent) {
        let mut state = lock(&self.state);
        if state.sealed {
            return;
        }
        let outcome = self.correlator.correlate(&event, &mut state.findings);
        tracing::debug!(scan_id = %self.scan_id, ?outcome, ?event, "Correlated page event");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_BLOCKLIST;
    use crate::models::events::DialogEvent;
    use crate::models::scan::HttpMethod;
    use crate::services::correlator::CorrelationRules;

    fn session(method: HttpMethod) -> ScanSession {
        ScanSession::new(
            "scan-1",
            Arc::new(Blocklist::new(DEFAULT_BLOCKLIST).unwrap()),
            EventCorrelator::new(Arc::new(CorrelationRules::default()), "XSSed!", false),
            RequestRewriter::new(method, "q=1"),
        )
    }

    fn request(url: &str) -> InterceptedRequest {
        InterceptedRequest {
            url: url.to_string(),
            method: "GET".to_string(),
            headers: Vec::new(),
            is_navigation: false,
        }
    }

    fn navigation(url: &str) -> InterceptedRequest {
        InterceptedRequest {
            is_navigation: true,
            ..request(url)
        }
    }

    fn alert(message: &str) -> PageEvent {
        PageEvent::Dialog(DialogEvent {
            dialog_type: "alert".to_string(),
            message: message.to_string(),
        })
    }

    #[test]
    fn post_rewrite_applies_to_first_navigation_only() {
        let s = session(HttpMethod::Post);

        let first = s.on_request(&navigation("https://target.test/"));
        match first {
            InterceptDecision::Continue(Some(ovr)) => assert_eq!(ovr.post_data, "q=1"),
            other => panic!("expected rewritten continue, got {other:?}"),
        }

        let second = s.on_request(&request("https://target.test/app.js"));
        assert_eq!(second, InterceptDecision::Continue(None));

        // A later redirect hop is a navigation too, but the rewrite is spent.
        let third = s.on_request(&navigation("https://target.test/home"));
        assert_eq!(third, InterceptDecision::Continue(None));
    }

    #[test]
    fn subresource_before_navigation_keeps_rewrite_pending() {
        let s = session(HttpMethod::Post);

        assert_eq!(
            s.on_request(&request("https://target.test/sw.js")),
            InterceptDecision::Continue(None)
        );
        assert!(matches!(
            s.on_request(&navigation("https://target.test/")),
            InterceptDecision::Continue(Some(_))
        ));
    }

    #[test]
    fn blocked_first_navigation_consumes_rewrite() {
        let s = session(HttpMethod::Post);

        assert_eq!(
            s.on_request(&navigation("https://stats.doubleclick.net/x")),
            InterceptDecision::Abort
        );
        assert_eq!(
            s.on_request(&navigation("https://target.test/")),
            InterceptDecision::Continue(None)
        );
    }

    #[test]
    fn blocked_urls_are_recorded_in_order() {
        let s = session(HttpMethod::Get);
        s.on_request(&request("https://target.test/"));
        s.on_request(&request("https://www.googletagmanager.com/gtm.js"));
        s.on_request(&request("https://stats.doubleclick.net/x"));

        assert_eq!(
            s.findings().blocked_urls,
            vec![
                "https://www.googletagmanager.com/gtm.js".to_string(),
                "https://stats.doubleclick.net/x".to_string(),
            ]
        );
    }

    #[test]
    fn events_land_in_findings() {
        let s = session(HttpMethod::Get);
        s.on_event(alert("XSSed!"));

        let findings = s.finish();
        assert!(findings.has_xss);
        assert_eq!(findings.xss_data.len(), 1);
    }

    #[test]
    fn events_after_finish_are_discarded() {
        let s = session(HttpMethod::Get);
        let findings = s.finish();
        assert!(!findings.has_xss);

        s.on_event(alert("XSSed!"));
        // Still aborted, but no longer recorded.
        assert_eq!(
            s.on_request(&request("https://stats.doubleclick.net/x")),
            InterceptDecision::Abort
        );
        assert_eq!(s.findings(), ScanFindings::default());
    }
}
