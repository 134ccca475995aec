//! Event correlation for a single scan.
//!
//! Classifies console messages, dialogs and failed sub-resource loads and
//! records them on the owning scan's findings. Decides whether the payload
//! executed.
//!
//! This module does not touch the browser. The page layer delivers typed
//! events and the caller owns the findings it writes to.

use std::sync::Arc;

use crate::config::{AppConfig, ConsoleIgnoreEntry};
use crate::models::events::{ConsoleEvent, DialogEvent, PageEvent, RequestFailure};
use crate::models::scan::{ConsoleWarning, ResourceError, ScanFindings, XssEvidence};

const CONSOLE_ERROR: &str = "error";
const CONSOLE_WARNING: &str = "warning";

/// Process-wide correlation settings, shared read-only by every scan.
#[derive(Debug, Clone, Default)]
pub struct CorrelationRules {
    pub console_ignore_list: Vec<ConsoleIgnoreEntry>,
    pub resource_error_ignore_codes: Vec<String>,
    pub return_errors: bool,
    pub return_warnings: bool,
}

impl CorrelationRules {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            console_ignore_list: config.console_ignore_list.clone(),
            resource_error_ignore_codes: config.resource_error_ignore_codes.clone(),
            return_errors: config.return_errors,
            return_warnings: config.return_warnings,
        }
    }

    fn is_ignored(&self, event_type: &str, message: &str) -> bool {
        self.console_ignore_list
            .iter()
            .any(|e| e.event_type == event_type && e.console_message == message)
    }
}

/// What happened to a correlated event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// Matched the console ignore-list.
    Ignored,
    /// Console error; never evidence.
    Suppressed,
    /// Console warning; recorded only with warning reporting on.
    Warning { recorded: bool },
    /// Payload fired.
    Evidence,
    /// Event did not carry the marker.
    NoMatch,
    /// Failed sub-resource load.
    ResourceError { recorded: bool },
}

/// Per-scan correlator: the shared rules plus this scan's marker settings.
#[derive(Debug, Clone)]
pub struct EventCorrelator {
    rules: Arc<CorrelationRules>,
    search_string: String,
    alert_on_any_event: bool,
}

impl EventCorrelator {
    pub fn new(
        rules: Arc<CorrelationRules>,
        search_string: impl Into<String>,
        alert_on_any_event: bool,
    ) -> Self {
        Self {
            rules,
            search_string: search_string.into(),
            alert_on_any_event,
        }
    }

    /// Classify one event and record its effect on `findings`.
    pub fn correlate(&self, event: &PageEvent, findings: &mut ScanFindings) -> Correlation {
        match event {
            PageEvent::Console(console) => self.on_console(console, findings),
            PageEvent::Dialog(dialog) => self.on_dialog(dialog, findings),
            PageEvent::RequestFailure(failure) => self.on_request_failure(failure, findings),
        }
    }

    fn on_console(&self, event: &ConsoleEvent, findings: &mut ScanFindings) -> Correlation {
        if let Some(outcome) = self.pre_filter(&event.event_type, &event.text) {
            return outcome;
        }

        if event.event_type == CONSOLE_WARNING {
            if !self.rules.return_warnings {
                return Correlation::Warning { recorded: false };
            }
            let (url, line) = event
                .location
                .as_ref()
                .map(|loc| (loc.url.clone(), loc.line))
                .unwrap_or_default();
            findings.console_warnings.push(ConsoleWarning {
                url,
                line,
                warn_text: event.text.clone(),
            });
            return Correlation::Warning { recorded: true };
        }

        self.match_marker(&event.event_type, &event.text, findings)
    }

    fn on_dialog(&self, event: &DialogEvent, findings: &mut ScanFindings) -> Correlation {
        if let Some(outcome) = self.pre_filter(&event.dialog_type, &event.message) {
            return outcome;
        }
        self.match_marker(&event.dialog_type, &event.message, findings)
    }

    fn on_request_failure(
        &self,
        failure: &RequestFailure,
        findings: &mut ScanFindings,
    ) -> Correlation {
        let ignored_code = self
            .rules
            .resource_error_ignore_codes
            .iter()
            .any(|code| *code == failure.error_code);
        if !self.rules.return_errors || ignored_code {
            return Correlation::ResourceError { recorded: false };
        }

        findings.resource_errors.push(ResourceError {
            url: failure.url.clone(),
            error_code: failure.error_code.clone(),
            status_code: failure.status_code,
            status_text: failure.status_text.clone(),
        });
        Correlation::ResourceError { recorded: true }
    }

    /// Ignore-list first, then console errors.
    fn pre_filter(&self, event_type: &str, message: &str) -> Option<Correlation> {
        if self.rules.is_ignored(event_type, message) {
            return Some(Correlation::Ignored);
        }
        if event_type == CONSOLE_ERROR {
            return Some(Correlation::Suppressed);
        }
        None
    }

    fn match_marker(
        &self,
        event_type: &str,
        message: &str,
        findings: &mut ScanFindings,
    ) -> Correlation {
        if message != self.search_string && !self.alert_on_any_event {
            return Correlation::NoMatch;
        }

        findings.has_xss = true;
        findings.xss_data.push(XssEvidence {
            event_type: event_type.to_string(),
            event_msg: message.to_string(),
        });
        Correlation::Evidence
    }
}
