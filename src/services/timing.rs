//! Navigation timing extraction.
//!
//! Converts the page's `PerformanceNavigationTiming` entry into derived
//! durations. Pure data transform; the page layer supplies the raw JSON.

use serde::Deserialize;

use crate::models::scan::PerformanceData;

/// Raw navigation timing entry (timestamps in ms relative to navigation start).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NavigationTiming {
    pub duration: f64,
    pub domain_lookup_start: f64,
    pub domain_lookup_end: f64,
    pub connect_start: f64,
    pub connect_end: f64,
    pub request_start: f64,
    pub response_start: f64,
    pub response_end: f64,
    pub dom_interactive: f64,
    pub dom_content_loaded_event_start: f64,
    pub dom_content_loaded_event_end: f64,
    pub dom_complete: f64,
}

/// Parse the JSON result of `performance.getEntriesByType('navigation')`.
///
/// Returns `Ok(None)` for an empty entry list.
pub fn parse_entries(json: &str) -> Result<Option<NavigationTiming>, serde_json::Error> {
    let entries: Vec<NavigationTiming> = serde_json::from_str(json)?;
    Ok(entries.into_iter().next())
}

/// Derive the eight durations. `None` input yields `None`.
pub fn extract(entry: Option<&NavigationTiming>) -> Option<PerformanceData> {
    let t = entry?;
    Some(PerformanceData {
        total_dur_time: non_negative(t.duration),
        dns_time: span(t.domain_lookup_start, t.domain_lookup_end),
        connect_time: span(t.connect_start, t.connect_end),
        ttfb_time: span(t.request_start, t.response_start),
        download_time: span(t.response_start, t.response_end),
        dom_int_time: span(t.response_end, t.dom_interactive),
        dom_content_time: span(
            t.dom_content_loaded_event_start,
            t.dom_content_loaded_event_end,
        ),
        dom_complete_time: span(t.dom_content_loaded_event_end, t.dom_complete),
    })
}

fn span(start: f64, end: f64) -> f64 {
    non_negative(end - start)
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
