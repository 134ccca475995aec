//! Browser-automation boundary.
//!
//! The scanner only talks to the browser through these traits. The
//! production backend drives Chromium over CDP; tests plug in scripted pages.

pub mod chromium;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::BrowserSettings;
use crate::errors::BrowserError;
use crate::models::events::{InterceptDecision, InterceptedRequest, PageEvent};

pub use chromium::ChromiumBackend;

/// Which browsing context a scan page is created in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// Fresh incognito-equivalent context, disposed with the page.
    Isolated,
    /// The browser's default context; cookies and cache persist across scans.
    Shared,
}

/// Final HTTP status of the top-level navigation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationResponse {
    pub status_code: Option<i64>,
    pub status_text: Option<String>,
}

/// Callbacks a page invokes for the scan that owns it.
///
/// Both run to completion without suspending.
pub trait PageHooks: Send + Sync {
    /// Decide the fate of a paused request. Called once per request, in order.
    fn on_request(&self, request: &InterceptedRequest) -> InterceptDecision;

    /// Console message, dialog (already dismissed) or failed sub-resource load.
    fn on_event(&self, event: PageEvent);
}

/// Process-wide browser, used as a source of scan pages.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    async fn open_page(&self, mode: ContextMode) -> Result<Box<dyn ScanPage>, BrowserError>;

    /// Product/version string of the running browser.
    async fn version(&self) -> Result<String, BrowserError>;
}

/// A single page bound to one scan.
#[async_trait]
pub trait ScanPage: Send + Sync {
    async fn set_user_agent(&self, user_agent: &str) -> Result<(), BrowserError>;

    /// Install hooks and enable request interception. Must precede `navigate`.
    async fn attach(&mut self, hooks: Arc<dyn PageHooks>) -> Result<(), BrowserError>;

    /// Load `url` and wait for the network to settle, bounded by `timeout`.
    /// A page that has not settled when `timeout` runs out is a navigation timeout.
    async fn navigate(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<NavigationResponse, BrowserError>;

    /// JSON array of the page's navigation performance entries.
    async fn navigation_timing(&self) -> Result<String, BrowserError>;

    /// Close the page (and its private context). Late events are discarded.
    async fn close(&self);
}

/// Launch the shared browser process.
pub async fn launch(settings: &BrowserSettings) -> Result<Arc<dyn BrowserBackend>, BrowserError> {
    let backend = ChromiumBackend::launch(settings).await?;
    Ok(Arc::new(backend))
}
