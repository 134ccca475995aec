//! Chromium backend over the DevTools protocol.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, FailRequestParams, HeaderEntry,
};
use chromiumoxide::cdp::browser_protocol::network::{
    self, ErrorReason, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
    EventResponseReceived, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
    DisposeBrowserContextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{EventConsoleApiCalled, RemoteObject};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::Page;
use futures::stream::{self, PollNext};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{BrowserBackend, ContextMode, NavigationResponse, PageHooks, ScanPage};
use crate::config::BrowserSettings;
use crate::errors::BrowserError;
use crate::models::events::{
    ConsoleEvent, DialogEvent, InterceptDecision, InterceptedRequest, PageEvent,
    RequestFailure, RequestOverride, SourceLocation,
};

const NAVIGATION_TIMING_JS: &str = "JSON.stringify(performance.getEntriesByType('navigation'))";

/// Network counts as idle with at most this many requests in flight...
const IDLE_MAX_INFLIGHT: usize = 2;
/// ...for this long.
const IDLE_WINDOW: Duration = Duration::from_millis(500);
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Chromium process plus its CDP handler loop.
pub struct ChromiumBackend {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
}

impl ChromiumBackend {
    pub async fn launch(settings: &BrowserSettings) -> Result<Self, BrowserError> {
        let mut builder = BrowserConfig::builder();
        if !settings.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &settings.executable {
            builder = builder.chrome_executable(path);
        }
        if settings.ignore_ssl_errors {
            builder = builder.arg("--ignore-certificate-errors");
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "CDP handler error");
                }
            }
            tracing::warn!("Browser connection closed");
        });

        Ok(Self {
            browser: Arc::new(browser),
            handler,
        })
    }

    async fn create_context(&self) -> Result<BrowserContextId, BrowserError> {
        let response = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| BrowserError::Context(e.to_string()))?;
        Ok(response.result.browser_context_id)
    }
}

impl Drop for ChromiumBackend {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl BrowserBackend for ChromiumBackend {
    async fn open_page(&self, mode: ContextMode) -> Result<Box<dyn ScanPage>, BrowserError> {
        let context_id = match mode {
            ContextMode::Isolated => Some(self.create_context().await?),
            ContextMode::Shared => None,
        };

        let mut params = CreateTargetParams::new("about:blank");
        params.browser_context_id = context_id.clone();

        let page = match self.browser.new_page(params).await {
            Ok(page) => page,
            Err(e) => {
                if let Some(id) = context_id {
                    dispose_context(&self.browser, id).await;
                }
                return Err(BrowserError::Page(e.to_string()));
            }
        };

        Ok(Box::new(ChromiumPage {
            page,
            browser: Arc::clone(&self.browser),
            context_id,
            network: Arc::default(),
            tasks: Vec::new(),
        }))
    }

    async fn version(&self) -> Result<String, BrowserError> {
        let version = self
            .browser
            .version()
            .await
            .map_err(|e| BrowserError::Page(e.to_string()))?;
        Ok(version.product)
    }
}

async fn dispose_context(browser: &Browser, id: BrowserContextId) {
    if let Err(e) = browser.execute(DisposeBrowserContextParams::new(id)).await {
        tracing::debug!(error = %e, "Unable to dispose browser context");
    }
}

// -- Page --

#[derive(Debug, Default)]
struct TrackedRequest {
    url: String,
    response: Option<(i64, String)>,
}

/// Requests in flight on one page, keyed by network request id.
#[derive(Debug, Default)]
struct NetworkState {
    inflight: HashMap<String, TrackedRequest>,
    navigation: Option<NavigationResponse>,
}

/// Tracks how long the page has stayed at or under `IDLE_MAX_INFLIGHT`.
#[derive(Debug, Clone, Copy)]
struct IdleWatch {
    quiet_since: Instant,
}

impl IdleWatch {
    fn new(now: Instant) -> Self {
        Self { quiet_since: now }
    }

    fn settled(&mut self, inflight: usize, now: Instant) -> bool {
        if inflight > IDLE_MAX_INFLIGHT {
            self.quiet_since = now;
            return false;
        }
        now.duration_since(self.quiet_since) >= IDLE_WINDOW
    }
}

struct ChromiumPage {
    page: Page,
    browser: Arc<Browser>,
    context_id: Option<BrowserContextId>,
    network: Arc<Mutex<NetworkState>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChromiumPage {
    fn network(&self) -> MutexGuard<'_, NetworkState> {
        lock(&self.network)
    }

    async fn listen<T>(&self) -> Result<EventStream<T>, BrowserError>
    where
        T: chromiumoxide::cdp::IntoEventKind,
    {
        self.page
            .event_listener::<T>()
            .await
            .map_err(|e| BrowserError::Page(e.to_string()))
    }

    /// Wait until at most `IDLE_MAX_INFLIGHT` requests are pending for `IDLE_WINDOW`.
    /// Returns `false` if `deadline` passes first.
    async fn wait_for_network_idle(&self, deadline: Instant) -> bool {
        let mut watch = IdleWatch::new(Instant::now());
        loop {
            let now = Instant::now();
            if watch.settled(self.network().inflight.len(), now) {
                return true;
            }
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    }
}

#[async_trait]
impl ScanPage for ChromiumPage {
    async fn set_user_agent(&self, user_agent: &str) -> Result<(), BrowserError> {
        self.page
            .execute(SetUserAgentOverrideParams::new(user_agent))
            .await
            .map_err(|e| BrowserError::Page(e.to_string()))?;
        Ok(())
    }

    async fn attach(&mut self, hooks: Arc<dyn PageHooks>) -> Result<(), BrowserError> {
        // Subscribe before enabling Fetch so no paused request is missed.
        let paused = self.listen::<EventRequestPaused>().await?;
        let dialogs = self.listen::<EventJavascriptDialogOpening>().await?;
        let console = self.listen::<EventConsoleApiCalled>().await?;
        let sent = self.listen::<EventRequestWillBeSent>().await?;
        let responses = self.listen::<EventResponseReceived>().await?;
        let finished = self.listen::<EventLoadingFinished>().await?;
        let failed = self.listen::<EventLoadingFailed>().await?;

        self.tasks.push(tokio::spawn(intercept_requests(
            self.page.clone(),
            paused,
            Arc::clone(&hooks),
        )));
        self.tasks.push(tokio::spawn(dismiss_dialogs(
            self.page.clone(),
            dialogs,
            Arc::clone(&hooks),
        )));
        self.tasks
            .push(tokio::spawn(forward_console(console, Arc::clone(&hooks))));
        self.tasks.push(tokio::spawn(track_network(
            NetworkStreams {
                sent,
                responses,
                finished,
                failed,
            },
            Arc::clone(&self.network),
            hooks,
        )));

        self.page
            .execute(network::EnableParams::default())
            .await
            .map_err(|e| BrowserError::Page(e.to_string()))?;
        self.page
            .execute(fetch::EnableParams::default())
            .await
            .map_err(|e| BrowserError::Page(e.to_string()))?;
        Ok(())
    }

    async fn navigate(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<NavigationResponse, BrowserError> {
        let deadline = Instant::now() + timeout;

        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Err(_) => return Err(BrowserError::NavigationTimeout(timeout)),
            Ok(Err(e)) => return Err(BrowserError::Navigation(e.to_string())),
            Ok(Ok(_)) => {}
        }

        if !self.wait_for_network_idle(deadline).await {
            tracing::debug!(url, inflight = self.network().inflight.len(), "Network never settled");
            return Err(BrowserError::NavigationTimeout(timeout));
        }
        Ok(self.network().navigation.clone().unwrap_or_default())
    }

    async fn navigation_timing(&self) -> Result<String, BrowserError> {
        self.page
            .evaluate(NAVIGATION_TIMING_JS)
            .await
            .map_err(|e| BrowserError::Evaluation(e.to_string()))?
            .into_value::<String>()
            .map_err(|e| BrowserError::Evaluation(e.to_string()))
    }

    async fn close(&self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Err(e) = self.page.clone().close().await {
            tracing::debug!(error = %e, "Unable to close page");
        }
        if let Some(id) = self.context_id.clone() {
            dispose_context(&self.browser, id).await;
        }
    }
}

fn lock(state: &Mutex<NetworkState>) -> MutexGuard<'_, NetworkState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// -- Event pumps --

async fn intercept_requests(
    page: Page,
    mut paused: EventStream<EventRequestPaused>,
    hooks: Arc<dyn PageHooks>,
) {
    while let Some(event) = paused.next().await {
        let request = intercepted_request(&event);
        let outcome = match hooks.on_request(&request) {
            InterceptDecision::Abort => page
                .execute(FailRequestParams::new(
                    event.request_id.clone(),
                    ErrorReason::BlockedByClient,
                ))
                .await
                .map(|_| ()),
            InterceptDecision::Continue(rewrite) => page
                .execute(continue_params(&event.request_id, rewrite))
                .await
                .map(|_| ()),
        };
        if let Err(e) = outcome {
            tracing::warn!(url = %request.url, error = %e, "Unable to resolve intercepted request");
        }
    }
}

fn intercepted_request(event: &EventRequestPaused) -> InterceptedRequest {
    let headers = event
        .request
        .headers
        .inner()
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(name, value)| {
                    let value = value
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| value.to_string());
                    (name.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default();

    InterceptedRequest {
        url: event.request.url.clone(),
        method: event.request.method.clone(),
        headers,
        is_navigation: event.resource_type == ResourceType::Document,
    }
}

fn continue_params(
    request_id: &fetch::RequestId,
    rewrite: Option<RequestOverride>,
) -> ContinueRequestParams {
    let mut params = ContinueRequestParams::new(request_id.clone());
    if let Some(rewrite) = rewrite {
        params.method = Some(rewrite.method);
        params.post_data = Some(BASE64.encode(rewrite.post_data).into());
        params.headers = Some(
            rewrite
                .headers
                .into_iter()
                .map(|(name, value)| HeaderEntry::new(name, value))
                .collect(),
        );
    }
    params
}

async fn dismiss_dialogs(
    page: Page,
    mut dialogs: EventStream<EventJavascriptDialogOpening>,
    hooks: Arc<dyn PageHooks>,
) {
    while let Some(dialog) = dialogs.next().await {
        if let Err(e) = page.execute(HandleJavaScriptDialogParams::new(false)).await {
            tracing::warn!(error = %e, "Unable to dismiss dialog");
        }
        hooks.on_event(PageEvent::Dialog(DialogEvent {
            dialog_type: dialog.r#type.as_ref().to_string(),
            message: dialog.message.clone(),
        }));
    }
}

async fn forward_console(mut console: EventStream<EventConsoleApiCalled>, hooks: Arc<dyn PageHooks>) {
    while let Some(call) = console.next().await {
        hooks.on_event(PageEvent::Console(console_event(&call)));
    }
}

fn console_event(call: &EventConsoleApiCalled) -> ConsoleEvent {
    let text = call
        .args
        .iter()
        .map(remote_object_text)
        .collect::<Vec<_>>()
        .join(" ");
    let location = call
        .stack_trace
        .as_ref()
        .and_then(|trace| trace.call_frames.first())
        .map(|frame| SourceLocation {
            url: frame.url.clone(),
            line: frame.line_number,
        });

    ConsoleEvent {
        event_type: call.r#type.as_ref().to_string(),
        text,
        location,
    }
}

fn remote_object_text(object: &RemoteObject) -> String {
    match &object.value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(value) => value.to_string(),
        None => object
            .description
            .clone()
            .unwrap_or_else(|| object.r#type.as_ref().to_string()),
    }
}

struct NetworkStreams {
    sent: EventStream<EventRequestWillBeSent>,
    responses: EventStream<EventResponseReceived>,
    finished: EventStream<EventLoadingFinished>,
    failed: EventStream<EventLoadingFailed>,
}

enum NetworkEvent {
    Sent(Arc<EventRequestWillBeSent>),
    Response(Arc<EventResponseReceived>),
    Finished(Arc<EventLoadingFinished>),
    Failed(Arc<EventLoadingFailed>),
}

async fn track_network(
    streams: NetworkStreams,
    state: Arc<Mutex<NetworkState>>,
    hooks: Arc<dyn PageHooks>,
) {
    let progress = stream::select(
        streams.sent.map(NetworkEvent::Sent),
        stream::select(
            streams.responses.map(NetworkEvent::Response),
            streams.finished.map(NetworkEvent::Finished),
        ),
    );
    // Drain request/response bookkeeping before looking at failures, so a
    // failure always finds its request.
    let mut events = Box::pin(stream::select_with_strategy(
        progress,
        streams.failed.map(NetworkEvent::Failed),
        |_: &mut ()| PollNext::Left,
    ));

    while let Some(event) = events.next().await {
        match event {
            NetworkEvent::Sent(sent) => {
                lock(&state).inflight.insert(
                    sent.request_id.inner().clone(),
                    TrackedRequest {
                        url: sent.request.url.clone(),
                        response: None,
                    },
                );
            }
            NetworkEvent::Response(received) => {
                let mut guard = lock(&state);
                let status = (received.response.status, received.response.status_text.clone());
                if received.r#type == ResourceType::Document && guard.navigation.is_none() {
                    guard.navigation = Some(NavigationResponse {
                        status_code: Some(status.0),
                        status_text: Some(status.1.clone()),
                    });
                }
                if let Some(tracked) = guard.inflight.get_mut(received.request_id.inner()) {
                    tracked.response = Some(status);
                }
            }
            NetworkEvent::Finished(done) => {
                lock(&state).inflight.remove(done.request_id.inner());
            }
            NetworkEvent::Failed(failed) => {
                let tracked = lock(&state)
                    .inflight
                    .remove(failed.request_id.inner())
                    .unwrap_or_default();
                let (status_code, status_text) = match tracked.response {
                    Some((code, text)) => (Some(code), Some(text)),
                    None => (None, None),
                };
                hooks.on_event(PageEvent::RequestFailure(RequestFailure {
                    url: tracked.url,
                    error_code: failed.error_text.clone(),
                    status_code,
                    status_text,
                }));
            }
        }
    }
}
