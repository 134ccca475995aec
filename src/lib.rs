pub mod browser;
pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use browser::BrowserBackend;
use services::scanner::Scanner;

/// Shared application state passed to all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: config::AppConfig,
    pub scanner: Arc<Scanner>,
    pub browser: Arc<dyn BrowserBackend>,
}

impl AppState {
    /// Build the state around an already-launched browser.
    pub fn new(
        config: config::AppConfig,
        browser: Arc<dyn BrowserBackend>,
    ) -> Result<Self, errors::ConfigError> {
        let scanner = Scanner::new(&config, Arc::clone(&browser))?;
        Ok(Self {
            config,
            scanner: Arc::new(scanner),
            browser,
        })
    }
}
