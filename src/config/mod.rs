use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::ConfigError;

/// Version string reported in the default user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Resource patterns that are never loaded (ads and trackers).
pub const DEFAULT_BLOCKLIST: &[&str] = &[
    "googletagmanager.com",
    "google-analytics.com",
    "optimizely.com",
    ".amazon-adsystem.com",
    "device-metrics-us.amazon.com",
    "crashlytics.com",
    "doubleclick.net",
];

/// Resource error codes that are never reported.
pub const DEFAULT_IGNORE_CODES: &[&str] = &["net::ERR_BLOCKED_BY_CLIENT.Inspector"];

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_TIMEOUT_SECS: u64 = 300;

/// A console event that is known to be benign and never reported.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleIgnoreEntry {
    pub event_type: String,
    pub console_message: String,
}

/// Browser launch options.
#[derive(Debug, Clone, Default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub executable: Option<String>,
    pub ignore_ssl_errors: bool,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub debug: bool,
    pub perf_mode: bool,
    pub return_errors: bool,
    pub return_warnings: bool,
    pub allow_cache: bool,
    pub user_agent: String,
    pub block_list: Vec<String>,
    pub resource_error_ignore_codes: Vec<String>,
    pub console_ignore_list: Vec<ConsoleIgnoreEntry>,
    pub browser: BrowserSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8099,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            debug: false,
            perf_mode: false,
            return_errors: false,
            return_warnings: false,
            allow_cache: false,
            user_agent: default_user_agent(),
            block_list: DEFAULT_BLOCKLIST.iter().map(|s| s.to_string()).collect(),
            resource_error_ignore_codes: DEFAULT_IGNORE_CODES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            console_ignore_list: Vec::new(),
            browser: BrowserSettings {
                headless: true,
                executable: None,
                ignore_ssl_errors: false,
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut block_list = defaults.block_list;
        block_list.extend(list_var("XSSCAN_BLOCK").unwrap_or_default());

        let console_ignore_list = match env::var("XSSCAN_CONSOLE_IGNORE") {
            Ok(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw).map_err(|source| {
                ConfigError::ConsoleIgnoreList {
                    var: "XSSCAN_CONSOLE_IGNORE",
                    source,
                }
            })?,
            _ => Vec::new(),
        };

        Ok(Self {
            host: env::var("XSSCAN_HOST").unwrap_or(defaults.host),
            port: env::var("XSSCAN_PORT")
                .ok()
                .and_then(|v| v.parse::<u16>().ok())
                .filter(|p| *p != 0)
                .unwrap_or(defaults.port),
            request_timeout_secs: env::var("XSSCAN_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|t| (1..=MAX_TIMEOUT_SECS).contains(t))
                .unwrap_or(defaults.request_timeout_secs),
            debug: flag_var("XSSCAN_DEBUG"),
            perf_mode: flag_var("XSSCAN_PERF"),
            return_errors: flag_var("XSSCAN_RETURN_ERRORS"),
            return_warnings: flag_var("XSSCAN_RETURN_WARNINGS"),
            allow_cache: flag_var("XSSCAN_CACHE"),
            user_agent: env::var("XSSCAN_USER_AGENT")
                .ok()
                .filter(|ua| !ua.trim().is_empty())
                .unwrap_or(defaults.user_agent),
            block_list,
            resource_error_ignore_codes: list_var("XSSCAN_IGNORE_CODES")
                .unwrap_or(defaults.resource_error_ignore_codes),
            console_ignore_list,
            browser: BrowserSettings {
                headless: !flag_var("XSSCAN_NO_HEADLESS"),
                executable: env::var("XSSCAN_BROWSER_PATH")
                    .ok()
                    .filter(|p| !p.trim().is_empty()),
                ignore_ssl_errors: flag_var("XSSCAN_IGNORE_SSL_ERRORS"),
            },
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_user_agent() -> String {
    format!(
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_6) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/85.0.4183.102 Safari/537.36 xsscan/{VERSION}"
    )
}

fn flag_var(name: &str) -> bool {
    env::var(name).map(|v| parse_flag(&v)).unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Comma-separated list; `None` when unset or empty.
fn list_var(name: &str) -> Option<Vec<String>> {
    let raw = env::var(name).ok()?;
    let items = split_list(&raw);
    (!items.is_empty()).then_some(items)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
