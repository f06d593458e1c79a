//! Shiori: a convergent crawl orchestrator for chaptered content sites
//!
//! This crate drives long-running chapter/page crawls to completion under
//! adversarial conditions: anti-bot challenges, flaky proxies, rate limiting,
//! and partial failures. Completed work is never re-fetched, failed work is
//! never lost, and recovery escalates through item retries, per-work batch
//! passes, and bounded whole-crawl cycles until the crawl converges or stops
//! making progress.

pub mod cache;
pub mod config;
pub mod crawler;
pub mod journal;
pub mod output;
pub mod proxy;
pub mod timeout;

use thiserror::Error;

/// Main error type for Shiori operations
#[derive(Debug, Error)]
pub enum ShioriError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Journal error: {0}")]
    Journal(#[from] journal::JournalError),

    #[error("Cache error: {0}")]
    Cache(#[from] cache::CacheError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Anti-bot challenge detected at {url}")]
    AntiBot { url: String },

    #[error("Proxy list source failed after {attempts} attempts: {message}")]
    ProxySource { attempts: u32, message: String },

    #[error("No downloadable units for item {item} of {work}")]
    NoUnits { work: String, item: String },

    #[error("Content provider error: {message}")]
    Provider { message: String },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Shiori operations
pub type Result<T> = std::result::Result<T, ShioriError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// The closed taxonomy of crawl failures
///
/// Every failure observed during a crawl is classified into exactly one of
/// these kinds. The kind decides how the timeout controller escalates, whether
/// the proxy pool is charged for the failure, and which extra delay the retry
/// layers insert before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connectivity failure: DNS, socket, reset connections, dead CDN edges
    Network,
    /// An anti-bot challenge or block, including empty-content "successes"
    AntiBot,
    /// The operation exceeded its adaptive deadline
    Timeout,
    /// Proxy-attributable failure (connection refused, HTTP 402/403, gateway errors)
    Proxy,
    /// HTTP 429 or an explicit rate-limit signal
    RateLimit,
    /// Anything that matched no known pattern
    Unknown,
}

impl ErrorKind {
    /// Classifies a crawl error into the taxonomy
    ///
    /// Typed variants classify directly; everything else falls back to
    /// status-code and message-substring matching.
    pub fn of(error: &ShioriError) -> Self {
        match error {
            ShioriError::AntiBot { .. } | ShioriError::NoUnits { .. } => Self::AntiBot,
            ShioriError::Timeout { .. } => Self::Timeout,
            ShioriError::ProxySource { .. } => Self::Proxy,
            ShioriError::HttpStatus { status, .. } => Self::from_status(*status),
            ShioriError::Http { source, .. } => Self::from_reqwest(source),
            ShioriError::Reqwest(source) => Self::from_reqwest(source),
            other => Self::from_message(&other.to_string()),
        }
    }

    /// Classifies a bare HTTP status code
    pub fn from_status(status: u16) -> Self {
        match status {
            402 | 403 => Self::Proxy,
            429 => Self::RateLimit,
            // Stale CDN edges surface as 404; a different proxy usually resolves it
            404 => Self::Network,
            // Challenge interstitials ship as 503; gateway errors are the proxy's fault
            503 => Self::AntiBot,
            502 | 504 => Self::Proxy,
            _ => Self::Unknown,
        }
    }

    fn from_reqwest(source: &reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout
        } else if source.is_connect() {
            Self::Network
        } else {
            Self::from_message(&source.to_string())
        }
    }

    /// Classifies a failure message by known substrings
    ///
    /// Matching order is most-specific first; the default is `Unknown`.
    pub fn from_message(message: &str) -> Self {
        let m = message.to_lowercase();

        if m.contains("cloudflare")
            || m.contains("captcha")
            || m.contains("challenge")
            || m.contains("just a moment")
            || m.contains("cf-chl")
            || m.contains("anti-bot")
        {
            Self::AntiBot
        } else if m.contains("429") || m.contains("rate limit") || m.contains("too many requests")
        {
            Self::RateLimit
        } else if m.contains("proxy")
            || m.contains("connection refused")
            || m.contains("tunnel")
            || m.contains("402")
            || m.contains("403")
        {
            Self::Proxy
        } else if m.contains("timed out") || m.contains("timeout") {
            Self::Timeout
        } else if m.contains("dns")
            || m.contains("socket")
            || m.contains("connection reset")
            || m.contains("broken pipe")
            || m.contains("unreachable")
            || m.contains("network")
            || m.contains("404")
        {
            Self::Network
        } else {
            Self::Unknown
        }
    }

    /// Returns true if the proxy pool should be charged for this failure
    ///
    /// Anti-bot and rate-limit failures are the target site's reaction, not
    /// the proxy's fault, so they are excluded.
    pub fn is_proxy_attributable(&self) -> bool {
        matches!(self, Self::Proxy | Self::Network | Self::Timeout)
    }

    /// Stable string form, used in logs and histories
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::AntiBot => "anti-bot",
            Self::Timeout => "timeout",
            Self::Proxy => "proxy",
            Self::RateLimit => "rate-limit",
            Self::Unknown => "unknown",
        }
    }

    /// Returns all kinds in the taxonomy
    pub fn all() -> [Self; 6] {
        [
            Self::Network,
            Self::AntiBot,
            Self::Timeout,
            Self::Proxy,
            Self::RateLimit,
            Self::Unknown,
        ]
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlSession, HttpBlobDownloader, ManifestProvider, ScrapeClient};
pub use journal::{CrawlLog, Item, ItemRecord, ItemStatus, WorkJournal};
pub use output::SessionReport;
pub use proxy::{PoolHealth, PoolMetrics, ProxyAddr, ProxyPool};
pub use timeout::{OperationKind, TimeoutController};
