use serde::Deserialize;

/// Main configuration structure for Shiori
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawl: CrawlConfig,
    pub timeouts: TimeoutConfig,
    pub proxy: ProxyConfig,
    pub fetcher: FetcherConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub works: Vec<WorkEntry>,
}

/// Crawl behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// Maximum number of items fetched concurrently within one work
    #[serde(rename = "item-concurrency", default = "default_item_concurrency")]
    pub item_concurrency: u32,

    /// Maximum number of unit downloads in flight within one item
    #[serde(rename = "unit-concurrency", default = "default_unit_concurrency")]
    pub unit_concurrency: u32,

    /// Upper bound on whole-crawl recovery cycles
    #[serde(rename = "max-recovery-cycles", default = "default_max_recovery_cycles")]
    pub max_recovery_cycles: u32,

    /// Fetch attempts per item inside a normal crawl pass
    #[serde(rename = "item-attempts", default = "default_item_attempts")]
    pub item_attempts: u32,

    /// Fetch attempts per item inside a per-work batch reprocessing pass
    #[serde(rename = "batch-attempts", default = "default_batch_attempts")]
    pub batch_attempts: u32,

    /// Fetch attempts per item inside a recovery cycle
    #[serde(rename = "cycle-attempts", default = "default_cycle_attempts")]
    pub cycle_attempts: u32,
}

/// Base timeouts per operation kind
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// Base timeout for rendered page fetches (milliseconds)
    #[serde(rename = "page-fetch")]
    pub page_fetch: u64,

    /// Base timeout for unit blob downloads (milliseconds)
    #[serde(rename = "unit-download")]
    pub unit_download: u64,

    /// Base timeout for provider listing calls (milliseconds)
    #[serde(rename = "provider-call")]
    pub provider_call: u64,

    /// Hard ceiling no adaptive timeout may exceed (milliseconds)
    #[serde(rename = "max-timeout", default = "default_max_timeout")]
    pub max_timeout: u64,
}

/// Proxy pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Upstream proxy list source (one host:port per line)
    #[serde(rename = "source-url")]
    pub source_url: String,

    /// Fetch attempts against the list source before giving up
    #[serde(rename = "source-attempts", default = "default_source_attempts")]
    pub source_attempts: u32,

    /// How long a fetched proxy list stays fresh in the shared cache (seconds)
    #[serde(rename = "cache-ttl", default = "default_cache_ttl")]
    pub cache_ttl: u64,
}

/// Rendered-page fetch service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// Base URL of the scrape service that renders pages past anti-bot walls
    pub endpoint: String,
}

/// Storage paths configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding per-work crawl journals
    #[serde(rename = "journal-dir")]
    pub journal_dir: String,

    /// Path to the shared SQLite cache database
    #[serde(rename = "cache-path")]
    pub cache_path: String,

    /// Directory downloaded units are written under
    #[serde(rename = "output-dir")]
    pub output_dir: String,
}

/// A work to crawl, identified by its manifest
#[derive(Debug, Clone, Deserialize)]
pub struct WorkEntry {
    /// Stable identifier, used for journal keys and output directories
    pub id: String,

    /// URL of the work's JSON manifest
    pub manifest: String,

    /// Optional display title overriding the manifest's
    #[serde(default)]
    pub title: Option<String>,
}

fn default_item_concurrency() -> u32 {
    2
}

fn default_unit_concurrency() -> u32 {
    4
}

fn default_max_recovery_cycles() -> u32 {
    10
}

fn default_item_attempts() -> u32 {
    3
}

fn default_batch_attempts() -> u32 {
    2
}

fn default_cycle_attempts() -> u32 {
    2
}

fn default_max_timeout() -> u64 {
    180_000
}

fn default_source_attempts() -> u32 {
    15
}

fn default_cache_ttl() -> u64 {
    300
}
