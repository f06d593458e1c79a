//! Integration tests for the crawl session
//!
//! These tests use wiremock to stand in for every upstream at once: the
//! proxy list source, the scrape service, and (by accepting proxied
//! requests in absolute form) the unit CDN itself. The mock server lists
//! its own address as the only proxy, so crawl traffic really does flow
//! through the selected proxy. Sessions run end-to-end against temporary
//! journal, cache, and output directories.

mod recovery_tests;
mod session_tests;

use serde_json::json;
use shiori::config::{
    Config, CrawlConfig, FetcherConfig, ProxyConfig, StorageConfig, TimeoutConfig, WorkEntry,
};
use shiori::crawler::CrawlSession;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Manifest URL of the standard test work; only ever fetched through the
/// scrape service, so the host does not resolve anywhere
pub const MANIFEST_URL: &str = "http://provider.test/works/alpha.json";

/// One mock server playing proxy source, scrape service, and CDN
pub struct Stage {
    pub server: MockServer,
    pub dirs: TempDir,
}

impl Stage {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let dirs = tempfile::tempdir().expect("Failed to create temp dirs");

        // The server lists itself as the only proxy
        Mock::given(method("GET"))
            .and(path("/proxies.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(format!("{}\n", server.address())),
            )
            .mount(&server)
            .await;

        Self { server, dirs }
    }

    /// Builds a config with fast retry budgets suited to tests
    pub fn config(&self, works: Vec<WorkEntry>) -> Config {
        let root = self.dirs.path();
        Config {
            crawl: CrawlConfig {
                item_concurrency: 2,
                unit_concurrency: 2,
                max_recovery_cycles: 2,
                item_attempts: 2,
                batch_attempts: 1,
                cycle_attempts: 1,
            },
            timeouts: TimeoutConfig {
                page_fetch: 5_000,
                unit_download: 5_000,
                provider_call: 5_000,
                max_timeout: 60_000,
            },
            proxy: ProxyConfig {
                source_url: format!("{}/proxies.txt", self.server.uri()),
                source_attempts: 2,
                cache_ttl: 300,
            },
            fetcher: FetcherConfig {
                endpoint: self.server.uri(),
            },
            storage: StorageConfig {
                journal_dir: root.join("journals").to_string_lossy().to_string(),
                cache_path: root.join("cache.db").to_string_lossy().to_string(),
                output_dir: root.join("output").to_string_lossy().to_string(),
            },
            works,
        }
    }

    pub fn session(&self, works: Vec<WorkEntry>) -> CrawlSession {
        CrawlSession::new(self.config(works)).expect("Failed to build session")
    }

    /// Serves `body` for scrape requests targeting `target`
    pub async fn mount_page(&self, target: &str, body: String) {
        Mock::given(method("GET"))
            .and(path("/scrape"))
            .and(query_param("url", target))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Serves a blob at `blob_path`, reached through the proxied CDN fetch
    pub async fn mount_blob(&self, blob_path: &str, bytes: &[u8]) {
        Mock::given(method("GET"))
            .and(path(blob_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.to_vec()))
            .mount(&self.server)
            .await;
    }
}

/// The standard test work; no config title, so the manifest's title decides
/// the journal and output names
pub fn work_entry() -> WorkEntry {
    WorkEntry {
        id: "alpha".to_string(),
        manifest: MANIFEST_URL.to_string(),
        title: None,
    }
}

/// Manifest JSON for the standard work with the given `(id, number)` items
pub fn manifest_json(items: &[(&str, &str)]) -> String {
    json!({
        "id": "alpha",
        "title": "Alpha",
        "items": items
            .iter()
            .map(|(id, number)| json!({ "id": id, "number": number }))
            .collect::<Vec<_>>(),
    })
    .to_string()
}

/// Where the provider serves an item's detail document
pub fn detail_url(item_id: &str) -> String {
    format!("http://provider.test/works/items/{}.json", item_id)
}

/// Item detail JSON listing the given unit URLs
pub fn detail_json(units: &[&str]) -> String {
    json!({ "units": units }).to_string()
}
