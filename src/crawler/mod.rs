//! Crawl engine
//!
//! This module contains the core crawling logic, including:
//! - Fetching rendered pages through the scrape service
//! - Enumerating works and their items from the content provider
//! - Downloading unit blobs into the output tree
//! - Item retries, batch reprocessing, and whole-session recovery cycles

mod download;
mod fetch;
mod provider;
mod retry;
mod session;

pub use download::HttpBlobDownloader;
pub use fetch::ScrapeClient;
pub use provider::{ManifestProvider, UnitRef, WorkManifest};
pub use retry::RetryPolicy;
pub use session::{CrawlSession, WorkPlan};

use crate::config::Config;
use crate::output::SessionReport;

/// Runs a complete crawl session
///
/// This is the main entry point for starting a crawl. It builds the
/// production services from the configuration and drives every configured
/// work to completion, recovery cycles included.
///
/// # Arguments
///
/// * `config` - The crawler configuration
///
/// # Returns
///
/// * `Ok(SessionReport)` - The session's final accounting
/// * `Err(ShioriError)` - The session could not be built or a journal write failed
///
/// # Example
///
/// ```no_run
/// use shiori::config::load_config;
/// use shiori::crawler::crawl;
/// use std::path::Path;
///
/// #[tokio::main]
/// async fn main() {
///     let config = load_config(Path::new("config.toml")).unwrap();
///     let report = crawl(config).await.unwrap();
///     println!("{} items crawled", report.total_crawled());
/// }
/// ```
pub async fn crawl(config: Config) -> crate::Result<SessionReport> {
    let session = CrawlSession::new(config)?;
    session.run().await
}
