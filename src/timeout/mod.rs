//! Adaptive timeout module
//!
//! Deadlines for crawl operations are not fixed: they grow with recovery
//! cycles, with the kinds of errors seen recently, with pool degradation, and
//! with observed slowness. This module keeps bounded per-operation histories
//! and derives the current deadline from them. It also owns rate-limit
//! pacing, tracking recent HTTP 429 hits and handing back the preventive
//! delay to sleep before the next request.

mod controller;
mod history;

pub use controller::TimeoutController;
pub use history::OperationHistory;

/// The kinds of crawl operations with independently tracked deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Fetching a rendered item page through the scrape service
    PageFetch,
    /// Downloading one unit blob
    UnitDownload,
    /// Provider listing and metadata calls
    ProviderCall,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PageFetch => "page-fetch",
            Self::UnitDownload => "unit-download",
            Self::ProviderCall => "provider-call",
        }
    }

    pub fn all() -> [Self; 3] {
        [Self::PageFetch, Self::UnitDownload, Self::ProviderCall]
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
