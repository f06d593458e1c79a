//! Manifest-based content provider
//!
//! Works are described by a JSON manifest naming their items; each item has a
//! detail document next to the manifest listing its unit (page) URLs. Both
//! documents are fetched through the scrape service since the listing pages
//! sit behind the same anti-bot wall as the content.

use crate::config::WorkEntry;
use crate::crawler::ScrapeClient;
use crate::journal::Item;
use crate::proxy::ProxyAddr;
use crate::ShioriError;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// A downloadable unit (page image) of one item
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRef {
    /// Zero-based position within the item
    pub index: u32,
    pub url: String,
}

/// A work's manifest: identity plus the items it advertises
#[derive(Debug, Clone)]
pub struct WorkManifest {
    pub id: String,
    pub title: String,
    pub items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct ManifestDoc {
    id: String,
    title: String,
    #[serde(default)]
    items: Vec<ManifestItem>,
}

#[derive(Debug, Deserialize)]
struct ManifestItem {
    id: String,
    number: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemDetailDoc {
    #[serde(default)]
    units: Vec<String>,
}

/// Lists items and units for configured works
pub struct ManifestProvider {
    fetcher: Arc<ScrapeClient>,
}

impl ManifestProvider {
    pub fn new(fetcher: Arc<ScrapeClient>) -> Self {
        Self { fetcher }
    }

    /// Fetches and parses a work's manifest
    pub async fn manifest(
        &self,
        work: &WorkEntry,
        proxy: Option<&ProxyAddr>,
        timeout: Duration,
    ) -> crate::Result<WorkManifest> {
        let body = self
            .fetcher
            .fetch_page(&work.manifest, proxy, timeout)
            .await?;
        let doc: ManifestDoc = serde_json::from_str(&body)?;

        let items = doc
            .items
            .into_iter()
            .map(|item| Item {
                id: item.id,
                number: item.number,
                title: item.title,
            })
            .collect();

        Ok(WorkManifest {
            id: doc.id,
            title: doc.title,
            items,
        })
    }

    /// Fetches the unit URLs for one item
    ///
    /// An empty unit list on a 200 response is treated as an anti-bot block:
    /// sites that detect automation serve the page shell with the images
    /// stripped out.
    pub async fn list_units(
        &self,
        work: &WorkEntry,
        item: &Item,
        proxy: Option<&ProxyAddr>,
        timeout: Duration,
    ) -> crate::Result<Vec<UnitRef>> {
        let detail_url = item_detail_url(work, item)?;
        let body = self.fetcher.fetch_page(detail_url.as_str(), proxy, timeout).await?;
        let doc: ItemDetailDoc = serde_json::from_str(&body)?;

        if doc.units.is_empty() {
            return Err(ShioriError::NoUnits {
                work: work.id.clone(),
                item: item.number.clone(),
            });
        }

        Ok(doc
            .units
            .into_iter()
            .enumerate()
            .map(|(index, url)| UnitRef {
                index: index as u32,
                url,
            })
            .collect())
    }
}

/// Item detail documents live next to the manifest: `items/<item-id>.json`
fn item_detail_url(work: &WorkEntry, item: &Item) -> crate::Result<Url> {
    let manifest = Url::parse(&work.manifest)?;
    let detail = manifest.join(&format!("items/{}.json", item.id))?;
    Ok(detail)
}
