//! Rendered-page fetching through the scrape service
//!
//! Pages are never fetched directly: a local scrape service renders them past
//! anti-bot walls and is reached as `GET {endpoint}/scrape?url=<target>`,
//! optionally with a `proxy` parameter naming the upstream proxy to use. The
//! service is treated as opaque and possibly very slow, so every call is
//! raced against the adaptive timeout.

use crate::config::FetcherConfig;
use crate::proxy::ProxyAddr;
use crate::ShioriError;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Markers that mean the "rendered" page is still a bot challenge
const CHALLENGE_MARKERS: [&str; 6] = [
    "just a moment",
    "checking your browser",
    "cf-challenge",
    "__cf_chl",
    "ddos-guard",
    "captcha",
];

/// Client for the page-rendering scrape service
pub struct ScrapeClient {
    endpoint: Url,
    client: Client,
}

impl ScrapeClient {
    pub fn new(config: &FetcherConfig) -> crate::Result<Self> {
        let normalized = format!("{}/", config.endpoint.trim_end_matches('/'));
        let endpoint = Url::parse(&normalized)?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .build()?;

        Ok(Self { endpoint, client })
    }

    /// Fetches a rendered page, waiting at most `timeout`
    ///
    /// The wait is a give-up, not a kill: when the deadline passes the
    /// underlying request keeps running detached and its result is discarded.
    pub async fn fetch_page(
        &self,
        target: &str,
        proxy: Option<&ProxyAddr>,
        timeout: Duration,
    ) -> crate::Result<String> {
        let request_url = self.scrape_url(target, proxy)?;
        let client = self.client.clone();
        let target_owned = target.to_string();

        let handle = tokio::spawn(async move { fetch_body(client, request_url, target_owned).await });

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => {
                let body = result?;
                if looks_like_challenge(&body) {
                    return Err(ShioriError::AntiBot {
                        url: target.to_string(),
                    });
                }
                Ok(body)
            }
            Ok(Err(join_error)) => Err(ShioriError::Provider {
                message: format!("page fetch task failed: {}", join_error),
            }),
            Err(_) => {
                tracing::debug!("Gave up waiting for {} after {:?}", target, timeout);
                Err(ShioriError::Timeout {
                    url: target.to_string(),
                })
            }
        }
    }

    fn scrape_url(&self, target: &str, proxy: Option<&ProxyAddr>) -> crate::Result<Url> {
        let mut url = self.endpoint.join("scrape")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("url", target);
            if let Some(proxy) = proxy {
                pairs.append_pair("proxy", &proxy.to_proxy_url());
            }
        }
        Ok(url)
    }
}

async fn fetch_body(client: Client, request_url: Url, target: String) -> crate::Result<String> {
    let response = client
        .get(request_url)
        .send()
        .await
        .map_err(|source| ShioriError::Http {
            url: target.clone(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ShioriError::HttpStatus {
            url: target,
            status: status.as_u16(),
        });
    }

    match response.text().await {
        Ok(body) => Ok(body),
        Err(source) => Err(ShioriError::Http {
            url: target,
            source,
        }),
    }
}

/// Whether a 200 body is actually an interstitial challenge page
fn looks_like_challenge(body: &str) -> bool {
    // Challenge pages announce themselves early; skip lowercasing megabytes
    let head: String = body.chars().take(4096).collect::<String>().to_lowercase();
    CHALLENGE_MARKERS.iter().any(|marker| head.contains(marker))
}
