//! Upstream proxy list source

use crate::proxy::ProxyAddr;
use crate::ShioriError;
use reqwest::Client;
use std::collections::HashSet;
use std::time::Duration;

/// Linear backoff step between source attempts, capped
const BACKOFF_STEP_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 5_000;

/// Fetches and parses the upstream proxy list
///
/// The source serves one `host:port` per line. Fetches are retried with a
/// capped linear backoff; an empty list counts as a failed attempt, since an
/// upstream serving nothing is indistinguishable from a broken one.
pub struct ProxySource {
    url: String,
    attempts: u32,
    client: Client,
}

impl ProxySource {
    pub fn new(url: &str, attempts: u32) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .gzip(true)
            .build()?;

        Ok(Self {
            url: url.to_string(),
            attempts: attempts.max(1),
            client,
        })
    }

    /// Fetches the proxy list, retrying up to the configured attempt budget
    pub async fn fetch(&self) -> crate::Result<Vec<ProxyAddr>> {
        let mut last_error = String::new();

        for attempt in 1..=self.attempts {
            match self.try_fetch().await {
                Ok(list) if !list.is_empty() => {
                    tracing::info!(
                        "Fetched {} proxies from source (attempt {})",
                        list.len(),
                        attempt
                    );
                    return Ok(list);
                }
                Ok(_) => {
                    last_error = "source returned an empty list".to_string();
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < self.attempts {
                let backoff =
                    Duration::from_millis((BACKOFF_STEP_MS * attempt as u64).min(BACKOFF_CAP_MS));
                tracing::debug!(
                    "Proxy source attempt {}/{} failed ({}), retrying in {:?}",
                    attempt,
                    self.attempts,
                    last_error,
                    backoff
                );
                tokio::time::sleep(backoff).await;
            }
        }

        Err(ShioriError::ProxySource {
            attempts: self.attempts,
            message: last_error,
        })
    }

    async fn try_fetch(&self) -> crate::Result<Vec<ProxyAddr>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|source| ShioriError::Http {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ShioriError::HttpStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|source| ShioriError::Http {
            url: self.url.clone(),
            source,
        })?;

        Ok(parse_proxy_list(&body))
    }
}

/// Parses a proxy list document: one address per line
///
/// Blank lines and `#` comments are skipped, unparseable lines dropped, and
/// duplicates removed while preserving first-seen order.
pub fn parse_proxy_list(body: &str) -> Vec<ProxyAddr> {
    let mut seen = HashSet::new();
    let mut list = Vec::new();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match ProxyAddr::parse(line) {
            Some(addr) => {
                if seen.insert(addr.clone()) {
                    list.push(addr);
                }
            }
            None => {
                tracing::debug!("Skipping unparseable proxy list line: {}", line);
            }
        }
    }

    list
}
