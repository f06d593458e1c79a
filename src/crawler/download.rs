//! Unit blob downloads
//!
//! Unit images come straight from the CDN, optionally through a pool proxy.
//! Files are written to a `.part` sibling and renamed into place, so the
//! output directory never holds a half-written unit; leftover `.part` files
//! from an interrupted run are swept before an item is re-attempted.

use crate::journal::slug;
use crate::proxy::ProxyAddr;
use crate::crawler::UnitRef;
use crate::ShioriError;
use reqwest::Client;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Downloads unit blobs into the output tree
///
/// Keeps one HTTP client per upstream proxy, since reqwest fixes the proxy at
/// client build time.
pub struct HttpBlobDownloader {
    output_dir: PathBuf,
    clients: Mutex<HashMap<String, Client>>,
}

impl HttpBlobDownloader {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Directory an item's units are written under
    pub fn item_dir(&self, work: &str, item_number: &str) -> PathBuf {
        self.output_dir.join(slug(work)).join(slug(item_number))
    }

    /// Destination path for one unit, extension taken from its URL
    pub fn unit_path(&self, work: &str, item_number: &str, unit: &UnitRef) -> PathBuf {
        self.item_dir(work, item_number)
            .join(format!("{:03}.{}", unit.index, extension_for(&unit.url)))
    }

    /// Downloads one unit to `dest`, waiting at most `timeout`
    ///
    /// Same give-up semantics as page fetching: a late transfer keeps running
    /// detached and its bytes are discarded. Returns the byte count written.
    pub async fn download_unit(
        &self,
        unit: &UnitRef,
        dest: &Path,
        proxy: Option<&ProxyAddr>,
        timeout: Duration,
    ) -> crate::Result<u64> {
        let client = self.client_for(proxy)?;
        let url = unit.url.clone();

        let handle = tokio::spawn(async move { fetch_bytes(client, url).await });
        let bytes = match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_error)) => {
                return Err(ShioriError::Provider {
                    message: format!("download task failed: {}", join_error),
                })
            }
            Err(_) => {
                return Err(ShioriError::Timeout {
                    url: unit.url.clone(),
                })
            }
        };

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        // Same-directory temp file keeps the rename atomic on one volume
        let tmp = dest.with_extension("part");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, dest)?;

        Ok(bytes.len() as u64)
    }

    /// Removes leftover `.part` files under an item's directory
    pub fn sweep_orphans(&self, work: &str, item_number: &str) -> crate::Result<u32> {
        let dir = self.item_dir(work, item_number);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("part") {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(
                "Removed {} orphaned partial downloads from {}",
                removed,
                dir.display()
            );
        }
        Ok(removed)
    }

    fn client_for(&self, proxy: Option<&ProxyAddr>) -> crate::Result<Client> {
        let key = proxy.map(|p| p.to_proxy_url()).unwrap_or_default();

        {
            let clients = self.clients.lock().unwrap();
            if let Some(client) = clients.get(&key) {
                return Ok(client.clone());
            }
        }

        let mut builder = Client::builder().connect_timeout(Duration::from_secs(10));
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.to_proxy_url())?);
        }
        let client = builder.build()?;

        self.clients
            .lock()
            .unwrap()
            .insert(key, client.clone());
        Ok(client)
    }
}

async fn fetch_bytes(client: Client, url: String) -> crate::Result<Vec<u8>> {
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|source| ShioriError::Http {
            url: url.clone(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ShioriError::HttpStatus {
            url,
            status: status.as_u16(),
        });
    }

    match response.bytes().await {
        Ok(bytes) => Ok(bytes.to_vec()),
        Err(source) => Err(ShioriError::Http { url, source }),
    }
}

fn extension_for(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("https://cdn.example/p1.jpg"), "jpg");
        assert_eq!(extension_for("https://cdn.example/p1.PNG?sig=abc"), "png");
        assert_eq!(extension_for("https://cdn.example/p1"), "bin");
        assert_eq!(extension_for("https://cdn.example/a.b/p1"), "bin");
    }

    #[test]
    fn test_unit_path_layout() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = HttpBlobDownloader::new(dir.path());
        let unit = UnitRef {
            index: 4,
            url: "https://cdn.example/page5.webp".to_string(),
        };

        let path = downloader.unit_path("Solo Camping Club", "10.5", &unit);
        assert!(path.ends_with("solo-camping-club/10-5/004.webp"));
    }

    #[tokio::test]
    async fn test_download_writes_atomically() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/p1.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpegdata".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = HttpBlobDownloader::new(dir.path());
        let unit = UnitRef {
            index: 0,
            url: format!("{}/p1.jpg", server.uri()),
        };
        let dest = downloader.unit_path("Alpha", "1", &unit);

        let written = downloader
            .download_unit(&unit, &dest, None, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(written, 8);
        assert_eq!(fs::read(&dest).unwrap(), b"jpegdata");
        assert!(!dest.with_extension("part").exists());
    }

    #[tokio::test]
    async fn test_download_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/gone.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = HttpBlobDownloader::new(dir.path());
        let unit = UnitRef {
            index: 0,
            url: format!("{}/gone.jpg", server.uri()),
        };
        let dest = downloader.unit_path("Alpha", "1", &unit);

        let result = downloader
            .download_unit(&unit, &dest, None, Duration::from_secs(5))
            .await;
        assert!(matches!(
            result,
            Err(ShioriError::HttpStatus { status: 404, .. })
        ));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_sweep_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = HttpBlobDownloader::new(dir.path());

        let item_dir = downloader.item_dir("Alpha", "1");
        fs::create_dir_all(&item_dir).unwrap();
        fs::write(item_dir.join("000.part"), b"half").unwrap();
        fs::write(item_dir.join("001.jpg"), b"whole").unwrap();

        let removed = downloader.sweep_orphans("Alpha", "1").unwrap();
        assert_eq!(removed, 1);
        assert!(!item_dir.join("000.part").exists());
        assert!(item_dir.join("001.jpg").exists());

        // Sweeping a directory that never existed is fine
        assert_eq!(downloader.sweep_orphans("Ghost", "9").unwrap(), 0);
    }
}
