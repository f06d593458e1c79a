//! Proxy pool module
//!
//! Maintains a health-scored pool of HTTP proxies for crawl traffic:
//! - Lazy population from an upstream list source, cached across runs
//! - Score-based selection (smoothed latency plus an error penalty)
//! - Ban gates with cooldowns for repeatedly failing proxies
//! - Graceful degradation when every proxy has been banned
//! - Pool health metrics, pushed into the timeout controller on every change

mod endpoint;
mod metrics;
mod pool;
mod source;

pub use endpoint::{ProxyEndpoint, BAN_COOLDOWN_SECS, BAN_ERROR_THRESHOLD};
pub use metrics::{PoolHealth, PoolMetrics};
pub use pool::ProxyPool;
pub use source::{parse_proxy_list, ProxySource};

use serde::{Deserialize, Serialize};

/// The address of one proxy, as handed to the HTTP client
///
/// Stored in `host:port` form, optionally carrying an explicit scheme when
/// the upstream list provided one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxyAddr(String);

impl ProxyAddr {
    /// Parses a single proxy list line into an address
    ///
    /// Accepts `host:port` with an optional `http://`, `https://` or
    /// `socks5://` prefix. Returns `None` for anything else.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();

        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) if matches!(scheme, "http" | "https" | "socks5") => {
                (Some(scheme), rest)
            }
            Some(_) => return None,
            None => (None, trimmed),
        };

        let rest = rest.trim_end_matches('/');
        let (host, port) = rest.rsplit_once(':')?;
        if host.is_empty() || host.contains('/') || host.contains(char::is_whitespace) {
            return None;
        }
        let port: u16 = port.parse().ok()?;
        if port == 0 {
            return None;
        }

        match scheme {
            Some(scheme) => Some(Self(format!("{}://{}:{}", scheme, host, port))),
            None => Some(Self(format!("{}:{}", host, port))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The URL form expected by `reqwest::Proxy`
    pub fn to_proxy_url(&self) -> String {
        if self.0.contains("://") {
            self.0.clone()
        } else {
            format!("http://{}", self.0)
        }
    }
}

impl std::fmt::Display for ProxyAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_host_port() {
        let addr = ProxyAddr::parse("10.0.0.1:8080").unwrap();
        assert_eq!(addr.as_str(), "10.0.0.1:8080");
        assert_eq!(addr.to_proxy_url(), "http://10.0.0.1:8080");
    }

    #[test]
    fn test_parse_with_scheme() {
        let addr = ProxyAddr::parse("socks5://10.0.0.1:1080").unwrap();
        assert_eq!(addr.as_str(), "socks5://10.0.0.1:1080");
        assert_eq!(addr.to_proxy_url(), "socks5://10.0.0.1:1080");
    }

    #[test]
    fn test_parse_trims_whitespace_and_slash() {
        let addr = ProxyAddr::parse("  http://proxy.example.com:3128/ ").unwrap();
        assert_eq!(addr.as_str(), "http://proxy.example.com:3128");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ProxyAddr::parse("").is_none());
        assert!(ProxyAddr::parse("no-port").is_none());
        assert!(ProxyAddr::parse("host:notaport").is_none());
        assert!(ProxyAddr::parse("host:0").is_none());
        assert!(ProxyAddr::parse(":8080").is_none());
        assert!(ProxyAddr::parse("ftp://host:21").is_none());
        assert!(ProxyAddr::parse("host:80 extra").is_none());
    }

    #[test]
    fn test_parse_ipv6_style_port_split() {
        // rsplit keeps the last colon as the port separator
        let addr = ProxyAddr::parse("::1:8080").unwrap();
        assert_eq!(addr.as_str(), "::1:8080");
    }
}
