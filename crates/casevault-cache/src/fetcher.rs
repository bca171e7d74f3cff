//! Network access for manifests and application files.

use std::io::Read;
use std::time::Duration;

use crate::response::CachedResponse;
use crate::{CacheError, Result};

/// Largest body accepted from the network.
const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

/// Fetches a URL. HTTP error statuses come back as responses; only transport
/// failures are `Err`.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<CachedResponse>;
}

/// Blocking HTTP fetcher. Every request bypasses intermediary caches.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .build();
        Self { agent }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<CachedResponse> {
        let response = match self
            .agent
            .get(url)
            .set("cache-control", "no-cache")
            .set("pragma", "no-cache")
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(transport)) => {
                return Err(CacheError::Network(format!("{url}: {transport}")))
            }
        };

        let status = response.status();
        let content_type = response.header("content-type").map(str::to_string);
        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_BODY_BYTES)
            .read_to_end(&mut body)
            .map_err(|e| CacheError::Network(format!("{url}: {e}")))?;

        Ok(CachedResponse {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_host_is_network_error() {
        let fetcher = HttpFetcher::new(Duration::from_millis(200));
        // Port 9 (discard) on loopback is closed on test machines
        let result = fetcher.fetch("http://127.0.0.1:9/cache-manifest.json");
        assert!(matches!(result, Err(CacheError::Network(_))));
    }
}
