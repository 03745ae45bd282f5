// Origin fetcher over reqwest
// Author: kelexine (https://github.com/kelexine)

use super::{FetchedResource, NetworkFetcher};
use crate::config::NetworkConfig;
use crate::error::{CacheError, Result};
use crate::utils::logging::redact_url;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// HTTP client for origin image fetches.
///
/// Bypasses intermediate caches (`Cache-Control: no-store`) since the
/// response is about to be persisted locally.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http_client: Client,
    accept: String,
}

impl HttpFetcher {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .user_agent(config.user_agent.clone())
            .use_rustls_tls()
            .build()
            .map_err(|e| CacheError::Config(format!("Failed to create HTTP client: {}", e)))?;

        debug!("Created HTTP client with connection pooling and keep-alive");

        Ok(Self {
            http_client,
            accept: config.accept.clone(),
        })
    }
}

#[async_trait]
impl NetworkFetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<FetchedResource> {
        let response = self
            .http_client
            .get(url)
            .header(ACCEPT, &self.accept)
            .header("Cache-Control", "no-store")
            .send()
            .await
            .map_err(|e| CacheError::Network(format!("{}: {}", redact_url(url), e.without_url())))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CacheError::Network(format!("{}: {}", redact_url(url), e.without_url())))?;

        debug!(
            "Fetched {} -> {} ({} bytes, {})",
            redact_url(url),
            status,
            bytes.len(),
            content_type.as_deref().unwrap_or("no content type")
        );

        Ok(FetchedResource {
            status,
            content_type,
            bytes,
        })
    }
}
