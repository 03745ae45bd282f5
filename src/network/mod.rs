// Network fetch seam
// Author: kelexine (https://github.com/kelexine)

pub mod content;
pub mod http;

pub use content::{classify, ImageFormat};
pub use http::HttpFetcher;

use crate::error::{CacheError, Result};
use crate::utils::logging::redact_url;
use async_trait::async_trait;
use bytes::Bytes;

/// Raw result of an origin fetch.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl FetchedResource {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A fetched body that passed status and content checks.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub content_type: String,
    pub bytes: Bytes,
}

/// Retrieves resources from their origin.
///
/// Transport failures are `CacheError::Network`; any HTTP status is a
/// successful fetch at this level.
#[async_trait]
pub trait NetworkFetcher: Send + Sync + std::fmt::Debug {
    async fn get(&self, url: &str) -> Result<FetchedResource>;
}

/// Fetch `url` and require a successful, non-empty image response.
pub async fn fetch_image(fetcher: &dyn NetworkFetcher, url: &str) -> Result<FetchedImage> {
    let resource = fetcher.get(url).await?;

    if !resource.is_success() {
        return Err(CacheError::Http {
            url: redact_url(url).to_string(),
            status: resource.status,
        });
    }

    let content_type = classify(resource.content_type.as_deref(), &resource.bytes).ok_or_else(|| {
        CacheError::ContentType {
            url: redact_url(url).to_string(),
            content_type: resource
                .content_type
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        }
    })?;

    if resource.bytes.is_empty() {
        return Err(CacheError::ContentType {
            url: redact_url(url).to_string(),
            content_type: format!("{} (empty body)", content_type),
        });
    }

    Ok(FetchedImage {
        content_type,
        bytes: resource.bytes,
    })
}
