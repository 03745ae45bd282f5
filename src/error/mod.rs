// Error types for the image cache
// Author: kelexine (https://github.com/kelexine)

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    /// The persistent store could not be opened (denied, missing, bad schema).
    #[error("Store connection error: {0}")]
    Connection(String),

    /// A read or write failed after the store was opened.
    #[error("Store transaction error: {0}")]
    Transaction(String),

    #[error("Resource {url} is not an image (content type: {content_type})")]
    ContentType { url: String, content_type: String },

    #[error("HTTP {status} while fetching {url}")]
    Http { url: String, status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {}ms: {operation}", .elapsed.as_millis())]
    Timeout { operation: String, elapsed: Duration },

    #[error("Cache worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("Invalid cache entry: {0}")]
    InvalidEntry(String),

    #[error("Failed to mint blob handle: {0}")]
    BlobMint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parsing error: {0}")]
    ConfigParsing(#[from] config::ConfigError),
}

impl CacheError {
    /// Errors after which the store handle must be dropped and reopened.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, CacheError::Connection(_))
    }

    /// Errors produced by the origin fetch rather than by the cache itself.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            CacheError::ContentType { .. } | CacheError::Http { .. } | CacheError::Network(_)
        )
    }

    /// Short stable label, used as a metrics label value.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::Connection(_) => "connection",
            CacheError::Transaction(_) => "transaction",
            CacheError::ContentType { .. } => "content_type",
            CacheError::Http { .. } => "http",
            CacheError::Network(_) => "network",
            CacheError::Timeout { .. } => "timeout",
            CacheError::WorkerUnavailable(_) => "worker_unavailable",
            CacheError::InvalidEntry(_) => "invalid_entry",
            CacheError::BlobMint(_) => "blob_mint",
            CacheError::Config(_) | CacheError::ConfigParsing(_) => "config",
            CacheError::Io(_) => "io",
            CacheError::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
