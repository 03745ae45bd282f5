// Cache key derivation from resource URLs
// Author: kelexine (https://github.com/kelexine)

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// How a resource URL is reduced to a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// The whole URL without query string and fragment.
    FullPath,
    /// Only the last path segment (the file name).
    FileName,
}

/// Stable key for locating an image in a store.
///
/// Versioned query strings (`?v=2`) must not split one logical image into
/// several entries, so the query is never part of the key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive the key for `url` using `strategy`.
    pub fn derive(url: &str, strategy: KeyStrategy) -> Self {
        let normalized = normalize_url(url);
        match strategy {
            KeyStrategy::FullPath => Self(normalized),
            KeyStrategy::FileName => Self(file_name(&normalized).unwrap_or(&normalized).to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CacheKey").field(&self.0).finish()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip query string and fragment from `url`.
///
/// Absolute URLs go through `url::Url` so that equivalent spellings
/// (`HTTPS://CDN/x.png`, `https://cdn/x.png`) collapse to one form.
/// Relative paths are cut textually.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    match Url::parse(trimmed) {
        Ok(mut parsed) if parsed.has_host() => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        _ => crate::utils::logging::redact_url(trimmed).to_string(),
    }
}

/// Last non-empty path segment of an already normalized URL.
fn file_name(normalized: &str) -> Option<&str> {
    let path = match normalized.find("://") {
        // Skip the authority so a bare host is never mistaken for a file name
        Some(scheme_end) => {
            let rest = &normalized[scheme_end + 3..];
            &rest[rest.find('/')?..]
        }
        None => normalized,
    };
    path.rsplit('/').find(|segment| !segment.is_empty())
}
