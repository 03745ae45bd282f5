//! Cache entry model.

// Author: kelexine (https://github.com/kelexine)

use super::CacheKey;
use crate::error::{CacheError, Result};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};

/// One stored image.
///
/// Entries are never patched in place: a refresh writes a whole new entry
/// under the same key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Bytes,
    pub stored_at: DateTime<Utc>,
    /// The full URL the payload was fetched from, query included.
    pub source_url: String,
    /// Content type reported by the origin, when known.
    pub content_type: Option<String>,
    /// Set only by stores that enforce a retention window.
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Build an entry, rejecting empty payloads.
    pub fn new(
        key: CacheKey,
        payload: Bytes,
        source_url: impl Into<String>,
        stored_at: DateTime<Utc>,
    ) -> Result<Self> {
        if payload.is_empty() {
            return Err(CacheError::InvalidEntry(format!(
                "empty payload for key {}",
                key
            )));
        }

        Ok(Self {
            key,
            payload,
            stored_at,
            source_url: source_url.into(),
            content_type: None,
            expires_at: None,
        })
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    /// Expire the entry `retention` after it was stored. A window reaching
    /// past the representable range leaves the entry without expiry.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.expires_at = self.stored_at.checked_add_signed(retention);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload_rejected() {
        let err = CacheEntry::new(CacheKey::new("a.png"), Bytes::new(), "https://cdn/a.png", Utc::now())
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidEntry(_)));
    }

    #[test]
    fn test_expiry_boundary() {
        let t0 = Utc::now();
        let entry = CacheEntry::new(CacheKey::new("a.png"), Bytes::from_static(b"png"), "https://cdn/a.png", t0)
            .unwrap()
            .with_retention(Duration::days(7));

        let epsilon = Duration::milliseconds(1);
        assert!(!entry.is_expired(t0 + Duration::days(7) - epsilon));
        assert!(entry.is_expired(t0 + Duration::days(7) + epsilon));
    }

    #[test]
    fn test_entries_without_retention_never_expire() {
        let t0 = Utc::now();
        let entry = CacheEntry::new(CacheKey::new("a.png"), Bytes::from_static(b"png"), "https://cdn/a.png", t0)
            .unwrap();
        assert!(!entry.is_expired(t0 + Duration::days(3650)));
    }

    #[test]
    fn test_out_of_range_retention_never_expires() {
        let t0 = Utc::now();
        let entry = CacheEntry::new(CacheKey::new("a.png"), Bytes::from_static(b"png"), "https://cdn/a.png", t0)
            .unwrap()
            .with_retention(Duration::milliseconds(i64::MAX));

        assert_eq!(entry.expires_at, None);
        assert!(!entry.is_expired(DateTime::<Utc>::MAX_UTC));
    }
}
