//! Persistent store abstraction for cached images.
//!
//! A store is a transactional, unique-key binary map. Each instance owns at
//! most one live connection, opened lazily on first use and dropped when the
//! backend reports a connection-level failure so that the next operation
//! reopens it transparently.
//!
//! # Implementations
//!
//! - [`DiskStore`]: content-addressed on-disk store built on `cacache`.
//! - [`MemoryStore`]: process-local map for ephemeral caches and tests.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod disk;
pub mod memory;

pub use disk::DiskStore;
pub use memory::MemoryStore;

use crate::cache::{CacheEntry, CacheKey};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Entry metadata returned when listing a store; payloads are not loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryMeta {
    pub key: CacheKey,
    pub size: usize,
    pub stored_at: DateTime<Utc>,
    pub source_url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl EntryMeta {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }
}

impl From<&CacheEntry> for EntryMeta {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            size: entry.size(),
            stored_at: entry.stored_at,
            source_url: entry.source_url.clone(),
            expires_at: entry.expires_at,
        }
    }
}

#[async_trait]
pub trait PersistentStore: Send + Sync + std::fmt::Debug {
    /// Human-readable location, used in reports and logs.
    fn location(&self) -> String;

    /// Open the connection if it is not open yet. Idempotent.
    ///
    /// Fails with `CacheError::Connection` when the backend is denied or its
    /// schema cannot be brought up to date.
    async fn open(&self) -> Result<()>;

    /// Drop the live connection. The next operation reopens it.
    async fn close(&self);

    /// `Ok(None)` for absent keys.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Atomically insert or fully overwrite the entry under `entry.key`.
    async fn put(&self, entry: &CacheEntry) -> Result<()>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &CacheKey) -> Result<()>;

    async fn count(&self) -> Result<usize>;

    /// Metadata of every entry, in no particular order.
    async fn entries(&self) -> Result<Vec<EntryMeta>>;

    /// Close the connection and delete the whole container.
    async fn destroy(&self) -> Result<()>;
}

/// Shared stores, so a caller can keep a handle to a store it hands off.
#[async_trait]
impl<T: PersistentStore + ?Sized> PersistentStore for std::sync::Arc<T> {
    fn location(&self) -> String {
        (**self).location()
    }

    async fn open(&self) -> Result<()> {
        (**self).open().await
    }

    async fn close(&self) {
        (**self).close().await
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        (**self).get(key).await
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        (**self).put(entry).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        (**self).delete(key).await
    }

    async fn count(&self) -> Result<usize> {
        (**self).count().await
    }

    async fn entries(&self) -> Result<Vec<EntryMeta>> {
        (**self).entries().await
    }

    async fn destroy(&self) -> Result<()> {
        (**self).destroy().await
    }
}
