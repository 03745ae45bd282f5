// Process-local store
// Author: kelexine (https://github.com/kelexine)

use super::{EntryMeta, PersistentStore};
use crate::cache::{CacheEntry, CacheKey};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// In-memory store. Contents live as long as the value.
///
/// Availability can be switched off to simulate a denied backend: while
/// unavailable every operation fails with `CacheError::Connection`.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    available: AtomicBool,
    open: AtomicBool,
    opens: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            open: AtomicBool::new(false),
            opens: AtomicU64::new(0),
        }
    }

    /// Make the backend deny (`false`) or accept (`true`) connections.
    /// Turning it off also drops the live connection.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if !available {
            self.open.store(false, Ordering::SeqCst);
        }
    }

    /// Number of successful opens so far.
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            crate::metrics::record_store_failure("open");
            return Err(CacheError::Connection(format!(
                "store {} is unavailable",
                self.name
            )));
        }
        if !self.open.swap(true, Ordering::SeqCst) {
            self.opens.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    fn location(&self) -> String {
        format!("memory://{}", self.name)
    }

    async fn open(&self) -> Result<()> {
        self.ensure_open()
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        self.ensure_open()?;
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.ensure_open()?;
        self.entries.write().insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        self.ensure_open()?;
        self.entries.write().remove(key);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.entries.read().len())
    }

    async fn entries(&self) -> Result<Vec<EntryMeta>> {
        self.ensure_open()?;
        Ok(self.entries.read().values().map(EntryMeta::from).collect())
    }

    async fn destroy(&self) -> Result<()> {
        self.close().await;
        self.entries.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;

    #[tokio::test]
    async fn test_unavailable_store_refuses_everything() {
        let store = MemoryStore::new();
        store.set_available(false);

        assert!(matches!(store.open().await, Err(CacheError::Connection(_))));
        assert!(store.get(&CacheKey::new("x")).await.is_err());
        assert_eq!(store.open_count(), 0);

        store.set_available(true);
        store.open().await.unwrap();
        store.open().await.unwrap();
        assert_eq!(store.open_count(), 1);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_whole_entry() {
        let store = MemoryStore::new();
        let key = CacheKey::new("a.png");
        let first = CacheEntry::new(key.clone(), Bytes::from_static(b"one"), "u1", Utc::now())
            .unwrap()
            .with_content_type(Some("image/png".into()));
        let second = CacheEntry::new(key.clone(), Bytes::from_static(b"two"), "u2", Utc::now()).unwrap();

        store.put(&first).await.unwrap();
        store.put(&second).await.unwrap();

        let loaded = store.get(&key).await.unwrap().unwrap();
        assert_eq!(loaded, second);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
