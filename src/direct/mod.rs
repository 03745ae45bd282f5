//! Worker-less image cache with time-based expiry.
//!
//! `DirectCache` talks to its store from the caller's task. Every entry
//! expires a fixed retention window after it was written; an expired entry
//! is deleted when read and reported as absent. Each store operation is
//! retried with exponential backoff, and a connection-level failure drops the
//! store connection so the next attempt reopens it.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::blob::BlobRegistry;
use crate::cache::{CacheEntry, CacheKey, KeyStrategy};
use crate::client::FetchOutcome;
use crate::config::{CacheSettings, DirectConfig};
use crate::error::{CacheError, Result};
use crate::network::{fetch_image, HttpFetcher, NetworkFetcher};
use crate::store::{DiskStore, PersistentStore};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::logging::redact_url;
use crate::utils::retry::{with_retry, RetryConfig};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entry count and payload volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirectStats {
    pub total_images: usize,
    pub cache_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Error,
}

/// Health report returned by [`DirectCache::diagnose`].
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub healthy: bool,
    pub location: String,
    pub connection: ConnectionStatus,
    pub stats: DirectStats,
    pub errors: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct DirectCache {
    store: Arc<dyn PersistentStore>,
    fetcher: Arc<dyn NetworkFetcher>,
    clock: Arc<dyn Clock>,
    blobs: BlobRegistry,
    retention: chrono::Duration,
    key_strategy: KeyStrategy,
    retry: RetryConfig,
}

/// Errors worth another attempt.
fn is_retryable(error: &CacheError) -> bool {
    matches!(
        error,
        CacheError::Connection(_) | CacheError::Transaction(_) | CacheError::Io(_)
    )
}

impl DirectCache {
    pub fn new(settings: &CacheSettings) -> Result<Self> {
        Ok(Self::with_parts(
            &settings.direct,
            Arc::new(DiskStore::new(&settings.direct.root)),
            Arc::new(HttpFetcher::new(&settings.network)?),
            Arc::new(SystemClock),
            BlobRegistry::new(),
        ))
    }

    pub fn with_parts(
        config: &DirectConfig,
        store: Arc<dyn PersistentStore>,
        fetcher: Arc<dyn NetworkFetcher>,
        clock: Arc<dyn Clock>,
        blobs: BlobRegistry,
    ) -> Self {
        Self {
            store,
            fetcher,
            clock,
            blobs,
            retention: config.retention(),
            key_strategy: config.key_strategy,
            retry: config.retry,
        }
    }

    pub fn blobs(&self) -> &BlobRegistry {
        &self.blobs
    }

    pub fn key_for(&self, url: &str) -> CacheKey {
        CacheKey::derive(url, self.key_strategy)
    }

    /// Run a store operation under the retry policy.
    async fn retried<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut(Arc<dyn PersistentStore>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let reconnect = AtomicBool::new(false);
        let reconnect = &reconnect;
        let store = &self.store;

        with_retry(
            operation,
            &self.retry,
            is_retryable,
            |error: &CacheError| {
                if error.is_connection_level() {
                    reconnect.store(true, Ordering::SeqCst);
                }
            },
            move || {
                let store = Arc::clone(store);
                let needs_reconnect = reconnect.swap(false, Ordering::SeqCst);
                let attempt = op(Arc::clone(&store));
                async move {
                    if needs_reconnect {
                        debug!("Reconnecting to {}", store.location());
                        store.close().await;
                    }
                    attempt.await
                }
            },
        )
        .await
    }

    /// Entry for `url`, or `None` when absent or expired.
    pub async fn get(&self, url: &str) -> Result<Option<CacheEntry>> {
        let key = self.key_for(url);
        let entry = self
            .retried("direct_get", |store| {
                let key = key.clone();
                async move { store.get(&key).await }
            })
            .await?;

        match entry {
            Some(entry) if entry.is_expired(self.clock.now()) => {
                debug!("Entry {} expired, deleting", key);
                if let Err(e) = self.delete_key(&key).await {
                    warn!("Could not delete expired entry {}: {}", key, e);
                }
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Store `bytes` for `url`, expiring after the retention window.
    pub async fn put(&self, url: &str, bytes: Bytes, content_type: Option<String>) -> Result<()> {
        let entry = CacheEntry::new(self.key_for(url), bytes, url, self.clock.now())?
            .with_content_type(content_type)
            .with_retention(self.retention);

        self.retried("direct_put", |store| {
            let entry = entry.clone();
            async move { store.put(&entry).await }
        })
        .await
    }

    pub async fn remove(&self, url: &str) -> Result<()> {
        self.delete_key(&self.key_for(url)).await
    }

    async fn delete_key(&self, key: &CacheKey) -> Result<()> {
        self.retried("direct_delete", |store| {
            let key = key.clone();
            async move { store.delete(&key).await }
        })
        .await
    }

    /// Read-through lookup. Always resolves to something displayable.
    pub async fn fetch_and_cache(&self, url: &str) -> FetchOutcome {
        if url.is_empty() || url.starts_with("data:") {
            return FetchOutcome::Original(url.to_string());
        }

        match self.get(url).await {
            Ok(Some(entry)) => {
                let mime = entry
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let size = entry.size();
                match self.blobs.mint(entry.payload, mime) {
                    Ok(handle) => {
                        crate::metrics::record_hit(size);
                        return FetchOutcome::Cached {
                            handle,
                            from_cache: true,
                        };
                    }
                    Err(e) => warn!("Could not mint handle for cached {}: {}", entry.key, e),
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Direct cache read failed for {}: {}", redact_url(url), e),
        }

        crate::metrics::record_miss();
        let image = match fetch_image(self.fetcher.as_ref(), url).await {
            Ok(image) => image,
            Err(e) => {
                warn!("Fetch failed for {}: {}", redact_url(url), e);
                crate::metrics::record_lookup_error();
                return FetchOutcome::Original(url.to_string());
            }
        };
        crate::metrics::record_fetched(image.bytes.len());

        if let Err(e) = self
            .put(url, image.bytes.clone(), Some(image.content_type.clone()))
            .await
        {
            warn!("Write-back failed for {}: {}", redact_url(url), e);
        }

        match self.blobs.mint(image.bytes, image.content_type) {
            Ok(handle) => FetchOutcome::Cached {
                handle,
                from_cache: false,
            },
            Err(e) => {
                warn!("Could not mint handle for {}: {}", redact_url(url), e);
                FetchOutcome::Original(url.to_string())
            }
        }
    }

    /// Delete every expired entry. Returns how many were removed.
    pub async fn clean_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let entries = self
            .retried("direct_entries", |store| async move { store.entries().await })
            .await?;

        let mut removed = 0;
        for meta in entries.iter().filter(|meta| meta.is_expired(now)) {
            match self.delete_key(&meta.key).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not delete expired entry {}: {}", meta.key, e),
            }
        }

        if removed > 0 {
            info!("Removed {} expired images", removed);
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<DirectStats> {
        let entries = self
            .retried("direct_entries", |store| async move { store.entries().await })
            .await?;

        Ok(DirectStats {
            total_images: entries.len(),
            cache_size: entries.iter().map(|meta| meta.size as u64).sum(),
        })
    }

    /// Probe the store and collect a health report. Never fails.
    pub async fn diagnose(&self) -> DiagnosticReport {
        let mut errors = Vec::new();
        let mut stats = DirectStats::default();

        let connection = match self.retried("direct_open", |store| async move { store.open().await }).await {
            Ok(()) => ConnectionStatus::Connected,
            Err(e) => {
                errors.push(format!("connection error: {}", e));
                ConnectionStatus::Error
            }
        };

        if connection == ConnectionStatus::Connected {
            match self.stats().await {
                Ok(s) => stats = s,
                Err(e) => errors.push(format!("stats error: {}", e)),
            }
        }

        DiagnosticReport {
            healthy: errors.is_empty(),
            location: self.store.location(),
            connection,
            stats,
            errors,
            checked_at: self.clock.now(),
        }
    }

    /// Delete every entry.
    pub async fn clear(&self) -> Result<()> {
        self.retried("direct_clear", |store| async move { store.destroy().await })
            .await
    }
}
