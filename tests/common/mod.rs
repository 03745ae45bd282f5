// Shared fixtures for integration tests
// Author: kelexine (https://github.com/kelexine)

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use imgcache::blob::BlobRegistry;
use imgcache::cache::{CacheEntry, CacheKey};
use imgcache::client::{CacheClient, ClientParts, StickyFailureFlag};
use imgcache::config::{ClientConfig, WorkerConfig};
use imgcache::error::{CacheError, Result};
use imgcache::network::{FetchedResource, NetworkFetcher};
use imgcache::store::{EntryMeta, MemoryStore, PersistentStore};
use imgcache::utils::clock::ManualClock;
use imgcache::utils::logging::redact_url;
use imgcache::worker::{CacheWorker, WorkerHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR fake image body";

/// Origin stand-in. Routes ignore the query string.
#[derive(Debug, Default)]
pub struct StubFetcher {
    routes: Mutex<HashMap<String, FetchedResource>>,
    calls: AtomicUsize,
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl StubFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve a PNG at `url`, tagged with `tag` so payloads can be told apart.
    pub fn image(&self, url: &str, tag: &str) {
        let mut body = PNG.to_vec();
        body.extend_from_slice(tag.as_bytes());
        self.respond(url, 200, Some("image/png"), Bytes::from(body));
    }

    pub fn respond(&self, url: &str, status: u16, content_type: Option<&str>, body: Bytes) {
        self.routes.lock().insert(
            redact_url(url).to_string(),
            FetchedResource {
                status,
                content_type: content_type.map(str::to_string),
                bytes: body,
            },
        );
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkFetcher for StubFetcher {
    async fn get(&self, url: &str) -> Result<FetchedResource> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::Network(format!("{} unreachable", url)));
        }

        let route = self.routes.lock().get(redact_url(url)).cloned();
        Ok(route.unwrap_or(FetchedResource {
            status: 404,
            content_type: Some("text/html".to_string()),
            bytes: Bytes::from_static(b"not found"),
        }))
    }
}

/// Memory store with injectable faults: failing reads and a destroy that
/// never completes.
#[derive(Debug, Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    /// Number of upcoming reads that fail.
    pub failing_reads: AtomicUsize,
    /// Failed reads report a transaction error instead of a connection error.
    pub transaction_reads: AtomicBool,
    pub hang_destroy: AtomicBool,
    /// Number of upcoming destroys that fail with a transaction error.
    pub failing_destroys: AtomicUsize,
    pub closes: AtomicUsize,
}

#[async_trait]
impl PersistentStore for FaultyStore {
    fn location(&self) -> String {
        "memory://faulty".to_string()
    }

    async fn open(&self) -> Result<()> {
        self.inner.open().await
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let failing = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            if self.transaction_reads.load(Ordering::SeqCst) {
                return Err(CacheError::Transaction(format!("read of {} aborted", key)));
            }
            return Err(CacheError::Connection("connection reset".into()));
        }
        self.inner.get(key).await
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.inner.put(entry).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }

    async fn entries(&self) -> Result<Vec<EntryMeta>> {
        self.inner.entries().await
    }

    async fn destroy(&self) -> Result<()> {
        if self.hang_destroy.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let failing = self
            .failing_destroys
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CacheError::Transaction("container busy".into()));
        }
        self.inner.destroy().await
    }
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()))
}

pub fn worker_config() -> WorkerConfig {
    WorkerConfig::default()
}

pub fn spawn_worker(
    store: &Arc<MemoryStore>,
    fetcher: &Arc<StubFetcher>,
    clock: &Arc<ManualClock>,
    config: WorkerConfig,
) -> WorkerHandle {
    spawn_worker_on(Box::new(Arc::clone(store)), fetcher, clock, config)
}

pub fn spawn_worker_on(
    store: Box<dyn PersistentStore>,
    fetcher: &Arc<StubFetcher>,
    clock: &Arc<ManualClock>,
    config: WorkerConfig,
) -> WorkerHandle {
    let worker = CacheWorker::new(
        store,
        Arc::clone(fetcher) as Arc<dyn NetworkFetcher>,
        Arc::clone(clock) as Arc<dyn imgcache::utils::clock::Clock>,
        &config,
        Duration::from_secs(5),
    );
    WorkerHandle::spawn(worker, config.queue_capacity)
}

pub fn client_config(request_timeout_ms: u64) -> ClientConfig {
    ClientConfig {
        request_timeout_ms,
        probe_interval_ms: 0,
        failure_flag_path: None,
    }
}

pub fn memory_client(
    store: &Arc<MemoryStore>,
    fetcher: &Arc<StubFetcher>,
    config: ClientConfig,
) -> CacheClient {
    CacheClient::from_parts(ClientParts {
        client: config,
        worker: worker_config(),
        reset_timeout: Duration::from_secs(5),
        store: Box::new(Arc::clone(store)),
        probe: Arc::clone(store) as Arc<dyn PersistentStore>,
        fetcher: Arc::clone(fetcher) as Arc<dyn NetworkFetcher>,
        clock: clock(),
        flag: StickyFailureFlag::in_memory(),
        blobs: BlobRegistry::new(),
    })
}
