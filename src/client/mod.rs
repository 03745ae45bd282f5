//! Main-context gateway to the cache worker.
//!
//! [`CacheClient::fetch`] never fails: whatever goes wrong in the persistent
//! layer, the caller gets either a handle to the image bytes or the original
//! URL to load directly. The worker task is spawned on first use and kept for
//! the lifetime of the client.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod availability;

pub use availability::{AvailabilityStatus, StickyFailureFlag};

use crate::blob::{BlobHandle, BlobRegistry};
use crate::cache::StatsSnapshot;
use crate::config::{CacheSettings, ClientConfig, WorkerConfig};
use crate::error::{CacheError, Result};
use crate::network::{HttpFetcher, NetworkFetcher};
use crate::store::{DiskStore, PersistentStore};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::logging::{redact_url, Verbosity};
use crate::worker::{CacheWorker, Command, DebugReport, Response, WorkerHandle};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of [`CacheClient::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Bytes are held by the client's [`BlobRegistry`].
    Cached { handle: BlobHandle, from_cache: bool },
    /// Load the resource directly from this URL.
    Original(String),
}

impl FetchOutcome {
    /// What to hand to the display layer.
    pub fn src(&self) -> &str {
        match self {
            FetchOutcome::Cached { handle, .. } => handle.as_str(),
            FetchOutcome::Original(url) => url,
        }
    }

    pub fn handle(&self) -> Option<&BlobHandle> {
        match self {
            FetchOutcome::Cached { handle, .. } => Some(handle),
            FetchOutcome::Original(_) => None,
        }
    }

    pub fn from_cache(&self) -> bool {
        matches!(self, FetchOutcome::Cached { from_cache: true, .. })
    }
}

/// Outcome of an administrative command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminOutcome {
    pub success: bool,
    pub detail: Option<String>,
}

/// Store availability against the failure flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub store_available: bool,
    pub flag_set: bool,
}

impl CacheStatus {
    /// The flag says "failed" exactly when the store is unreachable.
    pub fn is_consistent(&self) -> bool {
        self.store_available != self.flag_set
    }
}

/// Everything needed to build a client. Lets callers swap the store,
/// fetcher or clock.
pub struct ClientParts {
    pub client: ClientConfig,
    pub worker: WorkerConfig,
    pub reset_timeout: Duration,
    /// Store handed to the worker task.
    pub store: Box<dyn PersistentStore>,
    /// Separate handle to the same backend used for availability probes.
    pub probe: Arc<dyn PersistentStore>,
    pub fetcher: Arc<dyn NetworkFetcher>,
    pub clock: Arc<dyn Clock>,
    pub flag: StickyFailureFlag,
    pub blobs: BlobRegistry,
}

struct WorkerParts {
    store: Box<dyn PersistentStore>,
    fetcher: Arc<dyn NetworkFetcher>,
    clock: Arc<dyn Clock>,
}

pub struct CacheClient {
    config: ClientConfig,
    worker_config: WorkerConfig,
    reset_timeout: Duration,
    worker: OnceCell<WorkerHandle>,
    worker_parts: Mutex<Option<WorkerParts>>,
    probe: Arc<dyn PersistentStore>,
    last_probe: Mutex<Option<Instant>>,
    flag: StickyFailureFlag,
    blobs: BlobRegistry,
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("store", &self.probe.location())
            .field("worker_started", &self.worker.initialized())
            .field("flag", &self.flag.status())
            .field("blobs", &self.blobs.len())
            .finish()
    }
}

impl CacheClient {
    /// Client over the on-disk store and the HTTP fetcher described by `settings`.
    pub fn new(settings: &CacheSettings) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(&settings.network)?);
        Ok(Self::from_parts(ClientParts {
            client: settings.client.clone(),
            worker: settings.worker.clone(),
            reset_timeout: settings.store.reset_timeout(),
            store: Box::new(DiskStore::new(&settings.store.root)),
            probe: Arc::new(DiskStore::new(&settings.store.root)),
            fetcher,
            clock: Arc::new(SystemClock),
            flag: StickyFailureFlag::from_path(settings.client.failure_flag_path.as_deref()),
            blobs: BlobRegistry::new(),
        }))
    }

    pub fn from_parts(parts: ClientParts) -> Self {
        Self {
            config: parts.client,
            worker_config: parts.worker,
            reset_timeout: parts.reset_timeout,
            worker: OnceCell::new(),
            worker_parts: Mutex::new(Some(WorkerParts {
                store: parts.store,
                fetcher: parts.fetcher,
                clock: parts.clock,
            })),
            probe: parts.probe,
            last_probe: Mutex::new(None),
            flag: parts.flag,
            blobs: parts.blobs,
        }
    }

    pub fn blobs(&self) -> &BlobRegistry {
        &self.blobs
    }

    pub fn failure_flag(&self) -> &StickyFailureFlag {
        &self.flag
    }

    async fn worker(&self) -> Result<&WorkerHandle> {
        self.worker
            .get_or_try_init(|| async {
                let parts = self
                    .worker_parts
                    .lock()
                    .take()
                    .ok_or_else(|| CacheError::WorkerUnavailable("worker parts already consumed".into()))?;
                let worker = CacheWorker::new(
                    parts.store,
                    parts.fetcher,
                    parts.clock,
                    &self.worker_config,
                    self.reset_timeout,
                );
                info!("Starting cache worker");
                Ok::<_, CacheError>(WorkerHandle::spawn(worker, self.worker_config.queue_capacity))
            })
            .await
    }

    /// Resolve `url` to something displayable. Never fails.
    pub async fn fetch(&self, url: &str, context: Option<&str>, related_keys: &[String]) -> FetchOutcome {
        if url.starts_with("data:") {
            return FetchOutcome::Original(url.to_string());
        }

        self.reconcile_flag().await;
        if self.flag.is_set() {
            crate::metrics::record_fallback("sticky_flag");
            return FetchOutcome::Original(url.to_string());
        }

        let worker = match self.worker().await {
            Ok(worker) => worker,
            Err(e) => {
                warn!("Cache worker unavailable: {}", e);
                crate::metrics::record_fallback("worker_error");
                return FetchOutcome::Original(url.to_string());
            }
        };

        let command = Command::GetImage {
            url: url.to_string(),
            context: context.map(str::to_string),
            related_keys: related_keys.to_vec(),
        };

        match worker.request(command, self.config.request_timeout()).await {
            Ok(Response::Image {
                payload,
                content_type,
                from_cache,
                ..
            }) => {
                let mime = content_type.unwrap_or_else(|| "application/octet-stream".to_string());
                match self.blobs.mint(payload, mime) {
                    Ok(handle) => {
                        self.flag.clear();
                        FetchOutcome::Cached { handle, from_cache }
                    }
                    Err(e) => {
                        warn!("Serving {} directly: {}", redact_url(url), e);
                        crate::metrics::record_fallback("mint_error");
                        FetchOutcome::Original(url.to_string())
                    }
                }
            }
            Ok(Response::ImageError { error, .. }) => {
                debug!("Serving {} directly: {}", redact_url(url), error);
                crate::metrics::record_fallback("worker_error");
                FetchOutcome::Original(url.to_string())
            }
            Ok(other) => {
                warn!("Unexpected worker response to image request: {:?}", other);
                crate::metrics::record_fallback("no_payload");
                FetchOutcome::Original(url.to_string())
            }
            Err(e @ CacheError::Timeout { .. }) => {
                self.flag.set(&e.to_string());
                crate::metrics::record_fallback("timeout");
                FetchOutcome::Original(url.to_string())
            }
            Err(e) => {
                warn!("Serving {} directly: {}", redact_url(url), e);
                crate::metrics::record_fallback("worker_error");
                FetchOutcome::Original(url.to_string())
            }
        }
    }

    /// Probe the store, throttled by `probe_interval_ms`, and align the flag with it.
    async fn reconcile_flag(&self) {
        let interval = self.config.probe_interval();
        {
            let mut last = self.last_probe.lock();
            let now = Instant::now();
            if let Some(previous) = *last {
                if !interval.is_zero() && now.duration_since(previous) < interval {
                    return;
                }
            }
            *last = Some(now);
        }
        self.sync_cache_status().await;
    }

    /// Fresh availability probe; does not go through the worker.
    async fn probe_store(&self) -> bool {
        self.probe.close().await;
        match self.probe.open().await {
            Ok(()) => true,
            Err(e) => {
                debug!("Store probe failed: {}", e);
                false
            }
        }
    }

    /// Align the failure flag with a fresh probe. Returns whether it changed.
    pub async fn sync_cache_status(&self) -> bool {
        if self.probe_store().await {
            let changed = self.flag.clear();
            if changed {
                info!("Image store reachable again, caching re-enabled");
            }
            changed
        } else {
            self.flag.set("store probe failed")
        }
    }

    /// Probe result next to the flag, without changing either.
    pub async fn status(&self) -> CacheStatus {
        CacheStatus {
            store_available: self.probe_store().await,
            flag_set: self.flag.is_set(),
        }
    }

    async fn admin(&self, command: Command, timeout: Duration) -> Result<AdminOutcome> {
        let worker = self.worker().await?;
        match worker.request(command, timeout).await? {
            Response::Admin { success, detail, .. } => Ok(AdminOutcome { success, detail }),
            other => Err(CacheError::WorkerUnavailable(format!(
                "unexpected reply to admin command: {:?}",
                other
            ))),
        }
    }

    /// Force the next lookup of `url` to refetch.
    pub async fn invalidate(&self, url: &str) -> Result<AdminOutcome> {
        self.admin(
            Command::InvalidateImage { url: url.to_string() },
            self.config.request_timeout(),
        )
        .await
    }

    pub async fn remove(&self, url: &str) -> Result<AdminOutcome> {
        self.admin(
            Command::RemoveImage { url: url.to_string() },
            self.config.request_timeout(),
        )
        .await
    }

    /// Remove `url` and refetch it now. Reports the refetch outcome.
    pub async fn update(&self, url: &str) -> Result<AdminOutcome> {
        self.admin(
            Command::UpdateImage { url: url.to_string() },
            self.config.request_timeout() + self.reset_timeout,
        )
        .await
    }

    /// Delete the whole store and reopen it empty.
    pub async fn reset(&self) -> Result<AdminOutcome> {
        self.admin(Command::ResetCache, self.config.request_timeout() + self.reset_timeout)
            .await
    }

    /// Reset the store, clear the failure flag and release every blob handle.
    pub async fn reset_all(&self) -> Result<AdminOutcome> {
        self.flag.clear();
        let released = self.blobs.revoke_all();
        let outcome = self.reset().await?;
        debug!("Full reset released {} handles", released);
        Ok(outcome)
    }

    pub async fn check_access(&self) -> Result<AdminOutcome> {
        self.admin(Command::CheckAccess, self.config.request_timeout()).await
    }

    pub async fn set_verbosity(&self, verbosity: Verbosity) -> Result<AdminOutcome> {
        self.admin(Command::SetLogConfig { verbosity }, self.config.request_timeout())
            .await
    }

    pub async fn reset_stats(&self, context: Option<&str>) -> Result<AdminOutcome> {
        self.admin(
            Command::ResetStats {
                context: context.map(str::to_string),
            },
            self.config.request_timeout(),
        )
        .await
    }

    pub async fn debug(&self) -> Result<DebugReport> {
        let worker = self.worker().await?;
        match worker.request(Command::DebugCache, self.config.request_timeout()).await? {
            Response::Debug { report } => Ok(*report),
            other => Err(CacheError::WorkerUnavailable(format!(
                "unexpected reply to debug request: {:?}",
                other
            ))),
        }
    }

    pub async fn stats(&self) -> Result<StatsSnapshot> {
        Ok(self.debug().await?.stats)
    }

    /// Requests currently waiting on the worker.
    pub fn pending_requests(&self) -> usize {
        self.worker.get().map_or(0, WorkerHandle::pending_requests)
    }
}
