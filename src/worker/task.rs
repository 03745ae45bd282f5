//! The cache worker task.
//!
//! The worker owns the persistent store, the invalidation set and the
//! statistics. It drains its request queue in arrival order: lookups and
//! administrative commands run inline, origin fetches run as in-flight
//! futures polled by the same loop so that transactions for different keys
//! interleave. A second request for a key that is already being fetched
//! joins that fetch instead of starting another one.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use super::protocol::{Command, DebugReport, Reply, ReplyError, Request, RequestId, Response, StoreReport};
use crate::cache::{CacheEntry, CacheKey, KeyStrategy, StatsRegistry};
use crate::config::WorkerConfig;
use crate::error::{CacheError, Result};
use crate::network::{fetch_image, FetchedImage, NetworkFetcher};
use crate::store::PersistentStore;
use crate::utils::clock::Clock;
use crate::utils::logging::{redact_url, SummaryThrottle, Verbosity};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Keys listed in the startup inventory line.
const INVENTORY_KEYS: usize = 5;

type FetchFuture = BoxFuture<'static, FetchDone>;

struct FetchDone {
    key: CacheKey,
    url: String,
    result: Result<FetchedImage>,
}

/// A request parked on an in-flight fetch.
#[derive(Debug)]
enum Waiter {
    Image {
        id: RequestId,
        url: String,
        context: Option<String>,
    },
    Update {
        id: RequestId,
    },
}

pub struct CacheWorker {
    store: Box<dyn PersistentStore>,
    fetcher: Arc<dyn NetworkFetcher>,
    clock: Arc<dyn Clock>,
    key_strategy: KeyStrategy,
    retention: Option<chrono::Duration>,
    reset_timeout: Duration,
    invalidated: HashSet<CacheKey>,
    in_flight: HashMap<CacheKey, Vec<Waiter>>,
    /// In-flight fetches started before a removal or reset; their results are
    /// served but not stored.
    discarded: HashSet<CacheKey>,
    stats: StatsRegistry,
    verbosity: Verbosity,
    throttle: SummaryThrottle,
    inventory_logged: bool,
}

impl std::fmt::Debug for CacheWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWorker")
            .field("store", &self.store.location())
            .field("key_strategy", &self.key_strategy)
            .field("verbosity", &self.verbosity)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl CacheWorker {
    pub fn new(
        store: Box<dyn PersistentStore>,
        fetcher: Arc<dyn NetworkFetcher>,
        clock: Arc<dyn Clock>,
        config: &WorkerConfig,
        reset_timeout: Duration,
    ) -> Self {
        let now = clock.now();
        Self {
            store,
            fetcher,
            clock,
            key_strategy: config.key_strategy,
            retention: config.retention(),
            reset_timeout,
            invalidated: HashSet::new(),
            in_flight: HashMap::new(),
            discarded: HashSet::new(),
            stats: StatsRegistry::new(now),
            verbosity: config.verbosity,
            throttle: SummaryThrottle::new(config.summary_interval()),
            inventory_logged: false,
        }
    }

    /// Serve requests until the request channel closes, then let in-flight
    /// fetches finish so their results are still stored.
    pub async fn run(mut self, mut requests: mpsc::Receiver<Request>, replies: mpsc::UnboundedSender<Reply>) {
        let mut fetches: FuturesUnordered<FetchFuture> = FuturesUnordered::new();
        debug!("Cache worker started on {}", self.store.location());

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle(request, &mut fetches, &replies).await,
                    None => break,
                },
                Some(done) = fetches.next(), if !fetches.is_empty() => {
                    self.complete(done, &replies).await;
                }
            }
        }

        while let Some(done) = fetches.next().await {
            self.complete(done, &replies).await;
        }
        self.store.close().await;
        debug!("Cache worker stopped");
    }

    fn key_for(&self, url: &str) -> CacheKey {
        CacheKey::derive(url, self.key_strategy)
    }

    fn reply(replies: &mpsc::UnboundedSender<Reply>, id: RequestId, response: Response) {
        if replies.send(Reply { id, response }).is_err() {
            debug!("Reply {} dropped: router gone", id);
        }
    }

    fn admin(command: &'static str, result: Result<String>) -> Response {
        match result {
            Ok(detail) => Response::Admin {
                command,
                success: true,
                detail: Some(detail),
            },
            Err(e) => Response::Admin {
                command,
                success: false,
                detail: Some(e.to_string()),
            },
        }
    }

    async fn handle(
        &mut self,
        request: Request,
        fetches: &mut FuturesUnordered<FetchFuture>,
        replies: &mpsc::UnboundedSender<Reply>,
    ) {
        let Request { id, command } = request;
        let name = command.name();

        match command {
            Command::GetImage {
                url,
                context,
                related_keys,
            } => {
                self.get_image(id, url, context, &related_keys, fetches, replies).await;
            }
            Command::InvalidateImage { url } => {
                let key = self.key_for(&url);
                if self.verbosity.per_request() {
                    debug!("Marking {} for reload on next access", key);
                }
                let detail = format!("{} will be refetched on next access", key);
                self.invalidated.insert(key);
                Self::reply(replies, id, Self::admin(name, Ok(detail)));
            }
            Command::RemoveImage { url } => {
                let key = self.key_for(&url);
                if self.in_flight.contains_key(&key) {
                    self.discarded.insert(key.clone());
                }
                let result = self.store.delete(&key).await.map(|_| format!("{} removed", key));
                if let Err(e) = &result {
                    warn!("Failed to remove {}: {}", key, e);
                }
                Self::reply(replies, id, Self::admin(name, result));
            }
            Command::UpdateImage { url } => {
                let key = self.key_for(&url);
                // The refetch outcome is what gets reported
                if let Err(e) = self.store.delete(&key).await {
                    warn!("Removal before update of {} failed: {}", key, e);
                }
                self.invalidated.remove(&key);
                self.discarded.remove(&key);
                self.enqueue_fetch(key, url, Waiter::Update { id }, fetches);
            }
            Command::ResetCache => {
                let result = self.reset().await.map(|_| "store deleted and reopened".to_string());
                match &result {
                    Ok(_) => info!("Cache reset on {}", self.store.location()),
                    Err(e) => warn!("Cache reset failed: {}", e),
                }
                Self::reply(replies, id, Self::admin(name, result));
            }
            Command::CheckAccess => {
                let result = self
                    .store
                    .open()
                    .await
                    .map(|_| format!("store reachable at {}", self.store.location()));
                Self::reply(replies, id, Self::admin(name, result));
            }
            Command::DebugCache => {
                let report = self.debug_report().await;
                Self::reply(
                    replies,
                    id,
                    Response::Debug {
                        report: Box::new(report),
                    },
                );
            }
            Command::SetLogConfig { verbosity } => {
                self.verbosity = verbosity;
                self.throttle.reset();
                info!("Worker verbosity set to {}", verbosity.as_str());
                Self::reply(replies, id, Self::admin(name, Ok(verbosity.as_str().to_string())));
            }
            Command::ResetStats { context } => {
                let now = self.clock.now();
                let detail = match context {
                    Some(context) => {
                        self.stats.reset_context(&context, now);
                        format!("statistics reset for {}", context)
                    }
                    None => {
                        self.stats.reset_all(now);
                        "all statistics reset".to_string()
                    }
                };
                Self::reply(replies, id, Self::admin(name, Ok(detail)));
            }
        }
    }

    async fn get_image(
        &mut self,
        id: RequestId,
        url: String,
        context: Option<String>,
        related_keys: &[String],
        fetches: &mut FuturesUnordered<FetchFuture>,
        replies: &mpsc::UnboundedSender<Reply>,
    ) {
        if !self.inventory_logged {
            self.inventory_logged = true;
            self.log_inventory().await;
        }

        let key = self.key_for(&url);
        let now = self.clock.now();

        // Every pending flag involved is consumed, not just the first one found
        let mut forced = self.invalidated.remove(&key);
        for related in related_keys {
            let related = self.key_for(related);
            forced |= self.invalidated.remove(&related);
        }

        if !forced {
            match self.store.get(&key).await {
                Ok(Some(entry)) if !entry.is_expired(now) => {
                    let size = entry.size();
                    self.stats.record_hit(context.as_deref(), size, now);
                    crate::metrics::record_hit(size);
                    if self.verbosity.per_request() {
                        debug!("Hit {} ({} KB)", key, size / 1024);
                    }
                    Self::reply(
                        replies,
                        id,
                        Response::Image {
                            url,
                            key,
                            payload: entry.payload,
                            content_type: entry.content_type,
                            from_cache: true,
                        },
                    );
                    self.note_activity(context.as_deref());
                    return;
                }
                Ok(Some(_)) => {
                    debug!("Entry {} expired", key);
                    if let Err(e) = self.store.delete(&key).await {
                        debug!("Could not drop expired entry {}: {}", key, e);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    // Read failures degrade to a miss; the fetch still serves the bytes
                    warn!("Store read failed for {}: {}", key, e);
                    if e.is_connection_level() {
                        self.store.close().await;
                    }
                }
            }
        } else if self.verbosity.per_request() {
            debug!("Bypassing cached {} after invalidation", key);
        }

        self.stats.record_miss(context.as_deref(), now);
        crate::metrics::record_miss();
        if self.verbosity.per_request() {
            debug!("Miss {}, fetching {}", key, redact_url(&url));
        }

        self.enqueue_fetch(key, url.clone(), Waiter::Image { id, url, context }, fetches);
    }

    fn enqueue_fetch(
        &mut self,
        key: CacheKey,
        url: String,
        waiter: Waiter,
        fetches: &mut FuturesUnordered<FetchFuture>,
    ) {
        if let Some(waiters) = self.in_flight.get_mut(&key) {
            debug!("Joining in-flight fetch for {}", key);
            waiters.push(waiter);
            return;
        }

        self.in_flight.insert(key.clone(), vec![waiter]);
        let fetcher = Arc::clone(&self.fetcher);
        fetches.push(Box::pin(async move {
            let result = fetch_image(fetcher.as_ref(), &url).await;
            FetchDone { key, url, result }
        }));
    }

    async fn complete(&mut self, done: FetchDone, replies: &mpsc::UnboundedSender<Reply>) {
        let FetchDone { key, url, result } = done;
        let waiters = self.in_flight.remove(&key).unwrap_or_default();
        let discard = self.discarded.remove(&key);
        let now = self.clock.now();

        let image = match result {
            Ok(image) => image,
            Err(e) => {
                warn!("Fetch failed for {}: {}", redact_url(&url), e);
                let error = ReplyError::from(&e);
                for waiter in waiters {
                    match waiter {
                        Waiter::Image { id, url, context } => {
                            self.stats.record_error(context.as_deref(), now);
                            crate::metrics::record_lookup_error();
                            Self::reply(
                                replies,
                                id,
                                Response::ImageError {
                                    url,
                                    error: error.clone(),
                                },
                            );
                        }
                        Waiter::Update { id } => {
                            Self::reply(
                                replies,
                                id,
                                Response::Admin {
                                    command: "update_image",
                                    success: false,
                                    detail: Some(e.to_string()),
                                },
                            );
                        }
                    }
                }
                return;
            }
        };

        if discard {
            debug!("Not storing {}: removed while fetching", key);
        } else {
            self.persist(&key, &url, &image, now).await;
        }

        let size = image.bytes.len();
        for waiter in waiters {
            match waiter {
                Waiter::Image { id, url, context } => {
                    self.stats.record_bytes(context.as_deref(), size, now);
                    crate::metrics::record_fetched(size);
                    Self::reply(
                        replies,
                        id,
                        Response::Image {
                            url,
                            key: key.clone(),
                            payload: image.bytes.clone(),
                            content_type: Some(image.content_type.clone()),
                            from_cache: false,
                        },
                    );
                    self.note_activity(context.as_deref());
                }
                Waiter::Update { id } => {
                    Self::reply(
                        replies,
                        id,
                        Response::Admin {
                            command: "update_image",
                            success: true,
                            detail: Some(format!("{} refetched ({} bytes)", key, size)),
                        },
                    );
                }
            }
        }
    }

    /// Write a fetched image. Failures are logged only: the bytes are served anyway.
    async fn persist(&mut self, key: &CacheKey, url: &str, image: &FetchedImage, now: chrono::DateTime<chrono::Utc>) {
        let entry = match CacheEntry::new(key.clone(), image.bytes.clone(), url, now) {
            Ok(entry) => entry.with_content_type(Some(image.content_type.clone())),
            Err(e) => {
                warn!("Not storing {}: {}", key, e);
                return;
            }
        };
        let entry = match self.retention {
            Some(retention) => entry.with_retention(retention),
            None => entry,
        };

        match self.store.put(&entry).await {
            Ok(()) => {
                if self.verbosity.per_request() {
                    debug!("Stored {} ({} KB)", key, entry.size() / 1024);
                }
            }
            Err(e) => {
                warn!("Failed to store {}: {}", key, e);
                if e.is_connection_level() {
                    self.store.close().await;
                }
            }
        }
    }

    async fn reset(&mut self) -> Result<()> {
        self.store.close().await;

        let timeout = self.reset_timeout;
        tokio::time::timeout(timeout, self.store.destroy())
            .await
            .map_err(|_| CacheError::Timeout {
                operation: "store deletion".to_string(),
                elapsed: timeout,
            })??;

        self.invalidated.clear();
        self.discarded.extend(self.in_flight.keys().cloned());
        self.store.open().await
    }

    async fn store_report(&self) -> StoreReport {
        let location = self.store.location();
        if let Err(e) = self.store.open().await {
            return StoreReport::unavailable(location, e.to_string());
        }

        let entries = match self.store.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                let mut report = StoreReport::unavailable(location, e.to_string());
                report.available = true;
                return report;
            }
        };

        let item_count = entries.len();
        let total_bytes: u64 = entries.iter().map(|e| e.size as u64).sum();
        let mut keys: Vec<CacheKey> = entries.iter().map(|e| e.key.clone()).collect();
        keys.sort();
        keys.truncate(StoreReport::MAX_LISTED_KEYS);

        StoreReport {
            available: true,
            location,
            item_count,
            total_bytes,
            average_size: if item_count == 0 { 0 } else { total_bytes / item_count as u64 },
            oldest: entries.iter().map(|e| e.stored_at).min(),
            newest: entries.iter().map(|e| e.stored_at).max(),
            keys,
            error: None,
        }
    }

    async fn debug_report(&self) -> DebugReport {
        DebugReport {
            store: self.store_report().await,
            stats: self.stats.snapshot(),
            verbosity: self.verbosity,
            pending_invalidations: self.invalidated.len(),
            in_flight: self.in_flight.len(),
            generated_at: self.clock.now(),
        }
    }

    async fn log_inventory(&self) {
        if !self.verbosity.summaries() {
            return;
        }
        match self.store.entries().await {
            Ok(entries) => {
                let mut keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
                keys.sort_unstable();
                keys.truncate(INVENTORY_KEYS);
                info!(
                    "Image store holds {} entries (first: {})",
                    entries.len(),
                    if keys.is_empty() { "-".to_string() } else { keys.join(", ") }
                );
            }
            Err(e) => warn!("Image store inventory unavailable: {}", e),
        }
    }

    fn note_activity(&mut self, context: Option<&str>) {
        if !self.verbosity.summaries() {
            return;
        }
        if let Some(folded) = self.throttle.record() {
            let now = self.clock.now();
            let scoped = context.and_then(|c| self.stats.context(c).map(|s| s.format(Some(c), now)));
            info!(
                "{} [{} requests]",
                scoped.unwrap_or_else(|| self.stats.global().format(None, now)),
                folded
            );
        }
    }
}
