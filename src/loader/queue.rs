// Priority loading queue in front of the cache client
// Author: kelexine (https://github.com/kelexine)

use crate::client::{CacheClient, FetchOutcome};
use crate::config::LoaderConfig;
use futures::future::join_all;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Load priority. Lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// On screen now.
    Visible = 0,
    Normal = 1,
    /// Likely needed later.
    Prefetch = 2,
}

struct QueuedLoad {
    priority: Priority,
    seq: u64,
    url: String,
    context: Option<String>,
    enqueued_at: Instant,
    reply: oneshot::Sender<FetchOutcome>,
}

// BinaryHeap is a max-heap: the "greatest" item is the lowest priority
// value, then the oldest sequence number.
impl Ord for QueuedLoad {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedLoad {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedLoad {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedLoad {}

#[derive(Default)]
struct QueueState {
    waiting: BinaryHeap<QueuedLoad>,
    active: usize,
    next_seq: u64,
}

struct Inner {
    client: Arc<CacheClient>,
    concurrency: usize,
    queue_timeout: Duration,
    state: Mutex<QueueState>,
}

/// Bounded-concurrency image loading with priorities.
///
/// At most `concurrency` loads run at once; waiting loads start in priority
/// order, FIFO within a priority. A load that waited longer than the queue
/// timeout, or whose fetch exceeds it, resolves to the original URL.
#[derive(Clone)]
pub struct LoadQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LoadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("LoadQueue")
            .field("concurrency", &self.inner.concurrency)
            .field("waiting", &state.waiting.len())
            .field("active", &state.active)
            .finish()
    }
}

impl LoadQueue {
    pub fn new(client: Arc<CacheClient>, config: &LoaderConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                concurrency: config.concurrency.max(1),
                queue_timeout: config.queue_timeout(),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub async fn load(&self, url: &str, context: Option<&str>, priority: Priority) -> FetchOutcome {
        if url.is_empty() {
            return FetchOutcome::Original(String::new());
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiting.push(QueuedLoad {
                priority,
                seq,
                url: url.to_string(),
                context: context.map(str::to_string),
                enqueued_at: Instant::now(),
                reply: tx,
            });
        }
        pump(&self.inner);

        rx.await.unwrap_or_else(|_| FetchOutcome::Original(url.to_string()))
    }

    pub async fn load_visible(&self, url: &str, context: Option<&str>) -> FetchOutcome {
        self.load(url, context, Priority::Visible).await
    }

    /// Load every non-empty URL; the result maps each URL to its outcome.
    pub async fn load_batch(
        &self,
        urls: &[String],
        context: Option<&str>,
        priority: Priority,
    ) -> HashMap<String, FetchOutcome> {
        let loads = urls
            .iter()
            .filter(|url| !url.is_empty())
            .map(|url| async move { (url.clone(), self.load(url, context, priority).await) });
        join_all(loads).await.into_iter().collect()
    }

    pub async fn preload_future(&self, urls: &[String], context: Option<&str>) -> HashMap<String, FetchOutcome> {
        self.load_batch(urls, context, Priority::Prefetch).await
    }

    /// Loads waiting for a slot.
    pub fn waiting(&self) -> usize {
        self.inner.state.lock().waiting.len()
    }

    /// Loads currently running.
    pub fn active(&self) -> usize {
        self.inner.state.lock().active
    }
}

/// Start waiting loads while slots are free.
fn pump(inner: &Arc<Inner>) {
    let mut state = inner.state.lock();
    while state.active < inner.concurrency {
        let Some(item) = state.waiting.pop() else {
            break;
        };

        if item.enqueued_at.elapsed() > inner.queue_timeout {
            warn!("Queue timeout for {}", crate::utils::logging::redact_url(&item.url));
            let _ = item.reply.send(FetchOutcome::Original(item.url));
            continue;
        }

        state.active += 1;
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let QueuedLoad { url, context, reply, .. } = item;
            let outcome = match tokio::time::timeout(
                inner.queue_timeout,
                inner.client.fetch(&url, context.as_deref(), &[]),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!("Load of {} exceeded the queue timeout", crate::utils::logging::redact_url(&url));
                    FetchOutcome::Original(url)
                }
            };
            let _ = reply.send(outcome);

            inner.state.lock().active -= 1;
            pump(&inner);
        });
    }
}
