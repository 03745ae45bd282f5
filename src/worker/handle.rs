// Main-context handle to a running cache worker
// Author: kelexine (https://github.com/kelexine)

use super::protocol::{Command, Reply, Request, RequestId, Response};
use super::task::CacheWorker;
use crate::error::{CacheError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

type PendingMap = Mutex<HashMap<RequestId, oneshot::Sender<Response>>>;

/// Sends commands to a worker task and waits for the matching reply.
///
/// Each outstanding request owns one slot in the pending map. The slot is
/// removed when its reply is routed or when the caller stops waiting,
/// whichever comes first; replies arriving after that are dropped.
#[derive(Debug)]
pub struct WorkerHandle {
    requests: mpsc::Sender<Request>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
}

/// Removes a pending slot when the waiting future finishes or is dropped.
struct PendingSlot<'a> {
    id: RequestId,
    pending: &'a PendingMap,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

impl WorkerHandle {
    /// Spawn `worker` and its reply router on the current runtime.
    pub fn spawn(worker: CacheWorker, queue_capacity: usize) -> Self {
        let (request_tx, request_rx) = mpsc::channel(queue_capacity.max(1));
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(worker.run(request_rx, reply_tx));
        tokio::spawn(route_replies(reply_rx, Arc::clone(&pending)));

        Self {
            requests: request_tx,
            pending,
            next_id: AtomicU64::new(1),
        }
    }

    /// Send `command` and wait at most `timeout` for its reply.
    ///
    /// A timeout does not cancel the work inside the worker.
    pub async fn request(&self, command: Command, timeout: Duration) -> Result<Response> {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let operation = command.name();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _slot = PendingSlot {
            id,
            pending: self.pending.as_ref(),
        };

        let exchange = async {
            self.requests
                .send(Request { id, command })
                .await
                .map_err(|_| CacheError::WorkerUnavailable("worker task has stopped".into()))?;
            rx.await
                .map_err(|_| CacheError::WorkerUnavailable(format!("no reply to {} {}", operation, id)))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!("Request {} ({}) timed out after {:?}", id, operation, timeout);
                Err(CacheError::Timeout {
                    operation: operation.to_string(),
                    elapsed: timeout,
                })
            }
        }
    }

    /// Requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}

async fn route_replies(mut replies: mpsc::UnboundedReceiver<Reply>, pending: Arc<PendingMap>) {
    while let Some(Reply { id, response }) = replies.recv().await {
        let slot = pending.lock().remove(&id);
        match slot {
            Some(tx) => {
                if tx.send(response).is_err() {
                    debug!("Requester of {} went away", id);
                }
            }
            None => debug!("Discarding late reply {}", id),
        }
    }
}
