// Typed messages exchanged with the cache worker
// Author: kelexine (https://github.com/kelexine)

use crate::cache::{CacheKey, StatsSnapshot};
use crate::error::CacheError;
use crate::utils::logging::Verbosity;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Correlates a reply with the request that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Serve an image, from the store when possible.
    GetImage {
        url: String,
        context: Option<String>,
        /// Further keys (or URLs) whose pending invalidation also forces a refetch.
        related_keys: Vec<String>,
    },
    /// Force the next lookup of `url` to refetch. The entry is kept.
    InvalidateImage { url: String },
    RemoveImage { url: String },
    /// Remove, then refetch and store.
    UpdateImage { url: String },
    /// Delete the whole store and reopen it empty.
    ResetCache,
    CheckAccess,
    DebugCache,
    SetLogConfig { verbosity: Verbosity },
    /// Reset one context window, or everything when `None`.
    ResetStats { context: Option<String> },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetImage { .. } => "get_image",
            Command::InvalidateImage { .. } => "invalidate_image",
            Command::RemoveImage { .. } => "remove_image",
            Command::UpdateImage { .. } => "update_image",
            Command::ResetCache => "reset_cache",
            Command::CheckAccess => "check_access",
            Command::DebugCache => "debug_cache",
            Command::SetLogConfig { .. } => "set_log_config",
            Command::ResetStats { .. } => "reset_stats",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub id: RequestId,
    pub response: Response,
}

#[derive(Debug, Clone)]
pub enum Response {
    Image {
        url: String,
        key: CacheKey,
        payload: Bytes,
        content_type: Option<String>,
        from_cache: bool,
    },
    ImageError {
        url: String,
        error: ReplyError,
    },
    Admin {
        command: &'static str,
        success: bool,
        detail: Option<String>,
    },
    Debug {
        report: Box<DebugReport>,
    },
}

/// Error as carried across the reply channel.
///
/// One fetch failure is delivered to every coalesced waiter, so the error
/// must be cloneable; `CacheError` is not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyError {
    pub kind: &'static str,
    pub message: String,
}

impl From<&CacheError> for ReplyError {
    fn from(error: &CacheError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for ReplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

/// State of the persistent store as seen by the worker.
#[derive(Debug, Clone, Serialize)]
pub struct StoreReport {
    pub available: bool,
    pub location: String,
    pub item_count: usize,
    pub total_bytes: u64,
    pub average_size: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    /// At most [`StoreReport::MAX_LISTED_KEYS`] keys, sorted.
    pub keys: Vec<CacheKey>,
    pub error: Option<String>,
}

impl StoreReport {
    pub const MAX_LISTED_KEYS: usize = 20;

    pub fn unavailable(location: String, error: String) -> Self {
        Self {
            available: false,
            location,
            item_count: 0,
            total_bytes: 0,
            average_size: 0,
            oldest: None,
            newest: None,
            keys: Vec::new(),
            error: Some(error),
        }
    }
}

/// Everything `DebugCache` reports.
#[derive(Debug, Clone, Serialize)]
pub struct DebugReport {
    pub store: StoreReport,
    pub stats: StatsSnapshot,
    pub verbosity: Verbosity,
    pub pending_invalidations: usize,
    pub in_flight: usize,
    pub generated_at: DateTime<Utc>,
}
