//! Configuration data structures for the image cache.
//!
//! This module defines the schema for the cache settings: where the
//! persistent store lives, how the worker behaves, how long the client
//! waits before falling back, and how the direct cache retries.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::cache::KeyStrategy;
use crate::utils::logging::Verbosity;
use crate::utils::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// The root configuration object for the cache subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheSettings {
    /// Persistent store location and maintenance bounds.
    #[serde(default)]
    pub store: StoreConfig,

    /// Background worker behaviour.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Client gateway timeouts and failure flag.
    #[serde(default)]
    pub client: ClientConfig,

    /// Direct (worker-less) cache settings.
    #[serde(default)]
    pub direct: DirectConfig,

    /// Origin fetch settings.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Priority queue and preloading settings.
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the on-disk store used by the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory of the store.
    /// Default: `<cache dir>/imgcache/images`
    #[serde(default = "default_store_root")]
    pub root: PathBuf,

    /// Upper bound for deleting the whole store during a reset.
    /// Default: `5000`
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_ms: u64,
}

/// Settings for the background cache worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Capacity of the request channel feeding the worker.
    /// Default: `64`
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How URLs are reduced to cache keys.
    /// Default: `file_name`
    #[serde(default = "default_worker_key_strategy")]
    pub key_strategy: KeyStrategy,

    /// Initial log verbosity of the worker.
    /// Default: `summary`
    #[serde(default)]
    pub verbosity: Verbosity,

    /// Minimum spacing between two coalesced summary lines.
    /// Default: `2000`
    #[serde(default = "default_summary_interval")]
    pub summary_interval_ms: u64,

    /// Optional retention window for worker entries. Unset means entries
    /// never expire on this path.
    #[serde(default)]
    pub retention_ms: Option<u64>,
}

/// Settings for the client gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Round-trip bound for a single worker request.
    /// Default: `5000`
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Minimum spacing between two availability probes. `0` probes on every call.
    /// Default: `0`
    #[serde(default)]
    pub probe_interval_ms: u64,

    /// Location of the durable failure flag. Unset keeps the flag in memory.
    /// Default: `<cache dir>/imgcache/store-failed.flag`
    #[serde(default = "default_failure_flag_path")]
    pub failure_flag_path: Option<PathBuf>,
}

/// Settings for the direct cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectConfig {
    /// Root directory of the direct store.
    /// Default: `<cache dir>/imgcache/direct`
    #[serde(default = "default_direct_root")]
    pub root: PathBuf,

    /// How long an entry stays valid after being written.
    /// Default: 7 days
    #[serde(default = "default_direct_retention")]
    pub retention_ms: u64,

    /// How URLs are reduced to cache keys.
    /// Default: `full_path`
    #[serde(default = "default_direct_key_strategy")]
    pub key_strategy: KeyStrategy,

    /// Backoff applied to every store operation.
    #[serde(default = "default_direct_retry")]
    pub retry: RetryConfig,
}

/// Settings for origin fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Whole-request timeout in seconds.
    /// Default: `30`
    #[serde(default = "default_network_timeout")]
    pub timeout_secs: u64,

    /// Connection timeout in seconds.
    /// Default: `10`
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// User agent sent with every fetch.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Accept header sent with every fetch.
    #[serde(default = "default_accept")]
    pub accept: String,
}

/// Settings for the loading queue and the preloader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Maximum number of queued loads running at once.
    /// Default: `3`
    #[serde(default = "default_loader_concurrency")]
    pub concurrency: usize,

    /// Loads waiting longer than this resolve to the original URL.
    /// Default: `15000`
    #[serde(default = "default_queue_timeout")]
    pub queue_timeout_ms: u64,

    /// Maximum number of concurrent preload fetches.
    /// Default: `5`
    #[serde(default = "default_preload_concurrency")]
    pub preload_concurrency: usize,
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `info`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`, `compact`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl StoreConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl WorkerConfig {
    pub fn summary_interval(&self) -> Duration {
        Duration::from_millis(self.summary_interval_ms)
    }

    pub fn retention(&self) -> Option<chrono::Duration> {
        self.retention_ms
            .map(|ms| chrono::Duration::milliseconds(ms.min(i64::MAX as u64) as i64))
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

impl DirectConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.retention_ms.min(i64::MAX as u64) as i64)
    }
}

impl LoaderConfig {
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }
}

// Default trait implementations linking to custom logic

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
            reset_timeout_ms: default_reset_timeout(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            key_strategy: default_worker_key_strategy(),
            verbosity: Verbosity::default(),
            summary_interval_ms: default_summary_interval(),
            retention_ms: None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            probe_interval_ms: 0,
            failure_flag_path: default_failure_flag_path(),
        }
    }
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            root: default_direct_root(),
            retention_ms: default_direct_retention(),
            key_strategy: default_direct_key_strategy(),
            retry: default_direct_retry(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_network_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            user_agent: default_user_agent(),
            accept: default_accept(),
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            concurrency: default_loader_concurrency(),
            queue_timeout_ms: default_queue_timeout(),
            preload_concurrency: default_preload_concurrency(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Helper functions for serde defaults and shared constants
fn cache_base_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("imgcache")
}

fn default_store_root() -> PathBuf {
    cache_base_dir().join("images")
}

fn default_direct_root() -> PathBuf {
    cache_base_dir().join("direct")
}

fn default_failure_flag_path() -> Option<PathBuf> {
    Some(cache_base_dir().join("store-failed.flag"))
}

fn default_reset_timeout() -> u64 {
    5_000
}

fn default_queue_capacity() -> usize {
    64
}

fn default_worker_key_strategy() -> KeyStrategy {
    KeyStrategy::FileName
}

fn default_direct_key_strategy() -> KeyStrategy {
    KeyStrategy::FullPath
}

fn default_summary_interval() -> u64 {
    2_000
}

fn default_request_timeout() -> u64 {
    5_000
}

fn default_direct_retention() -> u64 {
    7 * 24 * 60 * 60 * 1000 // 1 week
}

fn default_direct_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        base_delay_ms: 100,
        max_delay_ms: 5_000,
        jitter: false,
    }
}

fn default_network_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("imgcache/{}", env!("CARGO_PKG_VERSION"))
}

fn default_accept() -> String {
    "image/avif,image/webp,image/png,image/jpeg,image/gif,image/*;q=0.8".to_string()
}

fn default_loader_concurrency() -> usize {
    3
}

fn default_queue_timeout() -> u64 {
    15_000
}

fn default_preload_concurrency() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
