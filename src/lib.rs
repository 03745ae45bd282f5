// imgcache - Persistent image cache with an isolated worker task and graceful fallback
// Author: kelexine (https://github.com/kelexine)

pub mod blob;
pub mod cache;
pub mod client;
pub mod config;
pub mod direct;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod network;
pub mod store;
pub mod utils;
pub mod worker;

pub use blob::{BlobHandle, BlobRegistry};
pub use cache::{CacheEntry, CacheKey, KeyStrategy};
pub use client::{CacheClient, FetchOutcome};
pub use config::CacheSettings;
pub use direct::DirectCache;
pub use error::{CacheError, Result};
