// Cache data model: keys, entries and statistics
// Author: kelexine (https://github.com/kelexine)

pub mod key;
pub mod models;
pub mod stats;

pub use key::{normalize_url, CacheKey, KeyStrategy};
pub use models::CacheEntry;
pub use stats::{CacheStatistics, StatsRegistry, StatsSnapshot};
