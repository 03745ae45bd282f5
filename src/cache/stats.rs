// Hit/miss statistics, global and per context
// Author: kelexine (https://github.com/kelexine)

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Counters for one statistics window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatistics {
    /// Images served from the store.
    pub hits: u64,
    /// Images that had to be fetched from the origin.
    pub misses: u64,
    /// Failed lookups (origin errors, rejected content).
    pub errors: u64,
    /// Payload bytes delivered.
    pub bytes: u64,
    /// When this window started.
    pub window_start: DateTime<Utc>,
}

impl CacheStatistics {
    pub fn new(window_start: DateTime<Utc>) -> Self {
        Self {
            hits: 0,
            misses: 0,
            errors: 0,
            bytes: 0,
            window_start,
        }
    }

    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Hit percentage, rounded, 0 when nothing was looked up.
    pub fn hit_rate(&self) -> u32 {
        let total = self.lookups();
        if total == 0 {
            return 0;
        }
        ((self.hits as f64 / total as f64) * 100.0).round() as u32
    }

    /// One-line human summary, e.g. `[tier-list] Cache: 75% hits (3/4) - 1.2MB - 42s`.
    pub fn format(&self, context: Option<&str>, now: DateTime<Utc>) -> String {
        let prefix = context.map(|c| format!("[{}] ", c)).unwrap_or_default();
        let size_mb = (self.bytes as f64 / (1024.0 * 1024.0) * 10.0).round() / 10.0;
        let seconds = (now - self.window_start).num_seconds().max(0);
        format!(
            "{}Cache: {}% hits ({}/{}) - {}MB - {}s",
            prefix,
            self.hit_rate(),
            self.hits,
            self.lookups(),
            size_mb,
            seconds
        )
    }
}

/// Global counters plus one window per context.
///
/// Owned by the worker task; no interior locking.
#[derive(Debug, Clone)]
pub struct StatsRegistry {
    global: CacheStatistics,
    contexts: HashMap<String, CacheStatistics>,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub global: CacheStatistics,
    pub contexts: BTreeMap<String, CacheStatistics>,
}

impl StatsRegistry {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            global: CacheStatistics::new(now),
            contexts: HashMap::new(),
        }
    }

    fn context_mut(&mut self, context: &str, now: DateTime<Utc>) -> &mut CacheStatistics {
        self.contexts
            .entry(context.to_string())
            .or_insert_with(|| CacheStatistics::new(now))
    }

    fn apply(&mut self, context: Option<&str>, now: DateTime<Utc>, f: impl Fn(&mut CacheStatistics)) {
        f(&mut self.global);
        if let Some(context) = context.filter(|c| !c.is_empty()) {
            f(self.context_mut(context, now));
        }
    }

    pub fn record_hit(&mut self, context: Option<&str>, bytes: usize, now: DateTime<Utc>) {
        self.apply(context, now, |s| {
            s.hits += 1;
            s.bytes += bytes as u64;
        });
    }

    pub fn record_miss(&mut self, context: Option<&str>, now: DateTime<Utc>) {
        self.apply(context, now, |s| s.misses += 1);
    }

    /// Bytes of a payload fetched after a miss.
    pub fn record_bytes(&mut self, context: Option<&str>, bytes: usize, now: DateTime<Utc>) {
        self.apply(context, now, |s| s.bytes += bytes as u64);
    }

    pub fn record_error(&mut self, context: Option<&str>, now: DateTime<Utc>) {
        self.apply(context, now, |s| s.errors += 1);
    }

    pub fn global(&self) -> &CacheStatistics {
        &self.global
    }

    pub fn context(&self, context: &str) -> Option<&CacheStatistics> {
        self.contexts.get(context)
    }

    /// Reset one context window. Unknown contexts start a fresh window.
    pub fn reset_context(&mut self, context: &str, now: DateTime<Utc>) {
        self.contexts
            .insert(context.to_string(), CacheStatistics::new(now));
    }

    /// Reset the global window and every context window.
    pub fn reset_all(&mut self, now: DateTime<Utc>) {
        self.global = CacheStatistics::new(now);
        for stats in self.contexts.values_mut() {
            *stats = CacheStatistics::new(now);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            global: self.global.clone(),
            contexts: self
                .contexts
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_global_and_context_counters() {
        let now = Utc::now();
        let mut stats = StatsRegistry::new(now);

        stats.record_miss(Some("builds"), now);
        stats.record_bytes(Some("builds"), 2048, now);
        stats.record_hit(Some("builds"), 2048, now);
        stats.record_hit(None, 10, now);
        stats.record_error(Some("tier-list"), now);

        assert_eq!(stats.global().hits, 2);
        assert_eq!(stats.global().misses, 1);
        assert_eq!(stats.global().errors, 1);
        assert_eq!(stats.global().bytes, 4106);

        let builds = stats.context("builds").unwrap();
        assert_eq!((builds.hits, builds.misses, builds.bytes), (1, 1, 4096));
        assert_eq!(stats.context("tier-list").unwrap().errors, 1);
        assert!(stats.context("unknown").is_none());
    }

    #[test]
    fn test_reset_context_leaves_others() {
        let now = Utc::now();
        let mut stats = StatsRegistry::new(now);
        stats.record_hit(Some("a"), 1, now);
        stats.record_hit(Some("b"), 1, now);

        let later = now + Duration::seconds(5);
        stats.reset_context("a", later);

        assert_eq!(stats.context("a").unwrap().hits, 0);
        assert_eq!(stats.context("a").unwrap().window_start, later);
        assert_eq!(stats.context("b").unwrap().hits, 1);
        assert_eq!(stats.global().hits, 2);

        stats.reset_all(later);
        assert_eq!(stats.global().hits, 0);
        assert_eq!(stats.context("b").unwrap().hits, 0);
    }

    #[test]
    fn test_format_summary() {
        let start = Utc::now();
        let mut stats = CacheStatistics::new(start);
        stats.hits = 3;
        stats.misses = 1;
        stats.bytes = 1_258_291; // 1.2MB

        let line = stats.format(Some("tier-list"), start + Duration::seconds(42));
        assert_eq!(line, "[tier-list] Cache: 75% hits (3/4) - 1.2MB - 42s");
        assert_eq!(CacheStatistics::new(start).hit_rate(), 0);
    }
}
