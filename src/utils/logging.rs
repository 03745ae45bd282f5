//! Structured logging and verbosity control for the cache.
//!
//! This module configures the `tracing` ecosystem for the host application
//! and provides the worker's three-level verbosity switch together with a
//! small throttle that coalesces per-request activity into periodic summary
//! lines instead of flooding the output.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::config::LoggingConfig;
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global tracing subscriber.
///
/// Supports three output formats:
/// - `json`: Structured JSON logs for production ingestion.
/// - `compact`: Single-line human-readable output.
/// - `pretty` (default): Human-readable, multi-line output for development.
///
/// Log levels are controlled via the `RUST_LOG` environment variable or
/// the provided `LoggingConfig`.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let installed = match config.format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        "compact" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };

    installed.map_err(|e| CacheError::Config(format!("Failed to install subscriber: {}", e)))
}

/// Worker log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    /// Only failures are reported.
    Silent,
    /// Coalesced, rate-limited activity summaries.
    #[default]
    Summary,
    /// One line per request in addition to summaries.
    Detailed,
}

impl Verbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Silent => "silent",
            Verbosity::Summary => "summary",
            Verbosity::Detailed => "detailed",
        }
    }

    pub fn summaries(&self) -> bool {
        !matches!(self, Verbosity::Silent)
    }

    pub fn per_request(&self) -> bool {
        matches!(self, Verbosity::Detailed)
    }
}

impl std::str::FromStr for Verbosity {
    type Err = CacheError;

    /// Accepts the level names plus the aliases used by older settings panels
    /// (`none`, `minimal`, `verbose`).
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "silent" | "none" => Ok(Verbosity::Silent),
            "summary" | "minimal" => Ok(Verbosity::Summary),
            "detailed" | "verbose" => Ok(Verbosity::Detailed),
            other => Err(CacheError::Config(format!("Unknown verbosity: {}", other))),
        }
    }
}

/// Counts activity between two summary lines and decides when the next
/// line may be emitted.
#[derive(Debug)]
pub struct SummaryThrottle {
    min_interval: Duration,
    last_emit: Option<Instant>,
    suppressed: u64,
}

impl SummaryThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_emit: None,
            suppressed: 0,
        }
    }

    /// Record one event. Returns `Some(n)` when a summary should be emitted now,
    /// where `n` is the number of events folded into it (this one included).
    pub fn record(&mut self) -> Option<u64> {
        self.suppressed += 1;
        let now = Instant::now();
        let due = match self.last_emit {
            None => true,
            Some(last) => now.duration_since(last) >= self.min_interval,
        };
        if !due {
            return None;
        }
        self.last_emit = Some(now);
        Some(std::mem::take(&mut self.suppressed))
    }

    /// Events recorded since the last emitted summary.
    pub fn pending(&self) -> u64 {
        self.suppressed
    }

    pub fn reset(&mut self) {
        self.last_emit = None;
        self.suppressed = 0;
    }
}

/// Strips query string and fragment from a URL before it is logged.
///
/// Signed CDN URLs carry tokens in the query; those must never reach log sinks.
pub fn redact_url(input: &str) -> &str {
    let end = input.find(['?', '#']).unwrap_or(input.len());
    &input[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("https://cdn.example.com/a/b.png?token=secret"),
            "https://cdn.example.com/a/b.png"
        );
        assert_eq!(redact_url("https://cdn.example.com/a.png#frag"), "https://cdn.example.com/a.png");
        assert_eq!(redact_url("plain.png"), "plain.png");
    }

    #[test]
    fn test_verbosity_aliases() {
        assert_eq!("none".parse::<Verbosity>().unwrap(), Verbosity::Silent);
        assert_eq!("minimal".parse::<Verbosity>().unwrap(), Verbosity::Summary);
        assert_eq!("Verbose".parse::<Verbosity>().unwrap(), Verbosity::Detailed);
        assert!("loud".parse::<Verbosity>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_coalesces_bursts() {
        let mut throttle = SummaryThrottle::new(Duration::from_secs(2));

        assert_eq!(throttle.record(), Some(1));
        assert_eq!(throttle.record(), None);
        assert_eq!(throttle.record(), None);
        assert_eq!(throttle.pending(), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(throttle.record(), Some(3));
        assert_eq!(throttle.pending(), 0);
    }
}
