// Retry logic with bounded exponential backoff
// Author: kelexine (https://github.com/kelexine)

use backoff::{backoff::Backoff, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry settings for the direct cache's store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay_ms: u64,
    /// Cap applied to every delay.
    pub max_delay_ms: u64,
    /// Spread each delay by +/- 25% to avoid synchronized retries.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 300,
            max_delay_ms: 5_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Create exponential backoff configuration for these settings.
    pub fn backoff(&self) -> ExponentialBackoff {
        let base = Duration::from_millis(self.base_delay_ms);
        ExponentialBackoff {
            current_interval: base,
            initial_interval: base,
            randomization_factor: if self.jitter { 0.25 } else { 0.0 },
            multiplier: 2.0,
            max_interval: Duration::from_millis(self.max_delay_ms),
            max_elapsed_time: None, // bounded by max_attempts instead
            ..Default::default()
        }
    }
}

/// Nominal delay before attempt `attempt + 1`, without jitter.
///
/// `attempt` starts at 1: `base * 2^(attempt - 1)`, capped at `max_delay`.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let delay = config.base_delay_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(delay.min(config.max_delay_ms))
}

/// Execute `operation` until it succeeds, `should_retry` rejects the error,
/// or `max_attempts` is reached. The last error is returned.
///
/// `before_retry` runs after a failed attempt and before the wait, which lets
/// callers drop broken connections so the next attempt reopens them.
pub async fn with_retry<T, E, F, Fut, R, B>(
    operation_name: &str,
    config: &RetryConfig,
    mut should_retry: R,
    mut before_retry: B,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
    B: FnMut(&E),
    E: std::fmt::Display,
{
    let mut backoff = config.backoff();
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(error) => {
                if attempt >= max_attempts || !should_retry(&error) {
                    return Err(error);
                }

                before_retry(&error);
                crate::metrics::record_retry(operation_name);

                let delay = backoff
                    .next_backoff()
                    .unwrap_or_else(|| calculate_backoff(attempt, config));
                debug!(
                    "{} failed (attempt {}/{}): {}; retrying after {}ms",
                    operation_name,
                    attempt,
                    max_attempts,
                    error,
                    delay.as_millis()
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter: false,
        }
    }

    #[test]
    fn test_calculate_backoff() {
        let config = no_jitter();
        assert_eq!(calculate_backoff(1, &config).as_millis(), 100);
        assert_eq!(calculate_backoff(2, &config).as_millis(), 200);
        assert_eq!(calculate_backoff(3, &config).as_millis(), 400);
        // Capped
        assert_eq!(calculate_backoff(10, &config).as_millis(), 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32, String> = with_retry(
            "flaky",
            &no_jitter(),
            |_| true,
            |_| {},
            move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("attempt {} failed", n))
                } else {
                    Ok(n)
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let hooks = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), String> = with_retry(
            "always failing",
            &no_jitter(),
            |_| true,
            |_| {
                hooks.fetch_add(1, Ordering::SeqCst);
            },
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("nope".to_string())
            },
        )
        .await;

        assert_eq!(result.unwrap_err(), "nope");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // No hook after the final attempt
        assert_eq!(hooks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), String> = with_retry(
            "fatal",
            &no_jitter(),
            |e: &String| e != "fatal",
            |_| {},
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("fatal".to_string())
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
