//! # Polling With Exponential Backoff
//!
//! Used by `wait` to poll the coordinator until an owner approves.
//!
//! - `delay(n) = min(initial_delay_ms * multiplier^(n-1), max_delay_ms)`
//! - Deterministic jitter: `+ (n * 7919 + 104729) % (delay/4 + 1)`, re-clamped
//! - The caller decides which errors are worth another attempt
//! - At most `max_attempts` calls, each failed retryable call sleeps first

use std::future::Future;
use std::time::Duration;

// ════════════════════════════════════════════════════════════════════════════════
// TYPES
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Total calls allowed, including the first. 0 makes no call.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            multiplier: 1.5,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready { value: T, attempts: u32 },
    /// Gave up: attempts ran out or the last error was not retryable.
    GaveUp { last_error: String, attempts: u32 },
}

// ════════════════════════════════════════════════════════════════════════════════
// DELAY
// ════════════════════════════════════════════════════════════════════════════════

/// Delay before retrying after failed attempt `attempt` (1-indexed).
pub fn backoff_delay(config: &BackoffConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let raw = config.initial_delay_ms as f64 * config.multiplier.powi(exponent);
    let cap = config.max_delay_ms;

    // NaN and negatives collapse to zero; overflow collapses to the cap
    let mut delay = if raw.is_nan() || raw <= 0.0 {
        0
    } else if raw >= cap as f64 {
        cap
    } else {
        raw as u64
    };

    if config.jitter {
        let quarter = delay / 4;
        if quarter > 0 {
            let spread = (u64::from(attempt).wrapping_mul(7919).wrapping_add(104_729)) % (quarter + 1);
            delay = delay.saturating_add(spread).min(cap);
        }
    }
    Duration::from_millis(delay)
}

// ════════════════════════════════════════════════════════════════════════════════
// POLL LOOP
// ════════════════════════════════════════════════════════════════════════════════

/// Call `operation` until it succeeds, `should_retry` says stop, or the
/// attempt budget runs out.
pub async fn poll_with_backoff<F, Fut, T, E, R>(
    config: &BackoffConfig,
    mut operation: F,
    should_retry: R,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut attempts = 0u32;
    let mut last_error = String::from("no attempt made");

    while attempts < config.max_attempts {
        attempts += 1;
        match operation().await {
            Ok(value) => return PollOutcome::Ready { value, attempts },
            Err(e) => {
                last_error = e.to_string();
                if !should_retry(&e) || attempts >= config.max_attempts {
                    break;
                }
                let delay = backoff_delay(config, attempts);
                tracing::debug!(attempts, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    PollOutcome::GaveUp {
        last_error,
        attempts,
    }
}
