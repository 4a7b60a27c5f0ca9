//! Exponential backoff with optional jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Delay before retry number `retry` (0-based: the first retry is 0).
///
/// `min(initial * multiplier^retry, max)`, plus up to 10% jitter when enabled.
/// Jitter never pushes the delay past `max_backoff_ms`.
pub fn calculate_backoff(retry: u32, config: &RetryConfig) -> Duration {
    let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
    let raw = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(exponent);
    let max = config.max_backoff_ms;
    let capped = if raw.is_finite() && raw < max as f64 {
        raw as u64
    } else {
        max
    };

    if !config.jitter {
        return Duration::from_millis(capped);
    }

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped.saturating_add(jitter).min(max))
}
