//! Reconnect scheduling for the job channel.
//!
//! By default every unexpected closure schedules one reconnect attempt
//! after a fixed 5 second delay. A multiplier above `1.0` turns the
//! schedule into exponential backoff capped at `max_delay`, and `jitter`
//! spreads attempts by a random fraction of the delay.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Tunable parameters for the reconnect schedule.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failed attempt.
    pub multiplier: f64,
    /// Random spread as a fraction of the delay, in `[0.0, 1.0]`.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 1.0,
            jitter: 0.0,
        }
    }
}

/// Calculate the next delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Spread `delay` by up to `jitter` of its length in either direction.
pub fn with_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let jitter = jitter.min(1.0);
    let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
    Duration::from_millis((delay.as_millis() as f64 * factor).max(0.0) as u64)
}

/// Sleep for `delay` unless `cancel` fires first.
///
/// Returns `false` when cancelled.
pub async fn wait_for_retry(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
