//! Human-paced delays between storefront actions.
//!
//! Two tiers: a short jitter between discrete actions on one order, and a
//! long jitter between distinct orders or listing pages.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Delay ranges in milliseconds, as `[min, max]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PacingConfig {
    #[serde(default = "default_short_delay")]
    pub short_delay_ms: [u64; 2],
    #[serde(default = "default_long_delay")]
    pub long_delay_ms: [u64; 2],
}

fn default_short_delay() -> [u64; 2] {
    [500, 5_000]
}

fn default_long_delay() -> [u64; 2] {
    [10_000, 30_000]
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            short_delay_ms: default_short_delay(),
            long_delay_ms: default_long_delay(),
        }
    }
}

/// Draws randomized delays from the configured ranges and sleeps them.
#[derive(Debug, Clone)]
pub struct Pacer {
    short: [u64; 2],
    long: [u64; 2],
}

impl Pacer {
    pub fn new(config: &PacingConfig) -> Self {
        Self {
            short: config.short_delay_ms,
            long: config.long_delay_ms,
        }
    }

    /// A pacer that never sleeps (tests, dry runs).
    pub fn disabled() -> Self {
        Self {
            short: [0, 0],
            long: [0, 0],
        }
    }

    pub fn short_delay(&self) -> Duration {
        sample(self.short)
    }

    pub fn long_delay(&self) -> Duration {
        sample(self.long)
    }

    /// Sleep a short jitter between actions on one order.
    pub async fn short(&self, reason: &str) {
        pause(self.short_delay(), reason).await;
    }

    /// Sleep a long jitter between orders or pages.
    pub async fn long(&self, reason: &str) {
        pause(self.long_delay(), reason).await;
    }
}

fn sample([min, max]: [u64; 2]) -> Duration {
    if max <= min {
        return Duration::from_millis(min);
    }
    Duration::from_millis(rand::rng().random_range(min..=max))
}

async fn pause(delay: Duration, reason: &str) {
    if delay.is_zero() {
        return;
    }
    debug!("Delaying {:.2}s: {}", delay.as_secs_f64(), reason);
    tokio::time::sleep(delay).await;
}
