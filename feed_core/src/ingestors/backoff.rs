//! # Reconnect Backoff
//!
//! `delay(n) = min(base * 2^n, max) + uniform(0, jitter)` where `n` counts the
//! consecutive failed attempts so far. The jitter keeps a fleet of displays
//! from reconnecting in lockstep after a server restart.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    /// Give up after this many consecutive failures. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 2000,
            max_delay_ms: 4000,
            jitter_ms: 1000,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// The exponential part of the delay, capped at `max_delay_ms`.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Full delay for the given attempt, jitter included.
    pub fn delay_for_attempt<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rng.random_range(0..=self.jitter_ms)
        };
        self.capped_delay(attempt) + Duration::from_millis(jitter)
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }
}
