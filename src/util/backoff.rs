//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff schedule applied after consecutive failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    /// Delay after the first failure, in milliseconds.
    pub initial_ms: u64,
    /// Upper bound for any delay, in milliseconds.
    pub max_ms: u64,
    pub multiplier: f64,
    /// Randomize each delay to 75%–125%.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 60_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay to observe after `failures` consecutive failures (0 means none).
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(32) as i32;
        let base = (self.initial_ms as f64 * self.multiplier.powi(exponent)).min(self.max_ms as f64);
        let factor = if self.jitter {
            rand::thread_rng().gen_range(0.75..=1.25)
        } else {
            1.0
        };
        Duration::from_millis((base * factor).min(self.max_ms as f64) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> Backoff {
        Backoff {
            jitter: false,
            ..Backoff::default()
        }
    }

    #[test]
    fn no_failures_means_no_delay() {
        assert_eq!(fixed().delay_for(0), Duration::ZERO);
    }

    #[test]
    fn delay_doubles_until_capped() {
        let backoff = fixed();
        assert_eq!(backoff.delay_for(1), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(4));
        assert_eq!(backoff.delay_for(10), Duration::from_secs(60));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let backoff = Backoff::default();
        for _ in 0..100 {
            let delay = backoff.delay_for(2);
            assert!(delay >= Duration::from_millis(1_500));
            assert!(delay <= Duration::from_millis(2_500));
        }
    }
}
