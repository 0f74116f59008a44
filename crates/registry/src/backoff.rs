use std::time::Duration;

use chrono::{DateTime, Utc};

/// Exponential backoff applied after consecutive failures.
///
/// The n-th consecutive failure (n >= 1) waits
/// `min(base * 2^min(n - 1, cap_exponent), max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap_exponent: u32,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap_exponent: u32, max_delay: Duration) -> Self {
        Self {
            base,
            cap_exponent,
            max_delay,
        }
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    ///
    /// Zero failures means no delay.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let exponent = (failures - 1).min(self.cap_exponent);
        let multiplier = 2u32.saturating_pow(exponent);
        self.base.saturating_mul(multiplier).min(self.max_delay)
    }

    /// Instant at which a unit with `failures` consecutive failures becomes due.
    pub fn next_attempt_at(&self, now: DateTime<Utc>, failures: u32) -> DateTime<Utc> {
        add_duration(now, self.delay(failures))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            cap_exponent: 6,
            max_delay: Duration::from_secs(3600),
        }
    }
}

/// Adds a std duration to a timestamp, saturating at the latest representable instant.
pub(crate) fn add_duration(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
