//! Time source abstraction.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;

/// Source of the current time for interval and cooldown checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Clock starting at the given unix timestamp (seconds).
    #[must_use]
    pub fn at_unix(secs: i64) -> Self {
        Self::new(Utc.timestamp_opt(secs, 0).single().unwrap_or_default())
    }

    /// Shared handle, the form components take.
    #[must_use]
    pub fn shared(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self::new(start))
    }

    pub fn advance(&self, by: Duration) {
        let step = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        let mut now = self.now.write();
        *now += step;
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.write() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Time elapsed from `since` to `now`, zero if `since` lies in the future.
#[must_use]
pub fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

/// Remaining time until `interval` has passed since `since`.
#[must_use]
pub fn remaining(since: DateTime<Utc>, now: DateTime<Utc>, interval: Duration) -> Duration {
    interval.saturating_sub(elapsed(since, now))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let start = clock.now();
        clock.advance_secs(90);
        assert_eq!(elapsed(start, clock.now()), Duration::from_secs(90));
    }

    #[test]
    fn test_elapsed_never_negative() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let later = clock.now() + chrono::Duration::seconds(30);
        assert_eq!(elapsed(later, clock.now()), Duration::ZERO);
    }

    #[test]
    fn test_remaining() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let start = clock.now();
        clock.advance_secs(40);
        assert_eq!(
            remaining(start, clock.now(), Duration::from_secs(100)),
            Duration::from_secs(60)
        );
        clock.advance_secs(100);
        assert_eq!(
            remaining(start, clock.now(), Duration::from_secs(100)),
            Duration::ZERO
        );
    }
}
