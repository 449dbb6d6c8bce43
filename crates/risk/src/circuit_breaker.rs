//! Drawdown circuit breaker.
//!
//! The breaker latches when total managed value falls more than the
//! configured fraction below its high-water mark. Once latched it stays
//! active until BOTH:
//! - the cooldown has elapsed since activation
//! - value has recovered to at least `recovery_bps` of the high-water mark
//!
//! The high-water mark only ever moves up.

use chrono::{DateTime, Utc};
use vault_engine_core::clock::elapsed;
use vault_engine_core::math::{bps_mul, mul_div, safe_sub, BPS};
use vault_engine_core::{CircuitBreakerSnapshot, Result, RiskConfig, VaultError};

/// Result of a drawdown check that did not trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawdownCheck {
    pub drawdown_bps: u128,
    pub high_water_mark: u128,
    /// The high-water mark moved up on this check.
    pub new_high: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DrawdownBreaker {
    active: bool,
    activated_at: Option<DateTime<Utc>>,
    high_water_mark: u128,
    last_checked_value: u128,
    last_checked_at: Option<DateTime<Utc>>,
}

impl DrawdownBreaker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn high_water_mark(&self) -> u128 {
        self.high_water_mark
    }

    /// Drawdown of `value` below the high-water mark, bps.
    ///
    /// # Errors
    ///
    /// Returns a math error on overflow.
    pub fn drawdown_bps(&self, value: u128) -> Result<u128> {
        if self.high_water_mark == 0 {
            return Ok(0);
        }
        Ok(mul_div(
            safe_sub(self.high_water_mark, value),
            BPS,
            self.high_water_mark,
        )?)
    }

    /// Raises the high-water mark if exceeded, then trips if drawdown is
    /// beyond the limit.
    ///
    /// # Errors
    ///
    /// Returns `CircuitBreakerTriggered` after latching the breaker. The
    /// latch persists; callers see the failure.
    pub fn check(
        &mut self,
        value: u128,
        now: DateTime<Utc>,
        config: &RiskConfig,
    ) -> Result<DrawdownCheck> {
        let new_high = value > self.high_water_mark;
        if new_high {
            self.high_water_mark = value;
        }

        let drawdown_bps = self.drawdown_bps(value)?;
        if drawdown_bps > config.max_drawdown_bps {
            self.trip(now);
            return Err(VaultError::CircuitBreakerTriggered {
                drawdown_bps,
                max_drawdown_bps: config.max_drawdown_bps,
            });
        }

        self.last_checked_value = value;
        self.last_checked_at = Some(now);

        Ok(DrawdownCheck {
            drawdown_bps,
            high_water_mark: self.high_water_mark,
            new_high,
        })
    }

    /// Latches the breaker. A breaker that is already active keeps its
    /// original activation time.
    pub fn trip(&mut self, now: DateTime<Utc>) {
        if !self.active {
            self.active = true;
            self.activated_at = Some(now);
        }
    }

    /// Deactivates if cooldown elapsed and value recovered. Returns whether
    /// the breaker was reset; a no-op when inactive.
    ///
    /// # Errors
    ///
    /// Returns a math error on overflow.
    pub fn try_reset(
        &mut self,
        value: u128,
        now: DateTime<Utc>,
        config: &RiskConfig,
    ) -> Result<bool> {
        if !self.active {
            return Ok(false);
        }

        let cooled_down = self
            .activated_at
            .map_or(true, |at| elapsed(at, now) >= config.breaker_cooldown);
        if !cooled_down {
            return Ok(false);
        }

        let recovery_floor = bps_mul(self.high_water_mark, config.recovery_bps)?;
        if value < recovery_floor {
            return Ok(false);
        }

        self.active = false;
        self.activated_at = None;
        Ok(true)
    }

    /// Clears the latch without the cooldown and recovery conditions. The
    /// high-water mark is untouched, so a value still below the limit trips
    /// again on the next check.
    pub fn force_reset(&mut self) {
        self.active = false;
        self.activated_at = None;
    }

    #[must_use]
    pub const fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            active: self.active,
            activated_at: self.activated_at,
            high_water_mark: self.high_water_mark,
            last_checked_value: self.last_checked_value,
            last_checked_at: self.last_checked_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn config() -> RiskConfig {
        RiskConfig::default()
            .with_max_drawdown_bps(1_000)
            .with_breaker_cooldown(Duration::from_secs(86_400))
    }

    // ==================== High-water mark ====================

    #[test]
    fn test_high_water_mark_only_rises() {
        let config = config();
        let mut breaker = DrawdownBreaker::new();

        assert!(breaker.check(1_000, t(0), &config).unwrap().new_high);
        breaker.check(950, t(1), &config).unwrap();
        assert_eq!(breaker.high_water_mark(), 1_000);
        assert!(breaker.check(1_200, t(2), &config).unwrap().new_high);
        assert_eq!(breaker.high_water_mark(), 1_200);
    }

    #[test]
    fn test_records_last_checked_value() {
        let config = config();
        let mut breaker = DrawdownBreaker::new();
        breaker.check(1_000, t(0), &config).unwrap();
        breaker.check(980, t(5), &config).unwrap();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.last_checked_value, 980);
        assert_eq!(snapshot.last_checked_at, Some(t(5)));
    }

    // ==================== Tripping ====================

    #[test]
    fn test_exactly_at_limit_does_not_trip() {
        let config = config();
        let mut breaker = DrawdownBreaker::new();
        breaker.check(1_000, t(0), &config).unwrap();

        let check = breaker.check(900, t(1), &config).unwrap();
        assert_eq!(check.drawdown_bps, 1_000);
        assert!(!breaker.is_active());
    }

    #[test]
    fn test_beyond_limit_trips_and_latches() {
        let config = config();
        let mut breaker = DrawdownBreaker::new();
        breaker.check(1_000, t(0), &config).unwrap();

        let err = breaker.check(899, t(1), &config).unwrap_err();
        assert_eq!(
            err,
            VaultError::CircuitBreakerTriggered {
                drawdown_bps: 1_010,
                max_drawdown_bps: 1_000
            }
        );
        assert!(breaker.is_active());
        assert_eq!(breaker.snapshot().activated_at, Some(t(1)));
        // Not recorded as a successful check.
        assert_eq!(breaker.snapshot().last_checked_value, 1_000);
    }

    #[test]
    fn test_zero_high_water_mark_never_trips() {
        let config = config();
        let mut breaker = DrawdownBreaker::new();
        assert_eq!(breaker.check(0, t(0), &config).unwrap().drawdown_bps, 0);
    }

    // ==================== Reset ====================

    #[test]
    fn test_reset_noop_when_inactive() {
        let config = config();
        let mut breaker = DrawdownBreaker::new();
        assert!(!breaker.try_reset(1_000, t(0), &config).unwrap());
    }

    #[test]
    fn test_cannot_reset_before_cooldown_even_if_recovered() {
        let config = config();
        let mut breaker = DrawdownBreaker::new();
        breaker.check(1_000, t(0), &config).unwrap();
        breaker.check(800, t(1), &config).unwrap_err();

        assert!(!breaker.try_reset(1_000, t(86_000), &config).unwrap());
        assert!(breaker.is_active());
    }

    #[test]
    fn test_cannot_reset_below_recovery_floor_after_cooldown() {
        let config = config();
        let mut breaker = DrawdownBreaker::new();
        breaker.check(1_000, t(0), &config).unwrap();
        breaker.check(800, t(1), &config).unwrap_err();

        assert!(!breaker.try_reset(949, t(100_000), &config).unwrap());
        assert!(breaker.is_active());
    }

    #[test]
    fn test_resets_after_cooldown_and_recovery() {
        let config = config();
        let mut breaker = DrawdownBreaker::new();
        breaker.check(1_000, t(0), &config).unwrap();
        breaker.check(800, t(1), &config).unwrap_err();

        assert!(breaker.try_reset(950, t(1 + 86_400), &config).unwrap());
        assert!(!breaker.is_active());
        assert_eq!(breaker.snapshot().activated_at, None);
    }

    #[test]
    fn test_trip_keeps_original_activation_time() {
        let mut breaker = DrawdownBreaker::new();
        breaker.trip(t(10));
        breaker.trip(t(20));
        assert_eq!(breaker.snapshot().activated_at, Some(t(10)));
    }

    #[test]
    fn test_force_reset_keeps_high_water_mark() {
        let config = config();
        let mut breaker = DrawdownBreaker::new();
        breaker.check(1_000, t(0), &config).unwrap();
        breaker.check(500, t(1), &config).unwrap_err();

        breaker.force_reset();
        assert!(!breaker.is_active());
        assert_eq!(breaker.high_water_mark(), 1_000);
        assert!(breaker.check(500, t(2), &config).is_err());
        assert!(breaker.is_active());
    }
}
