//! Volatility tracking and classification.
//!
//! The tracker keeps a smoothed accumulator of absolute price changes in
//! basis points. Readings that arrive more than one window after the
//! previous one replace the accumulator; closer readings are averaged in
//! with factor ½. The accumulator is then bucketed into a [`VolatilityBand`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vault_engine_core::clock::elapsed;
use vault_engine_core::math::{abs_diff, checked_add, mul_div, BPS};
use vault_engine_core::{AllocationTargets, Result, RiskConfig, VolatilityBand, VolatilitySnapshot};

/// Outcome of one volatility update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolatilityUpdate {
    pub previous: VolatilityBand,
    pub current: VolatilityBand,
    /// Absolute change of this reading against the reference price, bps.
    pub change_bps: u128,
    pub accumulator_bps: u128,
}

impl VolatilityUpdate {
    #[must_use]
    pub fn band_changed(&self) -> bool {
        self.previous != self.current
    }
}

/// Classifies an accumulator value against the configured cutoffs.
#[must_use]
pub fn classify(accumulator_bps: u128, config: &RiskConfig) -> VolatilityBand {
    if accumulator_bps < config.medium_volatility_bps {
        VolatilityBand::Low
    } else if accumulator_bps < config.high_volatility_bps {
        VolatilityBand::Medium
    } else if accumulator_bps < config.extreme_volatility_bps {
        VolatilityBand::High
    } else {
        VolatilityBand::Extreme
    }
}

/// Recommended safe/growth split for a band.
#[must_use]
pub fn allocation_for(band: VolatilityBand) -> AllocationTargets {
    let safe_bps = match band {
        VolatilityBand::Low => 7_000,
        VolatilityBand::Medium => 8_000,
        VolatilityBand::High => 9_000,
        VolatilityBand::Extreme => BPS,
    };
    // Every table entry is <= BPS, so from_safe cannot fail here.
    AllocationTargets::from_safe(safe_bps).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct VolatilityTracker {
    band: VolatilityBand,
    accumulator_bps: u128,
    last_price: u128,
    last_update: Option<DateTime<Utc>>,
}

impl Default for VolatilityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl VolatilityTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            band: VolatilityBand::Low,
            accumulator_bps: 0,
            last_price: 0,
            last_update: None,
        }
    }

    /// Folds a validated price into the accumulator.
    ///
    /// The reference price and timestamp always advance, even when the band
    /// does not change. The first observation only seeds the reference.
    ///
    /// # Errors
    ///
    /// Returns a math error if the change computation overflows.
    pub fn update(
        &mut self,
        price: u128,
        now: DateTime<Utc>,
        config: &RiskConfig,
    ) -> Result<VolatilityUpdate> {
        let previous = self.band;

        let change_bps = if self.last_price == 0 {
            0
        } else {
            mul_div(abs_diff(price, self.last_price), BPS, self.last_price)?
        };

        if self.last_price != 0 {
            let window_passed = self
                .last_update
                .map_or(true, |last| elapsed(last, now) > config.volatility_window);
            self.accumulator_bps = if window_passed {
                change_bps
            } else {
                checked_add(self.accumulator_bps, change_bps)? / 2
            };
            self.band = classify(self.accumulator_bps, config);
        }

        self.last_price = price;
        self.last_update = Some(now);

        Ok(VolatilityUpdate {
            previous,
            current: self.band,
            change_bps,
            accumulator_bps: self.accumulator_bps,
        })
    }

    #[must_use]
    pub const fn band(&self) -> VolatilityBand {
        self.band
    }

    #[must_use]
    pub const fn snapshot(&self) -> VolatilitySnapshot {
        VolatilitySnapshot {
            band: self.band,
            accumulator_bps: self.accumulator_bps,
            last_price: self.last_price,
            last_update: self.last_update,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::time::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    // ==================== Classification ====================

    #[test]
    fn test_classify_thresholds() {
        let config = RiskConfig::default();
        assert_eq!(classify(0, &config), VolatilityBand::Low);
        assert_eq!(classify(199, &config), VolatilityBand::Low);
        assert_eq!(classify(200, &config), VolatilityBand::Medium);
        assert_eq!(classify(499, &config), VolatilityBand::Medium);
        assert_eq!(classify(500, &config), VolatilityBand::High);
        assert_eq!(classify(999, &config), VolatilityBand::High);
        assert_eq!(classify(1_000, &config), VolatilityBand::Extreme);
    }

    #[test]
    fn test_allocation_table() {
        assert_eq!(allocation_for(VolatilityBand::Low).safe_bps(), 7_000);
        assert_eq!(allocation_for(VolatilityBand::Medium).safe_bps(), 8_000);
        assert_eq!(allocation_for(VolatilityBand::High).safe_bps(), 9_000);
        assert_eq!(allocation_for(VolatilityBand::Extreme).safe_bps(), 10_000);
        assert_eq!(allocation_for(VolatilityBand::Extreme).growth_bps(), 0);
    }

    // ==================== Updates ====================

    #[test]
    fn test_first_observation_seeds_reference() {
        let config = RiskConfig::default();
        let mut tracker = VolatilityTracker::new();

        let update = tracker.update(1_000, t(0), &config).unwrap();
        assert_eq!(update.change_bps, 0);
        assert_eq!(update.accumulator_bps, 0);
        assert!(!update.band_changed());
        assert_eq!(tracker.snapshot().last_price, 1_000);
        assert_eq!(tracker.snapshot().last_update, Some(t(0)));
    }

    #[test]
    fn test_reading_within_window_is_averaged() {
        let config = RiskConfig::default();
        let mut tracker = VolatilityTracker::new();
        tracker.update(1_000, t(0), &config).unwrap();

        // Within the window of the seed, so averaged with the empty accumulator.
        let update = tracker.update(1_060, t(60), &config).unwrap();
        assert_eq!(update.change_bps, 600);
        assert_eq!(update.accumulator_bps, 300);
        assert_eq!(update.current, VolatilityBand::Medium);
        assert!(update.band_changed());
    }

    #[test]
    fn test_reading_after_window_replaces_accumulator() {
        let config = RiskConfig::default().with_volatility_window(Duration::from_secs(3_600));
        let mut tracker = VolatilityTracker::new();
        tracker.update(1_000, t(0), &config).unwrap();

        let update = tracker.update(1_120, t(3_601), &config).unwrap();
        assert_eq!(update.change_bps, 1_200);
        assert_eq!(update.accumulator_bps, 1_200);
        assert_eq!(update.current, VolatilityBand::Extreme);
    }

    #[test]
    fn test_reference_advances_without_band_change() {
        let config = RiskConfig::default();
        let mut tracker = VolatilityTracker::new();
        tracker.update(1_000, t(0), &config).unwrap();

        let update = tracker.update(1_001, t(10), &config).unwrap();
        assert!(!update.band_changed());
        assert_eq!(tracker.snapshot().last_price, 1_001);
        assert_eq!(tracker.snapshot().last_update, Some(t(10)));
    }

    #[test]
    fn test_calm_readings_decay_back_to_low() {
        let config = RiskConfig::default();
        let mut tracker = VolatilityTracker::new();
        tracker.update(1_000, t(0), &config).unwrap();
        tracker.update(1_100, t(10), &config).unwrap(); // 1000 bps -> acc 500 (High)
        assert_eq!(tracker.band(), VolatilityBand::High);

        let mut now = 20;
        for _ in 0..5 {
            tracker.update(1_100, t(now), &config).unwrap();
            now += 10;
        }
        assert_eq!(tracker.band(), VolatilityBand::Low);
    }

    // ==================== Properties ====================

    proptest! {
        #[test]
        fn prop_band_matches_threshold_table(
            prices in proptest::collection::vec(1u128..1_000_000, 2..40),
            gaps in proptest::collection::vec(0i64..10_000, 40),
        ) {
            let config = RiskConfig::default();
            let mut tracker = VolatilityTracker::new();
            let mut now = 0;
            for (i, price) in prices.iter().enumerate() {
                now += gaps[i];
                let update = tracker.update(*price, t(now), &config).unwrap();
                prop_assert_eq!(update.current, classify(update.accumulator_bps, &config));
                prop_assert_eq!(tracker.band(), update.current);
            }
        }

        #[test]
        fn prop_allocation_always_sums_to_bps(acc in 0u128..100_000) {
            let config = RiskConfig::default();
            let targets = allocation_for(classify(acc, &config));
            prop_assert_eq!(targets.safe_bps() + targets.growth_bps(), BPS);
        }

        #[test]
        fn prop_classification_is_monotonic(a in 0u128..5_000, b in 0u128..5_000) {
            let config = RiskConfig::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(classify(lo, &config) <= classify(hi, &config));
        }
    }
}
