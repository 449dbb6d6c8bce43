//! Drift- and time-triggered rebalance policy.
//!
//! A rebalance is warranted when the larger per-venue drift from the risk
//! manager's volatility-adjusted targets reaches the threshold, or when the maximum interval
//! has passed since the last recorded rebalance. Drift alone never beats
//! the minimum interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use vault_engine_core::clock::{elapsed, remaining};
use vault_engine_core::math::{abs_diff, bps_mul, bps_of, checked_add, checked_sub, signed_delta};
use vault_engine_core::{
    AllocationTargets, Clock, Principal, PrincipalsConfig, RebalanceAction, RebalanceConfig,
    Result,
};
use vault_engine_risk::RiskManager;

#[derive(Debug, Default)]
struct RebalanceState {
    last_rebalance_at: Option<DateTime<Utc>>,
    rebalance_count: u64,
}

pub struct RebalancePolicy {
    config: RwLock<RebalanceConfig>,
    risk: Arc<RiskManager>,
    clock: Arc<dyn Clock>,
    orchestrator: Principal,
    governance: Principal,
    state: Mutex<RebalanceState>,
}

impl std::fmt::Debug for RebalancePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebalancePolicy")
            .field("config", &*self.config.read())
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl RebalancePolicy {
    #[must_use]
    pub fn new(
        config: RebalanceConfig,
        principals: &PrincipalsConfig,
        risk: Arc<RiskManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            risk,
            clock,
            orchestrator: principals.orchestrator.clone(),
            governance: principals.governance.clone(),
            state: Mutex::new(RebalanceState::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> RebalanceConfig {
        self.config.read().clone()
    }

    /// Governance base split. Reported for monitoring; evaluation follows
    /// the risk manager's volatility-adjusted targets.
    #[must_use]
    pub fn targets(&self) -> AllocationTargets {
        self.config.read().targets
    }

    /// Decides whether capital should move between the venues.
    ///
    /// Positive deltas mean the venue needs capital moved in. The growth
    /// target takes the remainder of the safe target so the deltas always
    /// cancel out.
    ///
    /// # Errors
    ///
    /// Returns a math error on overflow.
    pub fn evaluate(&self, safe_value: u128, growth_value: u128) -> Result<RebalanceAction> {
        let total = checked_add(safe_value, growth_value)?;
        if total == 0 {
            return Ok(RebalanceAction::none());
        }

        let targets = self.risk.volatility_adjusted_allocation();
        let config = self.config.read().clone();

        let safe_drift = abs_diff(bps_of(safe_value, total)?, targets.safe_bps());
        let growth_drift = abs_diff(bps_of(growth_value, total)?, targets.growth_bps());
        let max_drift = safe_drift.max(growth_drift);

        let since_last = self
            .state
            .lock()
            .last_rebalance_at
            .map(|at| elapsed(at, self.clock.now()));
        let time_triggered = since_last.is_some_and(|e| e >= config.max_interval);
        let drift_triggered = max_drift >= config.drift_threshold_bps;
        let rate_limited = since_last.is_some_and(|e| e < config.min_interval);

        debug!(
            safe_value,
            growth_value,
            max_drift_bps = max_drift,
            time_triggered,
            rate_limited,
            "Rebalance evaluated"
        );

        if !(time_triggered || drift_triggered) || (rate_limited && !time_triggered) {
            return Ok(RebalanceAction::none());
        }

        let target_safe = bps_mul(total, targets.safe_bps())?;
        let target_growth = checked_sub(total, target_safe)?;
        let urgency = u8::try_from((max_drift / 100).min(10)).unwrap_or(10);

        Ok(RebalanceAction {
            needs_rebalance: true,
            safe_delta: signed_delta(target_safe, safe_value)?,
            growth_delta: signed_delta(target_growth, growth_value)?,
            urgency,
        })
    }

    /// Marks a rebalance as executed.
    ///
    /// # Errors
    ///
    /// Returns `NotAuthorized` unless called by the orchestrator.
    pub fn record(&self, caller: &Principal) -> Result<()> {
        self.orchestrator.require(caller, "record_rebalance")?;
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.last_rebalance_at = Some(now);
        state.rebalance_count += 1;
        info!(count = state.rebalance_count, "Rebalance recorded");
        Ok(())
    }

    #[must_use]
    pub fn rebalance_count(&self) -> u64 {
        self.state.lock().rebalance_count
    }

    #[must_use]
    pub fn last_rebalance_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_rebalance_at
    }

    /// Time until drift alone may trigger a rebalance again.
    #[must_use]
    pub fn time_until_rebalance_allowed(&self) -> Duration {
        let min_interval = self.config.read().min_interval;
        self.state
            .lock()
            .last_rebalance_at
            .map_or(Duration::ZERO, |at| {
                remaining(at, self.clock.now(), min_interval)
            })
    }

    // =========================================================================
    // Governance
    // =========================================================================

    /// # Errors
    ///
    /// Returns `NotAuthorized`, or `InvalidParameter` unless the pair sums
    /// to 10,000.
    pub fn set_targets(&self, caller: &Principal, safe_bps: u128, growth_bps: u128) -> Result<()> {
        self.governance.require(caller, "set_targets")?;
        let targets = AllocationTargets::new(safe_bps, growth_bps)?;
        self.config.write().targets = targets;
        info!(safe_bps, growth_bps, "Allocation targets updated");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `NotAuthorized` or `InvalidParameter`.
    pub fn set_drift_threshold_bps(&self, caller: &Principal, bps: u128) -> Result<()> {
        self.update_config(caller, "set_drift_threshold_bps", |c| {
            c.drift_threshold_bps = bps;
        })
    }

    /// # Errors
    ///
    /// Returns `NotAuthorized`, or `InvalidParameter` if `min > max`.
    pub fn set_intervals(&self, caller: &Principal, min: Duration, max: Duration) -> Result<()> {
        self.update_config(caller, "set_rebalance_intervals", |c| {
            c.min_interval = min;
            c.max_interval = max;
        })
    }

    fn update_config(
        &self,
        caller: &Principal,
        operation: &'static str,
        apply: impl FnOnce(&mut RebalanceConfig),
    ) -> Result<()> {
        self.governance.require(caller, operation)?;
        let mut candidate = self.config.read().clone();
        apply(&mut candidate);
        candidate.validate()?;
        *self.config.write() = candidate;
        info!(operation, "Rebalance parameters updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{risk_manager, TestFeed};
    use vault_engine_core::{ManualClock, VaultError};

    fn setup() -> (RebalancePolicy, Arc<RiskManager>, Arc<TestFeed>, Arc<ManualClock>, PrincipalsConfig) {
        let (risk, feed, clock, principals) = risk_manager();
        let policy = RebalancePolicy::new(
            RebalanceConfig::default(),
            &principals,
            risk.clone(),
            clock.clone(),
        );
        (policy, risk, feed, clock, principals)
    }

    // ==================== Evaluation ====================

    #[test]
    fn test_on_target_needs_no_rebalance() {
        let (policy, _, _, _, _) = setup();
        let action = policy.evaluate(700, 300).unwrap();
        assert!(!action.needs_rebalance);
        assert_eq!(action, RebalanceAction::none());
    }

    #[test]
    fn test_drift_triggers_rebalance() {
        let (policy, _, _, _, _) = setup();
        let action = policy.evaluate(500, 500).unwrap();
        assert!(action.needs_rebalance);
        assert_eq!(action.safe_delta, 200);
        assert_eq!(action.growth_delta, -200);
        assert_eq!(action.urgency, 10);
    }

    #[test]
    fn test_small_drift_urgency() {
        let (policy, _, _, _, _) = setup();
        // 65/35 against 70/30: 500 bps drift, exactly at threshold
        let action = policy.evaluate(6_500, 3_500).unwrap();
        assert!(action.needs_rebalance);
        assert_eq!(action.urgency, 5);
        assert_eq!(action.safe_delta, 500);
        assert_eq!(action.growth_delta, -500);
    }

    #[test]
    fn test_below_threshold() {
        let (policy, _, _, _, _) = setup();
        assert!(!policy.evaluate(6_600, 3_400).unwrap().needs_rebalance);
    }

    #[test]
    fn test_empty_total() {
        let (policy, _, _, _, _) = setup();
        assert_eq!(policy.evaluate(0, 0).unwrap(), RebalanceAction::none());
    }

    #[test]
    fn test_drift_suppressed_within_min_interval() {
        let (policy, _, _, clock, principals) = setup();
        policy.record(&principals.orchestrator).unwrap();
        clock.advance_secs(600);

        assert!(!policy.evaluate(500, 500).unwrap().needs_rebalance);
        assert_eq!(policy.time_until_rebalance_allowed(), Duration::from_secs(3_000));

        clock.advance_secs(3_000);
        assert!(policy.evaluate(500, 500).unwrap().needs_rebalance);
    }

    #[test]
    fn test_time_trigger_without_drift() {
        let (policy, _, _, clock, principals) = setup();
        policy.record(&principals.orchestrator).unwrap();
        clock.advance_secs(7 * 86_400);

        let action = policy.evaluate(700, 300).unwrap();
        assert!(action.needs_rebalance);
        assert_eq!(action.safe_delta, 0);
        assert_eq!(action.movement(), None);
    }

    #[test]
    fn test_volatility_raises_safe_target() {
        let (policy, risk, feed, clock, _) = setup();
        risk.update_volatility().unwrap();
        clock.advance_secs(4_000);
        feed.set(1_060); // 600 bps, High
        risk.update_volatility().unwrap();

        assert_eq!(risk.volatility_adjusted_allocation().safe_bps(), 9_000);
        let action = policy.evaluate(700, 300).unwrap();
        assert_eq!(action.safe_delta, 200);
        assert_eq!(action.growth_delta, -200);
    }

    // ==================== Recording ====================

    #[test]
    fn test_record_requires_orchestrator() {
        let (policy, _, _, _, principals) = setup();
        let err = policy.record(&principals.vault).unwrap_err();
        assert!(matches!(err, VaultError::NotAuthorized { .. }));
        assert_eq!(policy.rebalance_count(), 0);

        policy.record(&principals.orchestrator).unwrap();
        assert_eq!(policy.rebalance_count(), 1);
        assert!(policy.last_rebalance_at().is_some());
    }

    // ==================== Governance ====================

    #[test]
    fn test_set_targets() {
        let (policy, _, _, _, principals) = setup();
        assert!(policy.set_targets(&principals.governance, 6_000, 3_000).is_err());
        assert!(policy.set_targets(&principals.guardian, 8_000, 2_000).is_err());

        policy.set_targets(&principals.governance, 8_000, 2_000).unwrap();
        assert_eq!(policy.targets().safe_bps(), 8_000);
    }

    #[test]
    fn test_governance_targets_do_not_override_band_table() {
        let (policy, risk, _, _, principals) = setup();
        policy.set_targets(&principals.governance, 8_000, 2_000).unwrap();
        assert_eq!(risk.volatility_adjusted_allocation().safe_bps(), 7_000);

        // On target for the Low band
        assert_eq!(policy.evaluate(700, 300).unwrap(), RebalanceAction::none());

        // 1,000 bps off the Low band split, pulled back to 70/30
        let action = policy.evaluate(800, 200).unwrap();
        assert!(action.needs_rebalance);
        assert_eq!(action.safe_delta, -100);
        assert_eq!(action.growth_delta, 100);
    }

    #[test]
    fn test_set_intervals_rejects_inverted_range() {
        let (policy, _, _, _, principals) = setup();
        let err = policy
            .set_intervals(
                &principals.governance,
                Duration::from_secs(10),
                Duration::from_secs(5),
            )
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidParameter { .. }));
    }
}
