//! Risk manager: the execution gate consulted at the start of every cycle.
//!
//! Owns the volatility tracker and the drawdown breaker. Mutating entry
//! points accept only the orchestrator principal, except the volatility
//! refresh (callable by anyone to keep the system self-driving), manual
//! breaker trips (guardian) and parameter changes (governance).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use vault_engine_core::{
    AllocationTargets, CircuitBreakerSnapshot, Clock, PriceFeed, Principal, PrincipalsConfig,
    Result, RiskConfig, VaultError, VolatilityBand, VolatilitySnapshot,
};

use crate::circuit_breaker::{DrawdownBreaker, DrawdownCheck};
use crate::limits;
use crate::price::validate_price;
use crate::volatility::{allocation_for, VolatilityTracker, VolatilityUpdate};

#[derive(Debug, Default)]
struct RiskState {
    volatility: VolatilityTracker,
    breaker: DrawdownBreaker,
}

pub struct RiskManager {
    config: RwLock<RiskConfig>,
    price_feed: Arc<dyn PriceFeed>,
    clock: Arc<dyn Clock>,
    orchestrator: Principal,
    governance: Principal,
    guardian: Principal,
    state: Mutex<RiskState>,
}

impl std::fmt::Debug for RiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RiskManager")
            .field("config", &*self.config.read())
            .field("band", &state.volatility.band())
            .field("breaker_active", &state.breaker.is_active())
            .field("high_water_mark", &state.breaker.high_water_mark())
            .finish()
    }
}

impl RiskManager {
    #[must_use]
    pub fn new(
        config: RiskConfig,
        principals: &PrincipalsConfig,
        price_feed: Arc<dyn PriceFeed>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            price_feed,
            clock,
            orchestrator: principals.orchestrator.clone(),
            governance: principals.governance.clone(),
            guardian: principals.guardian.clone(),
            state: Mutex::new(RiskState::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> RiskConfig {
        self.config.read().clone()
    }

    // =========================================================================
    // Prices and volatility
    // =========================================================================

    /// Reads the feed and returns a positive, fresh WAD price.
    ///
    /// # Errors
    ///
    /// - `StalePrice` if the reading is too old or its round is incomplete
    /// - `InvalidPrice` if the value is non-positive
    /// - `Collaborator` if the feed itself fails
    pub fn validated_price(&self) -> Result<u128> {
        let data = self.price_feed.latest_price()?;
        let max_age = self.config.read().price_staleness;
        validate_price(&data, self.clock.now(), max_age)
    }

    /// Folds the current price into the volatility accumulator.
    ///
    /// # Errors
    ///
    /// Fails if the price cannot be validated.
    pub fn update_volatility(&self) -> Result<VolatilityUpdate> {
        let price = self.validated_price()?;
        let now = self.clock.now();
        let config = self.config.read().clone();

        let update = self.state.lock().volatility.update(price, now, &config)?;
        if update.band_changed() {
            info!(
                previous = %update.previous,
                current = %update.current,
                accumulator_bps = update.accumulator_bps,
                "Volatility band changed"
            );
        } else {
            debug!(
                band = %update.current,
                change_bps = update.change_bps,
                accumulator_bps = update.accumulator_bps,
                "Volatility updated"
            );
        }
        Ok(update)
    }

    #[must_use]
    pub fn volatility_band(&self) -> VolatilityBand {
        self.state.lock().volatility.band()
    }

    #[must_use]
    pub fn volatility_state(&self) -> VolatilitySnapshot {
        self.state.lock().volatility.snapshot()
    }

    /// Recommended split for the current band.
    #[must_use]
    pub fn volatility_adjusted_allocation(&self) -> AllocationTargets {
        allocation_for(self.volatility_band())
    }

    // =========================================================================
    // Execution gate
    // =========================================================================

    #[must_use]
    pub fn is_execution_allowed(&self) -> bool {
        self.check_execution_allowed().is_ok()
    }

    /// # Errors
    ///
    /// Returns `ExecutionNotAllowed` if the breaker is active or volatility
    /// is Extreme.
    pub fn check_execution_allowed(&self) -> Result<()> {
        let state = self.state.lock();
        if state.breaker.is_active() {
            return Err(VaultError::ExecutionNotAllowed {
                reason: "circuit breaker active".to_string(),
            });
        }
        if state.volatility.band() == VolatilityBand::Extreme {
            return Err(VaultError::ExecutionNotAllowed {
                reason: "extreme volatility".to_string(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Circuit breaker
    // =========================================================================

    /// Updates the high-water mark and trips the breaker on excessive drawdown.
    ///
    /// # Errors
    ///
    /// - `NotAuthorized` unless called by the orchestrator
    /// - `CircuitBreakerTriggered` when drawdown exceeds the limit
    pub fn check_drawdown(&self, caller: &Principal, current_value: u128) -> Result<DrawdownCheck> {
        self.orchestrator.require(caller, "check_drawdown")?;
        let config = self.config.read().clone();
        let now = self.clock.now();

        let result = self.state.lock().breaker.check(current_value, now, &config);
        match &result {
            Ok(check) => debug!(
                value = current_value,
                drawdown_bps = check.drawdown_bps,
                high_water_mark = check.high_water_mark,
                "Drawdown checked"
            ),
            Err(e) => warn!(value = current_value, error = %e, "Circuit breaker triggered"),
        }
        result
    }

    /// Attempts to clear the breaker. Returns whether it was reset.
    ///
    /// # Errors
    ///
    /// Returns `NotAuthorized` unless called by the orchestrator.
    pub fn try_reset_circuit_breaker(&self, caller: &Principal, current_value: u128) -> Result<bool> {
        self.orchestrator.require(caller, "try_reset_circuit_breaker")?;
        let config = self.config.read().clone();
        let now = self.clock.now();

        let reset = self
            .state
            .lock()
            .breaker
            .try_reset(current_value, now, &config)?;
        if reset {
            info!(value = current_value, "Circuit breaker reset");
        }
        Ok(reset)
    }

    /// Manually latches the breaker.
    ///
    /// # Errors
    ///
    /// Returns `NotAuthorized` unless called by the guardian.
    pub fn trigger_circuit_breaker(&self, caller: &Principal) -> Result<()> {
        self.guardian.require(caller, "trigger_circuit_breaker")?;
        self.state.lock().breaker.trip(self.clock.now());
        warn!(caller = %caller, "Circuit breaker manually triggered");
        Ok(())
    }

    /// Clears the latch without waiting for cooldown or recovery.
    ///
    /// # Errors
    ///
    /// Returns `NotAuthorized` unless called by governance.
    pub fn force_reset_circuit_breaker(&self, caller: &Principal) -> Result<()> {
        self.governance.require(caller, "force_reset_circuit_breaker")?;
        self.state.lock().breaker.force_reset();
        warn!(caller = %caller, "Circuit breaker force reset");
        Ok(())
    }

    #[must_use]
    pub fn circuit_breaker_state(&self) -> CircuitBreakerSnapshot {
        self.state.lock().breaker.snapshot()
    }

    #[must_use]
    pub fn high_water_mark(&self) -> u128 {
        self.state.lock().breaker.high_water_mark()
    }

    /// # Errors
    ///
    /// Returns a math error on overflow.
    pub fn current_drawdown_bps(&self, value: u128) -> Result<u128> {
        self.state.lock().breaker.drawdown_bps(value)
    }

    // =========================================================================
    // Limits
    // =========================================================================

    /// # Errors
    ///
    /// Returns `SlippageTooHigh` if `actual` undershoots `expected` beyond the limit.
    pub fn validate_slippage(&self, expected: u128, actual: u128) -> Result<()> {
        limits::validate_slippage(expected, actual, self.config.read().max_slippage_bps)
    }

    /// # Errors
    ///
    /// Returns `AllocationExceedsLimit` if the venue's share is over the cap.
    pub fn validate_allocation(&self, protocol_value: u128, total_value: u128) -> Result<()> {
        limits::validate_allocation(
            protocol_value,
            total_value,
            self.config.read().max_allocation_bps,
        )
    }

    // =========================================================================
    // Governance
    // =========================================================================

    /// # Errors
    ///
    /// Returns `NotAuthorized` or `InvalidParameter`.
    pub fn set_max_drawdown_bps(&self, caller: &Principal, bps: u128) -> Result<()> {
        self.update_config(caller, "set_max_drawdown_bps", |c| c.max_drawdown_bps = bps)
    }

    /// # Errors
    ///
    /// Returns `NotAuthorized` or `InvalidParameter`.
    pub fn set_max_slippage_bps(&self, caller: &Principal, bps: u128) -> Result<()> {
        self.update_config(caller, "set_max_slippage_bps", |c| c.max_slippage_bps = bps)
    }

    /// # Errors
    ///
    /// Returns `NotAuthorized` or `InvalidParameter`.
    pub fn set_max_allocation_bps(&self, caller: &Principal, bps: u128) -> Result<()> {
        self.update_config(caller, "set_max_allocation_bps", |c| {
            c.max_allocation_bps = bps;
        })
    }

    /// # Errors
    ///
    /// Returns `NotAuthorized` or `InvalidParameter`.
    pub fn set_breaker_cooldown(&self, caller: &Principal, cooldown: Duration) -> Result<()> {
        self.update_config(caller, "set_breaker_cooldown", |c| {
            c.breaker_cooldown = cooldown;
        })
    }

    fn update_config(
        &self,
        caller: &Principal,
        operation: &'static str,
        apply: impl FnOnce(&mut RiskConfig),
    ) -> Result<()> {
        self.governance.require(caller, operation)?;
        let mut candidate = self.config.read().clone();
        apply(&mut candidate);
        candidate.validate()?;
        *self.config.write() = candidate;
        info!(operation, "Risk parameters updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_engine_core::{CollaboratorResult, ManualClock, PriceData};

    struct TestFeed {
        clock: Arc<ManualClock>,
        price: Mutex<i128>,
        complete: Mutex<bool>,
    }

    impl TestFeed {
        fn set(&self, price: i128) {
            *self.price.lock() = price;
        }
    }

    impl PriceFeed for TestFeed {
        fn latest_price(&self) -> CollaboratorResult<PriceData> {
            Ok(PriceData {
                value: *self.price.lock(),
                updated_at: self.clock.now(),
                round_complete: *self.complete.lock(),
            })
        }
    }

    fn setup() -> (RiskManager, Arc<TestFeed>, Arc<ManualClock>, PrincipalsConfig) {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let feed = Arc::new(TestFeed {
            clock: clock.clone(),
            price: Mutex::new(1_000),
            complete: Mutex::new(true),
        });
        let principals = PrincipalsConfig::default();
        let manager = RiskManager::new(
            RiskConfig::default(),
            &principals,
            feed.clone(),
            clock.clone(),
        );
        (manager, feed, clock, principals)
    }

    // ==================== Gate ====================

    #[test]
    fn test_execution_allowed_initially() {
        let (manager, _, _, _) = setup();
        assert!(manager.is_execution_allowed());
    }

    #[test]
    fn test_extreme_volatility_blocks_execution() {
        let (manager, feed, clock, _) = setup();
        manager.update_volatility().unwrap();

        clock.advance_secs(4_000);
        feed.set(1_200);
        let update = manager.update_volatility().unwrap();
        assert_eq!(update.current, VolatilityBand::Extreme);

        let err = manager.check_execution_allowed().unwrap_err();
        assert!(matches!(err, VaultError::ExecutionNotAllowed { .. }));
        assert_eq!(manager.volatility_adjusted_allocation().growth_bps(), 0);
    }

    #[test]
    fn test_active_breaker_blocks_execution() {
        let (manager, _, _, principals) = setup();
        manager
            .check_drawdown(&principals.orchestrator, 1_000)
            .unwrap();
        manager
            .check_drawdown(&principals.orchestrator, 800)
            .unwrap_err();
        assert!(!manager.is_execution_allowed());
    }

    // ==================== Authorization ====================

    #[test]
    fn test_check_drawdown_requires_orchestrator() {
        let (manager, _, _, _) = setup();
        let err = manager
            .check_drawdown(&Principal::new("mallory"), 1_000)
            .unwrap_err();
        assert!(matches!(err, VaultError::NotAuthorized { .. }));
        assert_eq!(manager.high_water_mark(), 0);
    }

    #[test]
    fn test_manual_trigger_requires_guardian() {
        let (manager, _, _, principals) = setup();
        assert!(manager
            .trigger_circuit_breaker(&principals.orchestrator)
            .is_err());
        manager.trigger_circuit_breaker(&principals.guardian).unwrap();
        assert!(manager.circuit_breaker_state().active);
    }

    #[test]
    fn test_volatility_refresh_needs_no_principal() {
        let (manager, _, _, _) = setup();
        assert!(manager.update_volatility().is_ok());
        assert_eq!(manager.volatility_state().last_price, 1_000);
    }

    // ==================== Price validation ====================

    #[test]
    fn test_stale_feed_fails_volatility_update() {
        let (manager, feed, _, _) = setup();
        *feed.complete.lock() = false;
        let err = manager.update_volatility().unwrap_err();
        assert!(matches!(err, VaultError::StalePrice { .. }));
    }

    #[test]
    fn test_invalid_price() {
        let (manager, feed, _, _) = setup();
        feed.set(0);
        assert_eq!(
            manager.validated_price().unwrap_err(),
            VaultError::InvalidPrice { value: 0 }
        );
    }

    // ==================== Reset ====================

    #[test]
    fn test_reset_after_cooldown_and_recovery() {
        let (manager, _, clock, principals) = setup();
        let engine = &principals.orchestrator;
        manager.check_drawdown(engine, 1_000).unwrap();
        manager.check_drawdown(engine, 850).unwrap_err();

        clock.advance_secs(3_600);
        assert!(!manager.try_reset_circuit_breaker(engine, 1_000).unwrap());

        clock.advance_secs(86_400);
        assert!(!manager.try_reset_circuit_breaker(engine, 900).unwrap());
        assert!(manager.try_reset_circuit_breaker(engine, 960).unwrap());
        assert!(manager.is_execution_allowed());
    }

    // ==================== Governance ====================

    #[test]
    fn test_governance_setters() {
        let (manager, _, _, principals) = setup();
        manager
            .set_max_slippage_bps(&principals.governance, 30)
            .unwrap();
        assert_eq!(manager.config().max_slippage_bps, 30);
        assert!(manager.validate_slippage(10_000, 9_960).is_err());

        assert!(manager
            .set_max_drawdown_bps(&principals.orchestrator, 10)
            .is_err());
        assert!(manager
            .set_max_drawdown_bps(&principals.governance, 20_000)
            .is_err());
        assert_eq!(manager.config().max_drawdown_bps, 1_000);
    }

    #[test]
    fn test_force_reset_requires_governance() {
        let (manager, _, _, principals) = setup();
        manager.trigger_circuit_breaker(&principals.guardian).unwrap();
        assert!(manager
            .force_reset_circuit_breaker(&principals.guardian)
            .is_err());
        manager
            .force_reset_circuit_breaker(&principals.governance)
            .unwrap();
        assert!(manager.is_execution_allowed());
    }
}
