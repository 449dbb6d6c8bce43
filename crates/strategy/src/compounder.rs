//! Harvest cadence, caller bounty and compound history.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::info;
use vault_engine_core::clock::{elapsed, remaining};
use vault_engine_core::math::{
    bps_mul, bps_of, checked_add, checked_sub, mul_div, BPS, SECONDS_PER_YEAR,
};
use vault_engine_core::{
    Clock, CompoundRecord, CompounderConfig, MathError, Principal, PrincipalsConfig, Result,
    VaultError,
};

use crate::history::CompoundHistory;

/// Running totals across every recorded compound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CompoundTotals {
    pub harvested: u128,
    pub compounded: u128,
    pub bounty_paid: u128,
    pub count: u64,
}

#[derive(Debug)]
struct CompounderState {
    last_compound_at: Option<DateTime<Utc>>,
    totals: CompoundTotals,
    history: CompoundHistory,
}

pub struct AutoCompounder {
    config: RwLock<CompounderConfig>,
    clock: Arc<dyn Clock>,
    orchestrator: Principal,
    governance: Principal,
    state: Mutex<CompounderState>,
}

impl std::fmt::Debug for AutoCompounder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AutoCompounder")
            .field("config", &*self.config.read())
            .field("last_compound_at", &state.last_compound_at)
            .field("totals", &state.totals)
            .finish_non_exhaustive()
    }
}

impl AutoCompounder {
    #[must_use]
    pub fn new(config: CompounderConfig, principals: &PrincipalsConfig, clock: Arc<dyn Clock>) -> Self {
        let history = CompoundHistory::new(config.history_capacity);
        Self {
            config: RwLock::new(config),
            clock,
            orchestrator: principals.orchestrator.clone(),
            governance: principals.governance.clone(),
            state: Mutex::new(CompounderState {
                last_compound_at: None,
                totals: CompoundTotals::default(),
                history,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> CompounderConfig {
        self.config.read().clone()
    }

    #[must_use]
    pub fn can_compound(&self) -> bool {
        self.time_until_next_compound().is_zero()
    }

    #[must_use]
    pub fn time_until_next_compound(&self) -> Duration {
        let min_interval = self.config.read().min_interval;
        self.state
            .lock()
            .last_compound_at
            .map_or(Duration::ZERO, |at| remaining(at, self.clock.now(), min_interval))
    }

    /// `harvested × bounty_bps / 10_000`.
    ///
    /// # Errors
    ///
    /// Returns a math error on overflow.
    pub fn calculate_bounty(&self, harvested: u128) -> Result<u128> {
        Ok(bps_mul(harvested, self.config.read().bounty_bps)?)
    }

    /// Records a harvest. `keeper` is whoever triggered the cycle and
    /// received the bounty.
    ///
    /// # Errors
    ///
    /// - `NotAuthorized` unless called by the orchestrator
    /// - `CompoundTooSoon` inside the minimum interval
    /// - `Math(Underflow)` if the bounty exceeds the harvest
    pub fn record_compound(
        &self,
        caller: &Principal,
        keeper: &Principal,
        harvested: u128,
        bounty: u128,
    ) -> Result<CompoundRecord> {
        self.orchestrator.require(caller, "record_compound")?;
        let min_interval = self.config.read().min_interval;
        let now = self.clock.now();
        let mut state = self.state.lock();

        if let Some(last) = state.last_compound_at {
            if elapsed(last, now) < min_interval {
                return Err(VaultError::CompoundTooSoon {
                    remaining_secs: remaining(last, now, min_interval).as_secs(),
                });
            }
        }

        let compounded = checked_sub(harvested, bounty)?;
        let totals = CompoundTotals {
            harvested: checked_add(state.totals.harvested, harvested)?,
            compounded: checked_add(state.totals.compounded, compounded)?,
            bounty_paid: checked_add(state.totals.bounty_paid, bounty)?,
            count: state.totals.count + 1,
        };

        let record = CompoundRecord {
            timestamp: now,
            harvested,
            compounded,
            bounty_paid: bounty,
            caller: keeper.clone(),
        };
        state.totals = totals;
        state.last_compound_at = Some(now);
        state.history.push(record.clone());

        info!(
            harvested,
            compounded,
            bounty,
            keeper = %keeper,
            count = totals.count,
            "Compound recorded"
        );
        Ok(record)
    }

    /// Up to `n` most recent records, newest first.
    #[must_use]
    pub fn recent_compounds(&self, n: usize) -> Vec<CompoundRecord> {
        self.state.lock().history.recent(n)
    }

    #[must_use]
    pub fn totals(&self) -> CompoundTotals {
        self.state.lock().totals
    }

    #[must_use]
    pub fn last_compound_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_compound_at
    }

    /// Annualized yield projected from the latest record alone.
    ///
    /// Low confidence: assumes every period compounds exactly as much as the
    /// last one and that compounding happens at exactly the minimum
    /// interval. Treat as a rough indicator.
    ///
    /// # Errors
    ///
    /// Returns a math error on overflow.
    pub fn estimated_apy_bps(&self, total_value: u128) -> Result<u128> {
        let interval_secs = self.config.read().min_interval.as_secs().max(1);
        let periods_per_year = u128::from(SECONDS_PER_YEAR / interval_secs);
        let state = self.state.lock();
        let Some(latest) = state.history.latest() else {
            return Ok(0);
        };
        let per_period_bps = bps_of(latest.compounded, total_value)?;
        Ok(per_period_bps
            .checked_mul(periods_per_year)
            .ok_or(MathError::Overflow)?)
    }

    /// Share of harvests paid out as bounties so far, bps.
    ///
    /// # Errors
    ///
    /// Returns a math error on overflow.
    pub fn effective_bounty_bps(&self) -> Result<u128> {
        let totals = self.totals();
        if totals.harvested == 0 {
            return Ok(0);
        }
        Ok(mul_div(totals.bounty_paid, BPS, totals.harvested)?)
    }

    // =========================================================================
    // Governance
    // =========================================================================

    /// # Errors
    ///
    /// Returns `NotAuthorized`, or `InvalidParameter` above the max bounty.
    pub fn set_bounty_bps(&self, caller: &Principal, bps: u128) -> Result<()> {
        self.update_config(caller, "set_bounty_bps", |c| c.bounty_bps = bps)
    }

    /// # Errors
    ///
    /// Returns `NotAuthorized`.
    pub fn set_min_interval(&self, caller: &Principal, interval: Duration) -> Result<()> {
        self.update_config(caller, "set_compound_interval", |c| c.min_interval = interval)
    }

    fn update_config(
        &self,
        caller: &Principal,
        operation: &'static str,
        apply: impl FnOnce(&mut CompounderConfig),
    ) -> Result<()> {
        self.governance.require(caller, operation)?;
        let mut candidate = self.config.read().clone();
        apply(&mut candidate);
        candidate.validate()?;
        *self.config.write() = candidate;
        info!(operation, "Compounder parameters updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_engine_core::math::WAD;
    use vault_engine_core::ManualClock;

    fn setup() -> (AutoCompounder, Arc<ManualClock>, PrincipalsConfig) {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let principals = PrincipalsConfig::default();
        let compounder =
            AutoCompounder::new(CompounderConfig::default(), &principals, clock.clone());
        (compounder, clock, principals)
    }

    // ==================== Bounty ====================

    #[test]
    fn test_bounty_half_percent() {
        let (compounder, _, _) = setup();
        // 100 units at 50 bps = 0.5 units
        assert_eq!(compounder.calculate_bounty(100 * WAD).unwrap(), WAD / 2);
        assert_eq!(compounder.calculate_bounty(0).unwrap(), 0);
    }

    #[test]
    fn test_bounty_follows_governance() {
        let (compounder, _, principals) = setup();
        compounder.set_bounty_bps(&principals.governance, 100).unwrap();
        assert_eq!(compounder.calculate_bounty(10_000).unwrap(), 100);

        let err = compounder
            .set_bounty_bps(&principals.governance, 501)
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidParameter { .. }));
        assert!(compounder.set_bounty_bps(&principals.guardian, 10).is_err());
    }

    // ==================== Cadence ====================

    #[test]
    fn test_first_compound_allowed() {
        let (compounder, _, _) = setup();
        assert!(compounder.can_compound());
        assert_eq!(compounder.time_until_next_compound(), Duration::ZERO);
    }

    #[test]
    fn test_compound_too_soon() {
        let (compounder, clock, principals) = setup();
        let keeper = Principal::new("keeper");
        compounder
            .record_compound(&principals.orchestrator, &keeper, 100 * WAD, WAD / 2)
            .unwrap();

        clock.advance_secs(1_000);
        assert!(!compounder.can_compound());
        let err = compounder
            .record_compound(&principals.orchestrator, &keeper, 10, 0)
            .unwrap_err();
        assert_eq!(err, VaultError::CompoundTooSoon { remaining_secs: 2_600 });
        assert_eq!(compounder.totals().count, 1);

        clock.advance_secs(2_600);
        assert!(compounder.can_compound());
        compounder
            .record_compound(&principals.orchestrator, &keeper, 10, 0)
            .unwrap();
    }

    #[test]
    fn test_record_requires_orchestrator() {
        let (compounder, _, _) = setup();
        let keeper = Principal::new("keeper");
        let err = compounder
            .record_compound(&keeper, &keeper, 100, 0)
            .unwrap_err();
        assert!(matches!(err, VaultError::NotAuthorized { .. }));
        assert!(compounder.last_compound_at().is_none());
    }

    #[test]
    fn test_bounty_larger_than_harvest_rejected() {
        let (compounder, _, principals) = setup();
        let keeper = Principal::new("keeper");
        assert!(compounder
            .record_compound(&principals.orchestrator, &keeper, 10, 11)
            .is_err());
        assert!(compounder.can_compound());
    }

    // ==================== Accounting ====================

    #[test]
    fn test_totals_and_history() {
        let (compounder, clock, principals) = setup();
        let keeper = Principal::new("keeper");
        for harvested in [1_000, 2_000, 3_000] {
            compounder
                .record_compound(&principals.orchestrator, &keeper, harvested, harvested / 200)
                .unwrap();
            clock.advance_secs(3_600);
        }

        let totals = compounder.totals();
        assert_eq!(totals.harvested, 6_000);
        assert_eq!(totals.bounty_paid, 30);
        assert_eq!(totals.compounded, 5_970);
        assert_eq!(totals.count, 3);
        assert_eq!(compounder.effective_bounty_bps().unwrap(), 50);

        let recent = compounder.recent_compounds(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].harvested, 3_000);
        assert_eq!(recent[1].harvested, 2_000);
        assert_eq!(recent[0].caller, keeper);
    }

    #[test]
    fn test_history_keeps_last_hundred() {
        let (compounder, clock, principals) = setup();
        let keeper = Principal::new("keeper");
        for harvested in 1..=120u128 {
            compounder
                .record_compound(&principals.orchestrator, &keeper, harvested, 0)
                .unwrap();
            clock.advance_secs(3_600);
        }
        let recent = compounder.recent_compounds(100);
        assert_eq!(recent.len(), 100);
        assert_eq!(recent[0].harvested, 120);
        assert_eq!(recent[99].harvested, 21);
        assert_eq!(compounder.recent_compounds(500).len(), 100);
    }

    #[test]
    fn test_estimated_apy_is_naive_extrapolation() {
        let (compounder, _, principals) = setup();
        assert_eq!(compounder.estimated_apy_bps(1_000_000).unwrap(), 0);

        compounder
            .record_compound(&principals.orchestrator, &Principal::new("keeper"), 100, 0)
            .unwrap();
        // 1 bps per hourly period, 8_760 periods per year
        assert_eq!(compounder.estimated_apy_bps(1_000_000).unwrap(), 8_760);
    }
}
