//! Monitoring snapshot of the whole engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use vault_engine_core::math::{bps_of, to_decimal};
use vault_engine_core::{
    AllocationTargets, CircuitBreakerSnapshot, Clock, CompoundRecord, EngineEvent, HedgePosition,
    VolatilitySnapshot,
};
use vault_engine_strategy::CompoundTotals;

use crate::engine::StrategyEngine;
use crate::report::PendingMove;

/// Compound records included in a status snapshot.
pub const STATUS_COMPOUND_HISTORY: usize = 10;

/// Current split between the venues, bps of their combined value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentAllocation {
    pub safe_bps: u128,
    pub growth_bps: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub timestamp: DateTime<Utc>,
    pub paused: bool,
    pub execution_allowed: bool,
    pub cycle_count: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,

    pub volatility: VolatilitySnapshot,
    pub circuit_breaker: CircuitBreakerSnapshot,

    pub hedge: HedgePosition,
    pub hedge_realized_pnl: i128,
    pub recommended_hedge_ratio_bps: u128,

    /// Volatility-adjusted split that rebalancing and redeploy follow.
    pub target_allocation: AllocationTargets,
    /// Governance base split.
    pub base_allocation: AllocationTargets,
    pub current_allocation: Option<CurrentAllocation>,
    pub rebalance_count: u64,

    pub idle: u128,
    /// Part of `idle` owed to the vault from claimed withdrawals.
    pub vault_reserved: u128,
    pub safe_value: Option<u128>,
    pub growth_value: Option<u128>,
    pub total_value: Option<u128>,
    /// `total_value` in whole asset units.
    pub total_value_display: Option<Decimal>,
    pub pending: Vec<PendingMove>,

    pub compound_totals: CompoundTotals,
    pub recent_compounds: Vec<CompoundRecord>,
    /// Share of all harvests paid out as bounties.
    pub effective_bounty_bps: Option<u128>,
    /// Coarse projection, see `AutoCompounder::estimated_apy_bps`.
    pub estimated_apy_bps: Option<u128>,

    pub recent_events: Vec<EngineEvent>,
}

impl StrategyEngine {
    /// Snapshot for monitoring. Venue values a collaborator cannot report
    /// are left empty rather than failing the whole snapshot.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let safe_value = self.safe.total_value().ok();
        let growth_value = self.growth.total_value().ok();
        let total_value = self.total_managed_value().ok();

        let current_allocation = match (safe_value, growth_value) {
            (Some(safe), Some(growth)) => safe.checked_add(growth).and_then(|total| {
                Some(CurrentAllocation {
                    safe_bps: bps_of(safe, total).ok()?,
                    growth_bps: bps_of(growth, total).ok()?,
                })
            }),
            _ => None,
        };

        let estimated_apy_bps = total_value.and_then(|v| self.compounder.estimated_apy_bps(v).ok());
        let total_value_display = total_value.map(|v| to_decimal(v, self.config.asset_decimals));

        let (paused, cycle_count, last_cycle_at, idle, vault_reserved, pending, recent_events) = {
            let state = self.state.lock();
            (
                state.paused,
                state.cycle_count,
                state.last_cycle_at,
                state.idle,
                state.vault_reserved,
                state.pending.clone(),
                state.events.iter().cloned().collect(),
            )
        };

        EngineStatus {
            timestamp: self.clock.now(),
            paused,
            execution_allowed: !paused && self.risk.is_execution_allowed(),
            cycle_count,
            last_cycle_at,
            volatility: self.risk.volatility_state(),
            circuit_breaker: self.risk.circuit_breaker_state(),
            hedge: self.hedging.position(),
            hedge_realized_pnl: self.hedging.realized_pnl(),
            recommended_hedge_ratio_bps: self.hedging.recommended_hedge_ratio(),
            target_allocation: self.risk.volatility_adjusted_allocation(),
            base_allocation: self.rebalance.targets(),
            current_allocation,
            rebalance_count: self.rebalance.rebalance_count(),
            idle,
            vault_reserved,
            safe_value,
            growth_value,
            total_value,
            total_value_display,
            pending,
            compound_totals: self.compounder.totals(),
            recent_compounds: self.compounder.recent_compounds(STATUS_COMPOUND_HISTORY),
            effective_bounty_bps: self.compounder.effective_bounty_bps().ok(),
            estimated_apy_bps,
            recent_events,
        }
    }
}
