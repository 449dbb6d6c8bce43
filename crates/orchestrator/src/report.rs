//! Results of engine entry points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vault_engine_core::{
    CompoundRecord, EngineEvent, HedgeAction, Principal, RebalanceAction, Venue, VolatilityBand,
};

/// Step a best-effort failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStep {
    PendingClaim,
    Harvest,
    Bounty,
    Deploy,
    Rebalance,
    Hedge,
    Funding,
    Drawdown,
    Withdraw,
    Emergency,
}

/// A failure that was isolated to its step instead of aborting the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: CycleStep,
    pub venue: Option<Venue>,
    pub message: String,
}

/// A withdrawal in flight at a venue, claimed on a later cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMove {
    pub from: Venue,
    /// Destination venue, or `None` when the funds return to idle custody.
    pub to: Option<Venue>,
    pub requested: u128,
}

/// Everything one cycle did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub keeper: Principal,
    pub volatility_band: VolatilityBand,
    pub pending_claimed: u128,
    pub harvested: u128,
    pub bounty: u128,
    pub deployed: u128,
    pub rebalance: RebalanceAction,
    /// Amount moved between venues, zero if nothing moved or the move is pending.
    pub rebalanced: u128,
    pub hedge: HedgeAction,
    pub total_value: Option<u128>,
    pub drawdown_bps: Option<u128>,
    pub breaker_reset: bool,
    pub compound: Option<CompoundRecord>,
    pub failures: Vec<StepFailure>,
    pub events: Vec<EngineEvent>,
}

impl CycleReport {
    pub(crate) fn new(cycle: u64, timestamp: DateTime<Utc>, keeper: Principal) -> Self {
        Self {
            cycle,
            timestamp,
            keeper,
            volatility_band: VolatilityBand::Low,
            pending_claimed: 0,
            harvested: 0,
            bounty: 0,
            deployed: 0,
            rebalance: RebalanceAction::none(),
            rebalanced: 0,
            hedge: HedgeAction::None,
            total_value: None,
            drawdown_bps: None,
            breaker_reset: false,
            compound: None,
            failures: Vec::new(),
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn failed_steps(&self) -> Vec<CycleStep> {
        self.failures.iter().map(|f| f.step).collect()
    }
}

/// Outcome of the emergency path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyReport {
    pub timestamp: DateTime<Utc>,
    pub hedge: HedgeAction,
    /// Amount transferred back to the vault.
    pub swept: u128,
    /// Withdrawals still in flight. Calling the emergency path again claims
    /// them and sweeps the proceeds.
    pub pending: Vec<PendingMove>,
    pub failures: Vec<StepFailure>,
}
