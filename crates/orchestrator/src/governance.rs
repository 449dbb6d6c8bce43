//! Timelocked parameter changes.
//!
//! Governance queues a change, waits out the delay, then executes it
//! against the engine. Only the governance principal may queue, execute
//! or cancel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use vault_engine_core::clock::{elapsed, remaining};
use vault_engine_core::{Clock, GovernanceConfig, Principal, Result, VaultError};

use crate::engine::StrategyEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "parameter", content = "value")]
pub enum ParameterChange {
    AllocationTargets { safe_bps: u128, growth_bps: u128 },
    BountyBps(u128),
    CompoundIntervalSecs(u64),
    DriftThresholdBps(u128),
    RebalanceIntervals { min_secs: u64, max_secs: u64 },
    MaxDrawdownBps(u128),
    MaxSlippageBps(u128),
    MaxAllocationBps(u128),
    BreakerCooldownSecs(u64),
    HedgeRatioBps(u128),
    HedgeAdjustThresholdBps(u128),
    MaxFundingRateBps(u64),
    HedgeEnabled(bool),
}

impl ParameterChange {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AllocationTargets { .. } => "allocation_targets",
            Self::BountyBps(_) => "bounty_bps",
            Self::CompoundIntervalSecs(_) => "compound_interval",
            Self::DriftThresholdBps(_) => "drift_threshold_bps",
            Self::RebalanceIntervals { .. } => "rebalance_intervals",
            Self::MaxDrawdownBps(_) => "max_drawdown_bps",
            Self::MaxSlippageBps(_) => "max_slippage_bps",
            Self::MaxAllocationBps(_) => "max_allocation_bps",
            Self::BreakerCooldownSecs(_) => "breaker_cooldown",
            Self::HedgeRatioBps(_) => "hedge_ratio_bps",
            Self::HedgeAdjustThresholdBps(_) => "hedge_adjust_threshold_bps",
            Self::MaxFundingRateBps(_) => "max_funding_rate_bps",
            Self::HedgeEnabled(_) => "hedge_enabled",
        }
    }

    /// Applies the change through the owning component's setter.
    fn apply(self, caller: &Principal, engine: &StrategyEngine) -> Result<()> {
        match self {
            Self::AllocationTargets {
                safe_bps,
                growth_bps,
            } => engine
                .rebalance_policy()
                .set_targets(caller, safe_bps, growth_bps),
            Self::BountyBps(bps) => engine.compounder().set_bounty_bps(caller, bps),
            Self::CompoundIntervalSecs(secs) => engine
                .compounder()
                .set_min_interval(caller, Duration::from_secs(secs)),
            Self::DriftThresholdBps(bps) => {
                engine.rebalance_policy().set_drift_threshold_bps(caller, bps)
            }
            Self::RebalanceIntervals { min_secs, max_secs } => engine.rebalance_policy().set_intervals(
                caller,
                Duration::from_secs(min_secs),
                Duration::from_secs(max_secs),
            ),
            Self::MaxDrawdownBps(bps) => engine.risk().set_max_drawdown_bps(caller, bps),
            Self::MaxSlippageBps(bps) => engine.risk().set_max_slippage_bps(caller, bps),
            Self::MaxAllocationBps(bps) => engine.risk().set_max_allocation_bps(caller, bps),
            Self::BreakerCooldownSecs(secs) => engine
                .risk()
                .set_breaker_cooldown(caller, Duration::from_secs(secs)),
            Self::HedgeRatioBps(bps) => engine.hedging().set_hedge_ratio_bps(caller, bps),
            Self::HedgeAdjustThresholdBps(bps) => {
                engine.hedging().set_adjust_threshold_bps(caller, bps)
            }
            Self::MaxFundingRateBps(bps) => engine.hedging().set_max_funding_rate_bps(caller, bps),
            Self::HedgeEnabled(enabled) => engine.hedging().set_enabled(caller, enabled),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedChange {
    pub id: u64,
    pub change: ParameterChange,
    pub queued_at: DateTime<Utc>,
    /// Earliest execution time.
    pub eta: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    queued: BTreeMap<u64, QueuedChange>,
}

pub struct GovernanceQueue {
    governance: Principal,
    delay: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
}

impl std::fmt::Debug for GovernanceQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceQueue")
            .field("governance", &self.governance)
            .field("delay", &self.delay)
            .field("queued", &self.state.lock().queued.len())
            .finish_non_exhaustive()
    }
}

impl GovernanceQueue {
    #[must_use]
    pub fn new(config: &GovernanceConfig, governance: Principal, clock: Arc<dyn Clock>) -> Self {
        Self {
            governance,
            delay: config.delay,
            clock,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Queues a change and returns its id.
    ///
    /// # Errors
    ///
    /// `NotAuthorized` unless called by governance.
    pub fn queue(&self, caller: &Principal, change: ParameterChange) -> Result<u64> {
        self.governance.require(caller, "queue_change")?;
        let now = self.clock.now();
        let eta = now
            + chrono::Duration::from_std(self.delay)
                .map_err(|_| VaultError::invalid("governance_delay", "out of range"))?;

        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.queued.insert(
            id,
            QueuedChange {
                id,
                change,
                queued_at: now,
                eta,
            },
        );
        info!(id, parameter = change.name(), %eta, "Parameter change queued");
        Ok(id)
    }

    /// Executes a queued change once its delay has passed.
    ///
    /// A change the component rejects stays queued so it can be cancelled.
    ///
    /// # Errors
    ///
    /// - `NotAuthorized` unless called by governance
    /// - `InvalidParameter` for an unknown id or a rejected value
    /// - `TimelockNotElapsed` before the eta
    pub fn execute(
        &self,
        caller: &Principal,
        id: u64,
        engine: &StrategyEngine,
    ) -> Result<ParameterChange> {
        self.governance.require(caller, "execute_change")?;
        let queued = self
            .state
            .lock()
            .queued
            .get(&id)
            .copied()
            .ok_or_else(|| VaultError::invalid("change_id", format!("{id} is not queued")))?;

        let now = self.clock.now();
        if now < queued.eta {
            return Err(VaultError::TimelockNotElapsed {
                id,
                remaining_secs: remaining(queued.queued_at, now, self.delay).as_secs(),
            });
        }

        queued.change.apply(caller, engine)?;
        self.state.lock().queued.remove(&id);
        engine.record_parameter_change(queued.change.name());
        info!(
            id,
            parameter = queued.change.name(),
            waited_secs = elapsed(queued.queued_at, now).as_secs(),
            "Parameter change executed"
        );
        Ok(queued.change)
    }

    /// # Errors
    ///
    /// `NotAuthorized` unless called by governance, or `InvalidParameter`
    /// for an unknown id.
    pub fn cancel(&self, caller: &Principal, id: u64) -> Result<ParameterChange> {
        self.governance.require(caller, "cancel_change")?;
        let queued = self
            .state
            .lock()
            .queued
            .remove(&id)
            .ok_or_else(|| VaultError::invalid("change_id", format!("{id} is not queued")))?;
        info!(id, parameter = queued.change.name(), "Parameter change cancelled");
        Ok(queued.change)
    }

    /// Queued changes ordered by id.
    #[must_use]
    pub fn queued(&self) -> Vec<QueuedChange> {
        self.state.lock().queued.values().copied().collect()
    }
}
