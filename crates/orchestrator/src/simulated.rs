//! In-memory collaborators for simulation and tests.
//!
//! Each one can be told to fail a specific call, so best-effort handling in
//! the engine can be exercised deterministically.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use vault_engine_core::clock::elapsed;
use vault_engine_core::math::{bps_mul, safe_sub, BPS};
use vault_engine_core::{
    AssetCustody, Clock, CollaboratorError, CollaboratorResult, FundingRateSource, PriceData,
    PriceFeed, Principal, WithdrawOutcome, YieldSource,
};

/// Calls a [`SimulatedYieldSource`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    Deposit,
    RequestWithdraw,
    ClaimWithdraw,
    ClaimRewards,
    TotalValue,
}

#[derive(Debug, Default)]
struct YieldState {
    /// Deposits land in the first position; extra positions model a venue
    /// holding several (for example, LP positions).
    positions: Vec<u128>,
    pending_rewards: u128,
    pending_withdrawal: Option<(u128, DateTime<Utc>)>,
    failing: HashSet<SimOp>,
}

/// Yield venue with configurable reward accrual, withdrawal delay and
/// slippage haircut.
pub struct SimulatedYieldSource {
    name: String,
    clock: Arc<dyn Clock>,
    /// Rewards accrued on each claim as bps of current value.
    reward_rate_bps: u128,
    withdraw_delay: Duration,
    haircut_bps: u128,
    state: Mutex<YieldState>,
}

impl std::fmt::Debug for SimulatedYieldSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedYieldSource")
            .field("name", &self.name)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl SimulatedYieldSource {
    #[must_use]
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            clock,
            reward_rate_bps: 0,
            withdraw_delay: Duration::ZERO,
            haircut_bps: 0,
            state: Mutex::new(YieldState::default()),
        }
    }

    #[must_use]
    pub fn with_reward_rate_bps(mut self, bps: u128) -> Self {
        self.reward_rate_bps = bps;
        self
    }

    /// Withdrawals complete only after `delay`; until then they are pending.
    #[must_use]
    pub fn with_withdraw_delay(mut self, delay: Duration) -> Self {
        self.withdraw_delay = delay;
        self
    }

    /// Deposits and withdrawals lose this share in transit.
    #[must_use]
    pub fn with_haircut_bps(mut self, bps: u128) -> Self {
        self.haircut_bps = bps;
        self
    }

    pub fn add_rewards(&self, amount: u128) {
        let mut state = self.state.lock();
        state.pending_rewards = state.pending_rewards.saturating_add(amount);
    }

    /// Opens an additional position holding `amount`.
    pub fn add_position(&self, amount: u128) {
        self.state.lock().positions.push(amount);
    }

    #[must_use]
    pub fn positions(&self) -> Vec<u128> {
        self.state.lock().positions.clone()
    }

    /// Marks every position up or down by `bps` (negative for losses).
    pub fn apply_return_bps(&self, bps: i64) {
        let magnitude = u128::from(bps.unsigned_abs());
        let mut state = self.state.lock();
        for position in &mut state.positions {
            let delta = bps_mul(*position, magnitude).unwrap_or(*position);
            *position = if bps >= 0 {
                position.saturating_add(delta)
            } else {
                safe_sub(*position, delta)
            };
        }
    }

    pub fn set_failing(&self, op: SimOp, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(op);
        } else {
            state.failing.remove(&op);
        }
    }

    fn check(&self, state: &YieldState, op: SimOp) -> CollaboratorResult<()> {
        if state.failing.contains(&op) {
            return Err(CollaboratorError::new(
                &self.name,
                format!("{op:?} unavailable"),
            ));
        }
        Ok(())
    }

    fn after_haircut(&self, amount: u128) -> u128 {
        safe_sub(amount, bps_mul(amount, self.haircut_bps.min(BPS)).unwrap_or(amount))
    }
}

impl YieldSource for SimulatedYieldSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn deposit_value(&self, amount: u128) -> CollaboratorResult<u128> {
        let credited = self.after_haircut(amount);
        let mut state = self.state.lock();
        self.check(&state, SimOp::Deposit)?;
        match state.positions.first_mut() {
            Some(first) => *first = first.saturating_add(credited),
            None => state.positions.push(credited),
        }
        Ok(credited)
    }

    /// Withdraws from the first position only.
    fn request_withdraw(&self, amount: u128) -> CollaboratorResult<WithdrawOutcome> {
        let mut state = self.state.lock();
        self.check(&state, SimOp::RequestWithdraw)?;
        if state.pending_withdrawal.is_some() {
            return Err(CollaboratorError::new(&self.name, "withdrawal already pending"));
        }
        let Some(first) = state.positions.first_mut() else {
            return Ok(WithdrawOutcome::Completed(0));
        };
        let taken = amount.min(*first);
        *first -= taken;

        if self.withdraw_delay.is_zero() {
            return Ok(WithdrawOutcome::Completed(self.after_haircut(taken)));
        }
        state.pending_withdrawal = Some((taken, self.clock.now()));
        Ok(WithdrawOutcome::Pending { requested: taken })
    }

    fn claim_withdraw(&self) -> CollaboratorResult<u128> {
        let mut state = self.state.lock();
        self.check(&state, SimOp::ClaimWithdraw)?;
        let Some((amount, requested_at)) = state.pending_withdrawal else {
            return Err(CollaboratorError::new(&self.name, "no pending withdrawal"));
        };
        if elapsed(requested_at, self.clock.now()) < self.withdraw_delay {
            return Err(CollaboratorError::new(&self.name, "withdrawal not ready"));
        }
        state.pending_withdrawal = None;
        Ok(self.after_haircut(amount))
    }

    fn has_pending_withdrawal(&self) -> bool {
        self.state.lock().pending_withdrawal.is_some()
    }

    fn claim_rewards(&self) -> CollaboratorResult<u128> {
        let mut state = self.state.lock();
        self.check(&state, SimOp::ClaimRewards)?;
        let value: u128 = state.positions.iter().sum();
        let accrued = bps_mul(value, self.reward_rate_bps)
            .map_err(|e| CollaboratorError::new(&self.name, e.to_string()))?;
        let rewards = state.pending_rewards.saturating_add(accrued);
        state.pending_rewards = 0;
        Ok(rewards)
    }

    fn total_value(&self) -> CollaboratorResult<u128> {
        let state = self.state.lock();
        self.check(&state, SimOp::TotalValue)?;
        Ok(state.positions.iter().sum())
    }
}

// =============================================================================
// Price feed
// =============================================================================

#[derive(Debug)]
struct FeedState {
    value: i128,
    updated_at: DateTime<Utc>,
    round_complete: bool,
    script: Vec<i128>,
    failing: bool,
}

/// Price feed with scripted prices. Each `set_price` or `advance` stamps
/// the reading with the current clock time.
pub struct SimulatedPriceFeed {
    clock: Arc<dyn Clock>,
    state: Mutex<FeedState>,
}

impl std::fmt::Debug for SimulatedPriceFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedPriceFeed")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl SimulatedPriceFeed {
    #[must_use]
    pub fn new(initial: i128, clock: Arc<dyn Clock>) -> Self {
        let updated_at = clock.now();
        Self {
            clock,
            state: Mutex::new(FeedState {
                value: initial,
                updated_at,
                round_complete: true,
                script: Vec::new(),
                failing: false,
            }),
        }
    }

    /// Prices returned by successive [`advance`](Self::advance) calls.
    #[must_use]
    pub fn with_script(self, prices: Vec<i128>) -> Self {
        {
            let mut state = self.state.lock();
            state.script = prices;
            state.script.reverse();
        }
        self
    }

    pub fn set_price(&self, value: i128) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.value = value;
        state.updated_at = now;
    }

    /// Moves to the next scripted price, or re-stamps the current one when
    /// the script is exhausted. Returns the new price.
    pub fn advance(&self) -> i128 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if let Some(next) = state.script.pop() {
            state.value = next;
        }
        state.updated_at = now;
        state.value
    }

    pub fn set_round_complete(&self, complete: bool) {
        self.state.lock().round_complete = complete;
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }
}

impl PriceFeed for SimulatedPriceFeed {
    fn latest_price(&self) -> CollaboratorResult<PriceData> {
        let state = self.state.lock();
        if state.failing {
            return Err(CollaboratorError::new("price-feed", "feed unavailable"));
        }
        Ok(PriceData {
            value: state.value,
            updated_at: state.updated_at,
            round_complete: state.round_complete,
        })
    }
}

// =============================================================================
// Custody and funding
// =============================================================================

/// Records every transfer out of custody.
#[derive(Debug, Default)]
pub struct InMemoryCustody {
    transfers: Mutex<Vec<(Principal, u128)>>,
    failing: Mutex<bool>,
}

impl InMemoryCustody {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn transfers(&self) -> Vec<(Principal, u128)> {
        self.transfers.lock().clone()
    }

    /// Total transferred to `to`.
    #[must_use]
    pub fn received_by(&self, to: &Principal) -> u128 {
        self.transfers
            .lock()
            .iter()
            .filter(|(p, _)| p == to)
            .map(|(_, amount)| amount)
            .sum()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

impl AssetCustody for InMemoryCustody {
    fn transfer(&self, to: &Principal, amount: u128) -> CollaboratorResult<()> {
        if *self.failing.lock() {
            return Err(CollaboratorError::new("custody", "transfer rejected"));
        }
        self.transfers.lock().push((to.clone(), amount));
        Ok(())
    }
}

/// Funding rate that tests and the simulator set directly.
#[derive(Debug, Default)]
pub struct ScriptedFundingRate {
    rate_bps: Mutex<i64>,
    failing: Mutex<bool>,
}

impl ScriptedFundingRate {
    #[must_use]
    pub fn new(rate_bps: i64) -> Self {
        Self {
            rate_bps: Mutex::new(rate_bps),
            failing: Mutex::new(false),
        }
    }

    pub fn set_rate_bps(&self, rate_bps: i64) {
        *self.rate_bps.lock() = rate_bps;
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

impl FundingRateSource for ScriptedFundingRate {
    fn funding_rate_bps(&self) -> CollaboratorResult<i64> {
        if *self.failing.lock() {
            return Err(CollaboratorError::new("funding", "rate unavailable"));
        }
        Ok(*self.rate_bps.lock())
    }
}
