//! The strategy engine: one harvest/redeploy/rebalance/hedge cycle per call.
//!
//! Cycle steps:
//! 1. gate on the risk manager (aborts)
//! 2. refresh volatility (aborts on a bad price, before any mutation)
//! 3. claim in-flight withdrawals (vault withdrawals are forwarded to the
//!    vault), then harvest rewards from both venues
//! 4. pay the keeper bounty
//! 5. deploy idle capital by the volatility-adjusted targets
//! 6. evaluate and execute a rebalance
//! 7. update the hedge, then check funding
//! 8. re-check drawdown (aborts), then try a breaker reset
//! 9. record the compound
//!
//! Collaborator failures inside a step are isolated to that step and land in
//! the report. Authorization and capital-safety failures abort.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use vault_engine_core::math::{bps_mul, checked_add, safe_sub};
use vault_engine_core::{
    AssetCustody, Clock, CollaboratorResult, EngineConfig, EngineEvent, FundingRateSource,
    HedgeAction, HedgeCloseReason, MathError, OrchestratorConfig, PriceFeed, Principal,
    PrincipalsConfig, RebalanceAction, Result, VaultError, Venue, WithdrawOutcome, YieldSource,
};
use vault_engine_risk::RiskManager;
use vault_engine_strategy::{AutoCompounder, HedgingEngine, RebalancePolicy};

use crate::guard::EntryGuard;
use crate::report::{CycleReport, CycleStep, EmergencyReport, PendingMove, StepFailure};

/// External collaborators the engine drives.
#[derive(Clone)]
pub struct EngineCollaborators {
    pub safe: Arc<dyn YieldSource>,
    pub growth: Arc<dyn YieldSource>,
    pub price_feed: Arc<dyn PriceFeed>,
    pub custody: Arc<dyn AssetCustody>,
    pub funding: Option<Arc<dyn FundingRateSource>>,
}

#[derive(Debug, Default)]
pub(crate) struct EngineState {
    /// Capital held in custody, not deployed to a venue.
    pub(crate) idle: u128,
    /// Part of `idle` owed to the vault. Never deployed or paid as bounty.
    pub(crate) vault_reserved: u128,
    pub(crate) pending: Vec<PendingMove>,
    pub(crate) paused: bool,
    pub(crate) cycle_count: u64,
    pub(crate) last_cycle_at: Option<DateTime<Utc>>,
    pub(crate) events: VecDeque<EngineEvent>,
}

/// Failures and events collected while an entry point runs.
#[derive(Debug, Default)]
struct StepLog {
    failures: Vec<StepFailure>,
    events: Vec<EngineEvent>,
}

pub struct StrategyEngine {
    pub(crate) principals: PrincipalsConfig,
    pub(crate) config: OrchestratorConfig,
    pub(crate) risk: Arc<RiskManager>,
    pub(crate) rebalance: Arc<RebalancePolicy>,
    pub(crate) hedging: Arc<HedgingEngine>,
    pub(crate) compounder: Arc<AutoCompounder>,
    pub(crate) safe: Arc<dyn YieldSource>,
    pub(crate) growth: Arc<dyn YieldSource>,
    custody: Arc<dyn AssetCustody>,
    funding: Option<Arc<dyn FundingRateSource>>,
    pub(crate) clock: Arc<dyn Clock>,
    entry: AtomicBool,
    pub(crate) state: Mutex<EngineState>,
}

impl fmt::Debug for StrategyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyEngine")
            .field("orchestrator", &self.principals.orchestrator)
            .field("safe", &self.safe.name())
            .field("growth", &self.growth.name())
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl StrategyEngine {
    /// Builds the engine and its components from a validated configuration.
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        collaborators: EngineCollaborators,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let principals = config.principals.clone();
        let risk = Arc::new(RiskManager::new(
            config.risk.clone(),
            &principals,
            collaborators.price_feed,
            clock.clone(),
        ));
        let rebalance = Arc::new(RebalancePolicy::new(
            config.rebalance.clone(),
            &principals,
            risk.clone(),
            clock.clone(),
        ));
        let hedging = Arc::new(HedgingEngine::new(
            config.hedge.clone(),
            &principals,
            risk.clone(),
            clock.clone(),
        ));
        let compounder = Arc::new(AutoCompounder::new(
            config.compounder.clone(),
            &principals,
            clock.clone(),
        ));

        Self {
            principals,
            config: config.orchestrator.clone(),
            risk,
            rebalance,
            hedging,
            compounder,
            safe: collaborators.safe,
            growth: collaborators.growth,
            custody: collaborators.custody,
            funding: collaborators.funding,
            clock,
            entry: AtomicBool::new(false),
            state: Mutex::new(EngineState::default()),
        }
    }

    // =========================================================================
    // Cycle
    // =========================================================================

    /// Runs one full cycle on behalf of `keeper`, who receives the bounty.
    ///
    /// # Errors
    ///
    /// - `ReentrantCall` when invoked from inside another entry point
    /// - `Paused` after an emergency withdrawal
    /// - `ExecutionNotAllowed` if the breaker is active or volatility is Extreme
    /// - price validation failures from the volatility refresh
    /// - `CircuitBreakerTriggered`, `SlippageTooHigh`, `AllocationExceedsLimit`
    /// - `CompoundTooSoon` if the compound is recorded out of cadence
    pub fn run_cycle(&self, keeper: &Principal) -> Result<CycleReport> {
        let _guard = EntryGuard::acquire(&self.entry, "run_cycle")?;
        if self.state.lock().paused {
            return Err(VaultError::Paused);
        }

        // 1. Gate
        self.risk.check_execution_allowed()?;

        let now = self.clock.now();
        let cycle = self.state.lock().cycle_count + 1;
        let mut report = CycleReport::new(cycle, now, keeper.clone());
        let mut log = StepLog::default();
        let me = &self.principals.orchestrator;

        // 2. Volatility
        let update = self.risk.update_volatility()?;
        report.volatility_band = update.current;
        if update.band_changed() {
            self.emit(
                &mut log,
                EngineEvent::VolatilityBandChanged {
                    previous: update.previous,
                    current: update.current,
                    accumulator_bps: update.accumulator_bps,
                    timestamp: now,
                },
            );
        }
        let deploy_allowed = self.risk.is_execution_allowed();

        // 3. Pending withdrawals, then harvest
        report.pending_claimed = self.claim_pending(&mut log, true)?;
        report.harvested = if self.compounder.can_compound() {
            self.harvest(&mut log)?
        } else {
            debug!(
                remaining_secs = self.compounder.time_until_next_compound().as_secs(),
                "Harvest skipped, compound interval not elapsed"
            );
            0
        };

        // 4. Bounty
        report.bounty = self.pay_bounty(keeper, report.harvested, &mut log)?;

        // 5. Redeploy
        if deploy_allowed {
            report.deployed = self.deploy_idle(&mut log)?;
        } else {
            info!(band = %update.current, "Execution restricted, idle capital not deployed");
        }

        // 6. Rebalance
        if self.state.lock().pending.is_empty() {
            match self.venue_values() {
                Ok((safe_value, growth_value)) => {
                    let action = self.rebalance.evaluate(safe_value, growth_value)?;
                    report.rebalance = action;
                    if action.needs_rebalance {
                        report.rebalanced = self.execute_rebalance(
                            action,
                            (safe_value, growth_value),
                            deploy_allowed,
                            &mut log,
                        )?;
                    }
                }
                Err(e) => self.fail(&mut log, CycleStep::Rebalance, None, "total_value", &e),
            }
        } else {
            debug!("Withdrawal in flight, rebalance deferred");
        }

        // 7. Hedge and funding
        report.hedge = self.update_hedge(&mut log)?;

        // 8. Drawdown
        match self.total_managed_value() {
            Ok(total) => {
                report.total_value = Some(total);
                match self.risk.check_drawdown(me, total) {
                    Ok(check) => report.drawdown_bps = Some(check.drawdown_bps),
                    Err(e) => {
                        if let VaultError::CircuitBreakerTriggered { drawdown_bps, .. } = e {
                            self.emit(
                                &mut log,
                                EngineEvent::CircuitBreakerTriggered {
                                    drawdown_bps,
                                    high_water_mark: self.risk.high_water_mark(),
                                    timestamp: now,
                                },
                            );
                        }
                        return Err(e);
                    }
                }
                report.breaker_reset = self.risk.try_reset_circuit_breaker(me, total)?;
                if report.breaker_reset {
                    self.emit(
                        &mut log,
                        EngineEvent::CircuitBreakerReset {
                            value: total,
                            timestamp: now,
                        },
                    );
                }
            }
            Err(e) => self.fail(&mut log, CycleStep::Drawdown, None, "total_value", &e),
        }

        // 9. Compound
        if report.harvested > 0 {
            let record =
                self.compounder
                    .record_compound(me, keeper, report.harvested, report.bounty)?;
            self.emit(
                &mut log,
                EngineEvent::Compounded {
                    harvested: record.harvested,
                    compounded: record.compounded,
                    bounty: record.bounty_paid,
                    timestamp: now,
                },
            );
            report.compound = Some(record);
        }

        {
            let mut state = self.state.lock();
            state.cycle_count = cycle;
            state.last_cycle_at = Some(now);
        }
        report.failures = log.failures;
        report.events = log.events;

        info!(
            cycle,
            keeper = %keeper,
            harvested = report.harvested,
            bounty = report.bounty,
            deployed = report.deployed,
            rebalanced = report.rebalanced,
            failures = report.failures.len(),
            "Cycle complete"
        );
        Ok(report)
    }

    fn harvest(&self, log: &mut StepLog) -> Result<u128> {
        let mut harvested = 0u128;
        for venue in [Venue::Safe, Venue::Growth] {
            match self.venue(venue).claim_rewards() {
                Ok(amount) => {
                    harvested = checked_add(harvested, amount)?;
                    if amount > 0 {
                        self.emit(
                            log,
                            EngineEvent::Harvested {
                                venue,
                                amount,
                                timestamp: self.clock.now(),
                            },
                        );
                    }
                }
                Err(e) => self.fail(log, CycleStep::Harvest, Some(venue), "claim_rewards", &e),
            }
        }
        self.credit_idle(harvested)?;
        Ok(harvested)
    }

    /// Pays the keeper from idle funds. Returns the amount actually paid.
    fn pay_bounty(&self, keeper: &Principal, harvested: u128, log: &mut StepLog) -> Result<u128> {
        let bounty = self
            .compounder
            .calculate_bounty(harvested)?
            .min(self.deployable_idle());
        if bounty == 0 {
            return Ok(0);
        }

        match self.custody.transfer(keeper, bounty) {
            Ok(()) => {
                self.debit_idle(bounty);
                self.emit(
                    log,
                    EngineEvent::BountyPaid {
                        caller: keeper.clone(),
                        amount: bounty,
                        timestamp: self.clock.now(),
                    },
                );
                Ok(bounty)
            }
            Err(e) => {
                self.fail(log, CycleStep::Bounty, None, "transfer", &e);
                Ok(0)
            }
        }
    }

    /// Splits idle capital not owed to the vault by the volatility-adjusted
    /// targets. A growth share that would breach the single-venue cap goes
    /// to the safe venue instead.
    fn deploy_idle(&self, log: &mut StepLog) -> Result<u128> {
        let amount = self.deployable_idle();
        if amount == 0 {
            return Ok(0);
        }

        let targets = self.risk.volatility_adjusted_allocation();
        let mut safe_part = bps_mul(amount, targets.safe_bps())?;
        let mut growth_part = safe_sub(amount, safe_part);

        if growth_part > 0 {
            let (safe_value, growth_value) = match self.venue_values() {
                Ok(values) => values,
                Err(e) => {
                    self.fail(log, CycleStep::Deploy, None, "total_value", &e);
                    return Ok(0);
                }
            };
            let total_after = checked_add(checked_add(safe_value, growth_value)?, amount)?;
            let growth_after = checked_add(growth_value, growth_part)?;
            if let Err(e) = self.risk.validate_allocation(growth_after, total_after) {
                warn!(error = %e, growth_part, "Growth share would breach cap, deploying to safe venue");
                safe_part = amount;
                growth_part = 0;
            }
        }

        let credited_safe = self.deposit_from_idle(Venue::Safe, safe_part, CycleStep::Deploy, log)?;
        let credited_growth =
            self.deposit_from_idle(Venue::Growth, growth_part, CycleStep::Deploy, log)?;
        Ok(checked_add(credited_safe, credited_growth)?)
    }

    /// Moves capital between venues. Returns the amount that arrived at the
    /// destination, zero if the withdrawal is pending or failed.
    fn execute_rebalance(
        &self,
        action: RebalanceAction,
        (safe_value, growth_value): (u128, u128),
        deploy_allowed: bool,
        log: &mut StepLog,
    ) -> Result<u128> {
        let me = &self.principals.orchestrator;
        let Some((from, to, amount)) = action.movement() else {
            // Time-triggered with nothing to move.
            self.rebalance.record(me)?;
            self.emit_rebalanced(log, action, 0, false);
            return Ok(0);
        };

        if to == Venue::Growth {
            if !deploy_allowed {
                debug!(amount, "Rebalance into growth skipped while execution is restricted");
                return Ok(0);
            }
            let total = checked_add(safe_value, growth_value)?;
            self.risk
                .validate_allocation(checked_add(growth_value, amount)?, total)?;
        }

        let moved = match self.venue(from).request_withdraw(amount) {
            Ok(WithdrawOutcome::Completed(received)) => {
                self.credit_idle(received)?;
                self.risk.validate_slippage(amount, received)?;
                self.deposit_from_idle(to, received, CycleStep::Rebalance, log)?
            }
            Ok(WithdrawOutcome::Pending { requested }) => {
                info!(%from, %to, requested, "Rebalance withdrawal pending");
                self.state.lock().pending.push(PendingMove {
                    from,
                    to: Some(to),
                    requested,
                });
                self.rebalance.record(me)?;
                self.emit_rebalanced(log, action, 0, true);
                return Ok(0);
            }
            Err(e) => {
                self.fail(log, CycleStep::Rebalance, Some(from), "request_withdraw", &e);
                return Ok(0);
            }
        };

        self.rebalance.record(me)?;
        self.emit_rebalanced(log, action, moved, false);
        info!(%from, %to, amount, moved, urgency = action.urgency, "Rebalance executed");
        Ok(moved)
    }

    fn emit_rebalanced(&self, log: &mut StepLog, action: RebalanceAction, moved: u128, pending: bool) {
        self.emit(
            log,
            EngineEvent::Rebalanced {
                action,
                moved,
                pending,
                timestamp: self.clock.now(),
            },
        );
    }

    fn update_hedge(&self, log: &mut StepLog) -> Result<HedgeAction> {
        let me = &self.principals.orchestrator;
        let (safe_value, growth_value) = match self.venue_values() {
            Ok(values) => values,
            Err(e) => {
                self.fail(log, CycleStep::Hedge, None, "total_value", &e);
                return Ok(HedgeAction::None);
            }
        };

        let collateral = bps_mul(safe_value, self.hedging.config().collateral_budget_bps)?;
        let mut last = match self.hedging.update_hedge(me, growth_value, collateral) {
            Ok(action) => action,
            Err(e) if e.aborts_cycle() => return Err(e),
            Err(e) => {
                self.fail(log, CycleStep::Hedge, None, "update_hedge", &e);
                HedgeAction::None
            }
        };
        self.emit_hedge(log, last);

        if let Some(funding) = &self.funding {
            let checked = funding
                .funding_rate_bps()
                .map_err(VaultError::from)
                .and_then(|rate| self.hedging.check_funding_rate(me, rate));
            match checked {
                Ok(HedgeAction::None) => {}
                Ok(action) => {
                    self.emit_hedge(log, action);
                    last = action;
                }
                Err(e) if e.aborts_cycle() => return Err(e),
                Err(e) => self.fail(log, CycleStep::Funding, None, "funding_rate", &e),
            }
        }
        Ok(last)
    }

    fn emit_hedge(&self, log: &mut StepLog, action: HedgeAction) {
        if action != HedgeAction::None {
            self.emit(
                log,
                EngineEvent::Hedge {
                    action,
                    timestamp: self.clock.now(),
                },
            );
        }
    }

    /// Claims every in-flight withdrawal into idle custody. Proceeds of vault
    /// withdrawals are reserved for the vault. With `redeploy`, proceeds are
    /// slippage-checked, rebalance proceeds go on to their destination venue
    /// and the vault reserve is paid out.
    fn claim_pending(&self, log: &mut StepLog, redeploy: bool) -> Result<u128> {
        let moves = self.state.lock().pending.clone();
        let mut claimed = 0u128;
        for mv in moves {
            let source = self.venue(mv.from);
            if !source.has_pending_withdrawal() {
                warn!(
                    venue = %mv.from,
                    requested = mv.requested,
                    "Venue reports no withdrawal in flight, dropping pending move"
                );
                self.state.lock().pending.retain(|p| p.from != mv.from);
                continue;
            }
            let received = match source.claim_withdraw() {
                Ok(received) => received,
                Err(e) => {
                    self.fail(log, CycleStep::PendingClaim, Some(mv.from), "claim_withdraw", &e);
                    continue;
                }
            };
            {
                let mut state = self.state.lock();
                state.pending.retain(|p| p.from != mv.from);
                state.idle = checked_add(state.idle, received)?;
                if mv.to.is_none() {
                    state.vault_reserved = checked_add(state.vault_reserved, received)?;
                }
            }
            claimed = checked_add(claimed, received)?;
            self.emit(
                log,
                EngineEvent::PendingWithdrawalClaimed {
                    venue: mv.from,
                    amount: received,
                    timestamp: self.clock.now(),
                },
            );

            if !redeploy {
                continue;
            }
            self.risk.validate_slippage(mv.requested, received)?;
            match mv.to {
                Some(Venue::Growth) if !self.risk.is_execution_allowed() => {}
                Some(to) => {
                    self.deposit_from_idle(to, received, CycleStep::PendingClaim, log)?;
                }
                None => {}
            }
        }
        if redeploy {
            self.pay_vault_reserve(log);
        }
        Ok(claimed)
    }

    /// Transfers the vault reserve. On failure it stays reserved for the
    /// next attempt.
    fn pay_vault_reserve(&self, log: &mut StepLog) {
        let reserved = self.state.lock().vault_reserved;
        if reserved == 0 {
            return;
        }
        match self.custody.transfer(&self.principals.vault, reserved) {
            Ok(()) => {
                self.debit_idle(reserved);
                {
                    let mut state = self.state.lock();
                    state.vault_reserved = safe_sub(state.vault_reserved, reserved);
                }
                info!(amount = reserved, "Claimed withdrawal paid to vault");
                self.emit(
                    log,
                    EngineEvent::VaultPaid {
                        amount: reserved,
                        timestamp: self.clock.now(),
                    },
                );
            }
            Err(e) => self.fail(log, CycleStep::PendingClaim, None, "transfer", &e),
        }
    }

    /// Deposits `amount` of idle capital. Returns the credited value, or zero
    /// if the venue failed (the capital stays idle).
    fn deposit_from_idle(
        &self,
        venue: Venue,
        amount: u128,
        step: CycleStep,
        log: &mut StepLog,
    ) -> Result<u128> {
        if amount == 0 {
            return Ok(0);
        }
        match self.venue(venue).deposit_value(amount) {
            Ok(credited) => {
                self.debit_idle(amount);
                self.emit(
                    log,
                    EngineEvent::Deployed {
                        venue,
                        amount,
                        credited,
                        timestamp: self.clock.now(),
                    },
                );
                self.risk.validate_slippage(amount, credited)?;
                Ok(credited)
            }
            Err(e) => {
                self.fail(log, step, Some(venue), "deposit_value", &e);
                Ok(0)
            }
        }
    }

    // =========================================================================
    // Vault entry points
    // =========================================================================

    /// Accepts capital the vault has moved into custody and deploys it.
    /// Capital stays idle while execution is not allowed.
    ///
    /// # Errors
    ///
    /// `NotAuthorized` unless called by the vault, `Paused`, `ReentrantCall`,
    /// or a capital-safety failure while depositing.
    pub fn deploy_capital(&self, caller: &Principal, amount: u128) -> Result<u128> {
        self.principals.vault.require(caller, "deploy_capital")?;
        let _guard = EntryGuard::acquire(&self.entry, "deploy_capital")?;
        if self.state.lock().paused {
            return Err(VaultError::Paused);
        }

        self.credit_idle(amount)?;
        if !self.risk.is_execution_allowed() {
            info!(amount, "Execution not allowed, capital kept idle");
            return Ok(0);
        }

        let mut log = StepLog::default();
        let deployed = self.deploy_idle(&mut log)?;
        info!(amount, deployed, failures = log.failures.len(), "Capital deployed");
        Ok(deployed)
    }

    /// Returns up to `amount` to the vault, paying from idle capital first,
    /// then the safe venue, then the growth venue. Pending withdrawals at a
    /// venue are not paid out now. Returns the amount transferred.
    ///
    /// # Errors
    ///
    /// `NotAuthorized` unless called by the vault, `ReentrantCall`,
    /// `SlippageTooHigh`, or a custody transfer failure.
    pub fn withdraw_capital(&self, caller: &Principal, amount: u128) -> Result<u128> {
        self.principals.vault.require(caller, "withdraw_capital")?;
        let _guard = EntryGuard::acquire(&self.entry, "withdraw_capital")?;
        let mut log = StepLog::default();

        for venue in [Venue::Safe, Venue::Growth] {
            let available = self.state.lock().idle;
            if available >= amount {
                break;
            }
            if self.has_pending_from(venue) {
                continue;
            }
            let source = self.venue(venue);
            let value = match source.total_value() {
                Ok(value) => value,
                Err(e) => {
                    self.fail(&mut log, CycleStep::Withdraw, Some(venue), "total_value", &e);
                    continue;
                }
            };
            let request = safe_sub(amount, available).min(value);
            if request == 0 {
                continue;
            }
            match source.request_withdraw(request) {
                Ok(WithdrawOutcome::Completed(received)) => {
                    self.credit_idle(received)?;
                    self.risk.validate_slippage(request, received)?;
                }
                Ok(WithdrawOutcome::Pending { requested }) => {
                    self.state.lock().pending.push(PendingMove {
                        from: venue,
                        to: None,
                        requested,
                    });
                }
                Err(e) => {
                    self.fail(&mut log, CycleStep::Withdraw, Some(venue), "request_withdraw", &e);
                }
            }
        }

        let paid = amount.min(self.state.lock().idle);
        if paid > 0 {
            self.custody.transfer(&self.principals.vault, paid)?;
            self.debit_idle(paid);
            let mut state = self.state.lock();
            state.vault_reserved = safe_sub(state.vault_reserved, paid);
        }
        info!(requested = amount, paid, failures = log.failures.len(), "Capital withdrawn");
        Ok(paid)
    }

    /// Idle capital, in-flight withdrawals and both venues' value.
    ///
    /// # Errors
    ///
    /// Fails if either venue cannot report its value.
    pub fn total_managed_value(&self) -> Result<u128> {
        let (safe_value, growth_value) = self.venue_values()?;
        let (idle, in_flight) = {
            let state = self.state.lock();
            let in_flight = state
                .pending
                .iter()
                .try_fold(0u128, |acc, p| acc.checked_add(p.requested))
                .ok_or(MathError::Overflow)?;
            (state.idle, in_flight)
        };
        Ok(checked_add(
            checked_add(idle, in_flight)?,
            checked_add(safe_value, growth_value)?,
        )?)
    }

    // =========================================================================
    // Emergency and recovery
    // =========================================================================

    /// Pauses the engine, closes the hedge, pulls everything out of both
    /// venues and sweeps idle capital back to the vault. Runs under the
    /// entry lock; individual venue failures are reported, not propagated.
    ///
    /// # Errors
    ///
    /// `NotAuthorized` unless called by the guardian, or `ReentrantCall`.
    pub fn emergency_withdraw_all(&self, caller: &Principal) -> Result<EmergencyReport> {
        self.principals.guardian.require(caller, "emergency_withdraw_all")?;
        let _guard = EntryGuard::acquire(&self.entry, "emergency_withdraw_all")?;
        self.state.lock().paused = true;
        warn!(caller = %caller, "Emergency withdrawal started, engine paused");

        let mut log = StepLog::default();
        let hedge = match self
            .hedging
            .close_hedge(&self.principals.orchestrator, HedgeCloseReason::Emergency)
        {
            Ok(action) => action,
            Err(e) => {
                self.fail(&mut log, CycleStep::Hedge, None, "close_hedge", &e);
                HedgeAction::None
            }
        };
        self.emit_hedge(&mut log, hedge);

        self.claim_pending(&mut log, false)?;

        for venue in [Venue::Safe, Venue::Growth] {
            if self.has_pending_from(venue) {
                continue;
            }
            let source = self.venue(venue);
            let outcome = source.total_value().and_then(|value| {
                if value == 0 {
                    Ok(WithdrawOutcome::Completed(0))
                } else {
                    source.request_withdraw(value)
                }
            });
            match outcome {
                Ok(WithdrawOutcome::Completed(received)) => self.credit_idle(received)?,
                Ok(WithdrawOutcome::Pending { requested }) => {
                    self.state.lock().pending.push(PendingMove {
                        from: venue,
                        to: None,
                        requested,
                    });
                }
                Err(e) => {
                    self.fail(&mut log, CycleStep::Emergency, Some(venue), "request_withdraw", &e);
                }
            }
        }

        let idle = self.state.lock().idle;
        let swept = if idle == 0 {
            0
        } else {
            match self.custody.transfer(&self.principals.vault, idle) {
                Ok(()) => {
                    self.debit_idle(idle);
                    idle
                }
                Err(e) => {
                    self.fail(&mut log, CycleStep::Emergency, None, "transfer", &e);
                    0
                }
            }
        };

        let now = self.clock.now();
        self.emit(
            &mut log,
            EngineEvent::EmergencyWithdrawal {
                swept,
                timestamp: now,
            },
        );
        let pending = self.state.lock().pending.clone();
        warn!(swept, pending = pending.len(), failures = log.failures.len(), "Emergency withdrawal complete");

        Ok(EmergencyReport {
            timestamp: now,
            hedge,
            swept,
            pending,
            failures: log.failures,
        })
    }

    /// # Errors
    ///
    /// `NotAuthorized` unless called by the guardian, or `ReentrantCall`.
    pub fn unpause(&self, caller: &Principal) -> Result<()> {
        self.principals.guardian.require(caller, "unpause")?;
        let _guard = EntryGuard::acquire(&self.entry, "unpause")?;
        self.state.lock().paused = false;
        let mut log = StepLog::default();
        self.emit(
            &mut log,
            EngineEvent::Unpaused {
                timestamp: self.clock.now(),
            },
        );
        info!(caller = %caller, "Engine unpaused");
        Ok(())
    }

    /// Refreshes volatility and attempts a breaker reset outside a cycle,
    /// since the gate rejects cycles while execution is blocked. Anyone may
    /// call. Returns whether execution is allowed afterwards.
    ///
    /// # Errors
    ///
    /// `ReentrantCall`, or a venue failure while valuing the portfolio.
    pub fn try_recover(&self, caller: &Principal) -> Result<bool> {
        let _guard = EntryGuard::acquire(&self.entry, "try_recover")?;
        let mut log = StepLog::default();

        match self.risk.update_volatility() {
            Ok(update) if update.band_changed() => self.emit(
                &mut log,
                EngineEvent::VolatilityBandChanged {
                    previous: update.previous,
                    current: update.current,
                    accumulator_bps: update.accumulator_bps,
                    timestamp: self.clock.now(),
                },
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Volatility refresh failed during recovery"),
        }

        let total = self.total_managed_value()?;
        if self
            .risk
            .try_reset_circuit_breaker(&self.principals.orchestrator, total)?
        {
            self.emit(
                &mut log,
                EngineEvent::CircuitBreakerReset {
                    value: total,
                    timestamp: self.clock.now(),
                },
            );
        }

        let allowed = self.risk.is_execution_allowed();
        debug!(caller = %caller, total, allowed, "Recovery attempted");
        Ok(allowed)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[must_use]
    pub fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    #[must_use]
    pub fn rebalance_policy(&self) -> &Arc<RebalancePolicy> {
        &self.rebalance
    }

    #[must_use]
    pub fn hedging(&self) -> &Arc<HedgingEngine> {
        &self.hedging
    }

    #[must_use]
    pub fn compounder(&self) -> &Arc<AutoCompounder> {
        &self.compounder
    }

    #[must_use]
    pub fn principals(&self) -> &PrincipalsConfig {
        &self.principals
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    #[must_use]
    pub fn idle_balance(&self) -> u128 {
        self.state.lock().idle
    }

    #[must_use]
    pub fn pending_moves(&self) -> Vec<PendingMove> {
        self.state.lock().pending.clone()
    }

    /// Most recent events, oldest first.
    #[must_use]
    pub fn recent_events(&self) -> Vec<EngineEvent> {
        self.state.lock().events.iter().cloned().collect()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    pub(crate) fn record_parameter_change(&self, name: &str) {
        let mut log = StepLog::default();
        self.emit(
            &mut log,
            EngineEvent::ParameterChanged {
                name: name.to_string(),
                timestamp: self.clock.now(),
            },
        );
    }

    fn venue(&self, venue: Venue) -> &Arc<dyn YieldSource> {
        match venue {
            Venue::Safe => &self.safe,
            Venue::Growth => &self.growth,
        }
    }

    fn venue_values(&self) -> CollaboratorResult<(u128, u128)> {
        Ok((self.safe.total_value()?, self.growth.total_value()?))
    }

    fn has_pending_from(&self, venue: Venue) -> bool {
        self.state.lock().pending.iter().any(|p| p.from == venue)
    }

    fn credit_idle(&self, amount: u128) -> Result<()> {
        let mut state = self.state.lock();
        state.idle = checked_add(state.idle, amount)?;
        Ok(())
    }

    fn debit_idle(&self, amount: u128) {
        let mut state = self.state.lock();
        state.idle = safe_sub(state.idle, amount);
        state.vault_reserved = state.vault_reserved.min(state.idle);
    }

    fn deployable_idle(&self) -> u128 {
        let state = self.state.lock();
        safe_sub(state.idle, state.vault_reserved)
    }

    fn emit(&self, log: &mut StepLog, event: EngineEvent) {
        let capacity = self.config.event_buffer;
        if capacity > 0 {
            let mut state = self.state.lock();
            if state.events.len() >= capacity {
                state.events.pop_front();
            }
            state.events.push_back(event.clone());
        }
        log.events.push(event);
    }

    fn fail(
        &self,
        log: &mut StepLog,
        step: CycleStep,
        venue: Option<Venue>,
        operation: &str,
        error: &dyn fmt::Display,
    ) {
        let message = error.to_string();
        warn!(?step, ?venue, operation, error = %message, "Step failed, continuing");
        log.failures.push(StepFailure {
            step,
            venue,
            message: message.clone(),
        });
        self.emit(
            log,
            EngineEvent::CollaboratorFailed {
                venue,
                operation: operation.to_string(),
                message,
                timestamp: self.clock.now(),
            },
        );
    }
}
