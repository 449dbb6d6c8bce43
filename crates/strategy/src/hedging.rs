//! Short hedge against the growth venue's directional exposure.
//!
//! The engine tracks at most one position. It opens when there is both a
//! positive target size and collateral to back it, re-sizes when exposure
//! moves by at least the adjustment threshold, and closes on request, when
//! exposure disappears, or when funding turns against the short beyond the
//! configured limit. Every adjustment and close settles PnL into a signed
//! cumulative ledger.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use vault_engine_core::math::{abs_diff, bps_mul, bps_of, mul_div, BPS};
use vault_engine_core::{
    Clock, HedgeAction, HedgeCloseReason, HedgeConfig, HedgePosition, MathError, Principal,
    PrincipalsConfig, Result, VolatilityBand,
};
use vault_engine_risk::RiskManager;

/// Signed PnL of a short of `size` opened at `entry`, marked at `current`.
///
/// # Errors
///
/// Returns a math error if `entry` is zero or the result overflows `i128`.
pub fn short_pnl(size: u128, entry: u128, current: u128) -> Result<i128> {
    if current <= entry {
        let profit = mul_div(size, entry - current, entry)?;
        Ok(i128::try_from(profit).map_err(|_| MathError::Overflow)?)
    } else {
        let loss = mul_div(size, current - entry, entry)?;
        let loss = i128::try_from(loss).map_err(|_| MathError::Overflow)?;
        Ok(-loss)
    }
}

/// Adverse funding: shorts are paying and the rate exceeds the limit.
#[must_use]
pub fn is_adverse_funding(rate_bps: i64, max_rate_bps: u64) -> bool {
    rate_bps < 0 && rate_bps.unsigned_abs() > max_rate_bps
}

#[derive(Debug, Default)]
struct HedgeState {
    position: HedgePosition,
    realized_pnl: i128,
    hedge_count: u64,
}

impl HedgeState {
    fn settle(&mut self, current_price: u128) -> Result<i128> {
        let pnl = short_pnl(
            self.position.hedge_size,
            self.position.entry_price,
            current_price,
        )?;
        self.realized_pnl = self
            .realized_pnl
            .checked_add(pnl)
            .ok_or(MathError::Overflow)?;
        Ok(pnl)
    }

    fn close(&mut self, current_price: u128, reason: HedgeCloseReason) -> Result<HedgeAction> {
        let realized_pnl = self.settle(current_price)?;
        self.position = HedgePosition::default();
        info!(%reason, realized_pnl, total_realized = self.realized_pnl, "Hedge closed");
        Ok(HedgeAction::Closed {
            realized_pnl,
            reason,
        })
    }
}

pub struct HedgingEngine {
    config: RwLock<HedgeConfig>,
    risk: Arc<RiskManager>,
    clock: Arc<dyn Clock>,
    orchestrator: Principal,
    governance: Principal,
    state: Mutex<HedgeState>,
}

impl std::fmt::Debug for HedgingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HedgingEngine")
            .field("config", &*self.config.read())
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl HedgingEngine {
    #[must_use]
    pub fn new(
        config: HedgeConfig,
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
            state: Mutex::new(HedgeState::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> HedgeConfig {
        self.config.read().clone()
    }

    /// Opens, adjusts or closes the hedge for the given exposure.
    ///
    /// `available_collateral` is the whole budget the position may use; the
    /// hedge is fully collateralized, so its size never exceeds it. The price
    /// is only read when the position actually changes.
    ///
    /// # Errors
    ///
    /// - `NotAuthorized` unless called by the orchestrator
    /// - price validation failures when the position must change
    pub fn update_hedge(
        &self,
        caller: &Principal,
        exposure: u128,
        available_collateral: u128,
    ) -> Result<HedgeAction> {
        self.orchestrator.require(caller, "update_hedge")?;
        let config = self.config.read().clone();
        let mut state = self.state.lock();

        if !config.enabled {
            if state.position.active {
                let price = self.risk.validated_price()?;
                return state.close(price, HedgeCloseReason::Manual);
            }
            return Ok(HedgeAction::None);
        }

        let target = bps_mul(exposure, config.hedge_ratio_bps)?;
        let size = target.min(available_collateral);

        if !state.position.active {
            if size == 0 {
                return Ok(HedgeAction::None);
            }
            let price = self.risk.validated_price()?;
            state.position = HedgePosition {
                active: true,
                exposure_amount: exposure,
                hedge_size: size,
                collateral_used: size,
                entry_price: price,
                open_timestamp: Some(self.clock.now()),
                hedge_ratio_bps: config.hedge_ratio_bps,
            };
            state.hedge_count += 1;
            info!(
                exposure,
                hedge_size = size,
                entry_price = price,
                "Hedge opened"
            );
            return Ok(HedgeAction::Opened {
                hedge_size: size,
                entry_price: price,
            });
        }

        if exposure == 0 {
            let price = self.risk.validated_price()?;
            return state.close(price, HedgeCloseReason::ExposureGone);
        }

        let tracked = state.position.exposure_amount;
        let change_bps = if tracked == 0 {
            BPS
        } else {
            bps_of(abs_diff(exposure, tracked), tracked)?
        };
        if change_bps < config.adjust_threshold_bps {
            debug!(exposure, tracked, change_bps, "Hedge within adjustment threshold");
            return Ok(HedgeAction::None);
        }

        let price = self.risk.validated_price()?;
        if size == 0 {
            return state.close(price, HedgeCloseReason::ExposureGone);
        }

        let realized_pnl = state.settle(price)?;
        let previous_size = state.position.hedge_size;
        state.position.exposure_amount = exposure;
        state.position.hedge_size = size;
        state.position.collateral_used = size;
        state.position.entry_price = price;
        state.position.hedge_ratio_bps = config.hedge_ratio_bps;
        info!(
            previous_size,
            hedge_size = size,
            entry_price = price,
            realized_pnl,
            "Hedge adjusted"
        );
        Ok(HedgeAction::Adjusted {
            previous_size,
            hedge_size: size,
            realized_pnl,
        })
    }

    /// Closes the position, settling PnL at the current price.
    ///
    /// An emergency close never fails on the price: if the feed is
    /// unusable the position settles flat at its entry price.
    ///
    /// # Errors
    ///
    /// `NotAuthorized` unless called by the orchestrator, or a price failure
    /// for non-emergency closes.
    pub fn close_hedge(&self, caller: &Principal, reason: HedgeCloseReason) -> Result<HedgeAction> {
        self.orchestrator.require(caller, "close_hedge")?;
        let mut state = self.state.lock();
        if !state.position.active {
            return Ok(HedgeAction::None);
        }

        let price = match self.risk.validated_price() {
            Ok(price) => price,
            Err(e) if reason == HedgeCloseReason::Emergency => {
                warn!(error = %e, "No usable price for emergency close, settling at entry");
                state.position.entry_price
            }
            Err(e) => return Err(e),
        };
        state.close(price, reason)
    }

    /// Closes the position if funding is adverse beyond the limit.
    ///
    /// # Errors
    ///
    /// `NotAuthorized` unless called by the orchestrator, or a price failure
    /// when the close must settle.
    pub fn check_funding_rate(&self, caller: &Principal, rate_bps: i64) -> Result<HedgeAction> {
        self.orchestrator.require(caller, "check_funding_rate")?;
        let max_rate = self.config.read().max_funding_rate_bps;
        let mut state = self.state.lock();
        if !state.position.active || !is_adverse_funding(rate_bps, max_rate) {
            return Ok(HedgeAction::None);
        }

        warn!(rate_bps, max_rate, "Adverse funding, closing hedge");
        let price = self.risk.validated_price()?;
        state.close(price, HedgeCloseReason::AdverseFunding)
    }

    /// Base ratio scaled by the current volatility band.
    #[must_use]
    pub fn recommended_hedge_ratio(&self) -> u128 {
        let base = self.config.read().hedge_ratio_bps;
        match self.risk.volatility_band() {
            VolatilityBand::Low => base / 2,
            VolatilityBand::Medium => base,
            VolatilityBand::High => (base.saturating_mul(3) / 2).min(BPS),
            VolatilityBand::Extreme => BPS,
        }
    }

    // =========================================================================
    // Views
    // =========================================================================

    #[must_use]
    pub fn position(&self) -> HedgePosition {
        self.state.lock().position
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.lock().position.active
    }

    /// Mark-to-market PnL of the open position; zero when flat.
    ///
    /// # Errors
    ///
    /// Returns a math error on overflow.
    pub fn unrealized_pnl(&self, current_price: u128) -> Result<i128> {
        let position = self.state.lock().position;
        if !position.active {
            return Ok(0);
        }
        short_pnl(position.hedge_size, position.entry_price, current_price)
    }

    #[must_use]
    pub fn realized_pnl(&self) -> i128 {
        self.state.lock().realized_pnl
    }

    #[must_use]
    pub fn hedge_count(&self) -> u64 {
        self.state.lock().hedge_count
    }

    // =========================================================================
    // Governance
    // =========================================================================

    /// # Errors
    ///
    /// Returns `NotAuthorized` or `InvalidParameter`.
    pub fn set_hedge_ratio_bps(&self, caller: &Principal, bps: u128) -> Result<()> {
        self.update_config(caller, "set_hedge_ratio_bps", |c| c.hedge_ratio_bps = bps)
    }

    /// # Errors
    ///
    /// Returns `NotAuthorized` or `InvalidParameter`.
    pub fn set_adjust_threshold_bps(&self, caller: &Principal, bps: u128) -> Result<()> {
        self.update_config(caller, "set_adjust_threshold_bps", |c| {
            c.adjust_threshold_bps = bps;
        })
    }

    /// # Errors
    ///
    /// Returns `NotAuthorized`.
    pub fn set_max_funding_rate_bps(&self, caller: &Principal, bps: u64) -> Result<()> {
        self.update_config(caller, "set_max_funding_rate_bps", |c| {
            c.max_funding_rate_bps = bps;
        })
    }

    /// # Errors
    ///
    /// Returns `NotAuthorized`.
    pub fn set_enabled(&self, caller: &Principal, enabled: bool) -> Result<()> {
        self.update_config(caller, "set_hedge_enabled", |c| c.enabled = enabled)
    }

    fn update_config(
        &self,
        caller: &Principal,
        operation: &'static str,
        apply: impl FnOnce(&mut HedgeConfig),
    ) -> Result<()> {
        self.governance.require(caller, operation)?;
        let mut candidate = self.config.read().clone();
        apply(&mut candidate);
        candidate.validate()?;
        *self.config.write() = candidate;
        info!(operation, "Hedge parameters updated");
        Ok(())
    }
}
