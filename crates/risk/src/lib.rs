//! Risk gate for the vault strategy engine.
//!
//! - [`price`]: feed validation (staleness, positivity, round completeness)
//! - [`volatility`]: smoothed volatility accumulator and band classification
//! - [`circuit_breaker`]: drawdown latch with cooldown and recovery
//! - [`limits`]: slippage and per-venue allocation caps
//! - [`manager`]: the [`RiskManager`] that ties them together behind
//!   principal checks

pub mod circuit_breaker;
pub mod limits;
pub mod manager;
pub mod price;
pub mod volatility;

pub use circuit_breaker::{DrawdownBreaker, DrawdownCheck};
pub use manager::RiskManager;
pub use price::validate_price;
pub use volatility::{allocation_for, classify, VolatilityTracker, VolatilityUpdate};
