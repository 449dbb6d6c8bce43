//! Capital allocation policies of the vault strategy engine.
//!
//! Each component owns its state and accepts mutations only from the
//! orchestrator principal; parameter setters belong to governance.

pub mod compounder;
pub mod hedging;
pub mod history;
pub mod rebalance;

#[cfg(test)]
mod testing;

pub use compounder::{AutoCompounder, CompoundTotals};
pub use hedging::{is_adverse_funding, short_pnl, HedgingEngine};
pub use history::CompoundHistory;
pub use rebalance::RebalancePolicy;
