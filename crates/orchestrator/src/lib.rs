//! Strategy engine orchestration.
//!
//! [`StrategyEngine`] drives the risk manager, rebalance policy, hedging
//! engine and auto-compounder through a keeper-triggered cycle, and exposes
//! the vault, guardian and governance entry points around it.

pub mod engine;
pub mod governance;
pub mod guard;
pub mod report;
pub mod simulated;
pub mod status;

pub use engine::{EngineCollaborators, StrategyEngine};
pub use governance::{GovernanceQueue, ParameterChange, QueuedChange};
pub use report::{CycleReport, CycleStep, EmergencyReport, PendingMove, StepFailure};
pub use simulated::{
    InMemoryCustody, ScriptedFundingRate, SimOp, SimulatedPriceFeed, SimulatedYieldSource,
};
pub use status::{CurrentAllocation, EngineStatus, STATUS_COMPOUND_HISTORY};
