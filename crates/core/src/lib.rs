//! Shared foundation of the vault strategy engine: fixed-point math, the
//! error taxonomy, caller identity, time, domain types, collaborator
//! contracts, events and configuration.

pub mod clock;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod math;
pub mod principal;
pub mod traits;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CompounderConfig, EngineConfig, GovernanceConfig, HedgeConfig, OrchestratorConfig,
    PrincipalsConfig, RebalanceConfig, RiskConfig,
};
pub use config_loader::ConfigLoader;
pub use error::{CollaboratorError, ErrorCategory, MathError, Result, VaultError};
pub use events::EngineEvent;
pub use principal::Principal;
pub use traits::{
    AssetCustody, CollaboratorResult, FundingRateSource, PriceData, PriceFeed, WithdrawOutcome,
    YieldSource,
};
pub use types::{
    AllocationTargets, CircuitBreakerSnapshot, CompoundRecord, HedgeAction, HedgeCloseReason,
    HedgePosition, RebalanceAction, Venue, VolatilityBand, VolatilitySnapshot,
};
