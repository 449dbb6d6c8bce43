use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::principal::Principal;
use crate::types::{HedgeAction, RebalanceAction, Venue, VolatilityBand};

/// Observable engine events, kept for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum EngineEvent {
    /// Volatility band changed.
    VolatilityBandChanged {
        previous: VolatilityBand,
        current: VolatilityBand,
        accumulator_bps: u128,
        timestamp: DateTime<Utc>,
    },

    /// Rewards claimed from a venue.
    Harvested {
        venue: Venue,
        amount: u128,
        timestamp: DateTime<Utc>,
    },

    /// A best-effort call failed and was skipped.
    CollaboratorFailed {
        venue: Option<Venue>,
        operation: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    BountyPaid {
        caller: Principal,
        amount: u128,
        timestamp: DateTime<Utc>,
    },

    Deployed {
        venue: Venue,
        amount: u128,
        credited: u128,
        timestamp: DateTime<Utc>,
    },

    Rebalanced {
        action: RebalanceAction,
        moved: u128,
        pending: bool,
        timestamp: DateTime<Utc>,
    },

    PendingWithdrawalClaimed {
        venue: Venue,
        amount: u128,
        timestamp: DateTime<Utc>,
    },

    Hedge {
        action: HedgeAction,
        timestamp: DateTime<Utc>,
    },

    CircuitBreakerTriggered {
        drawdown_bps: u128,
        high_water_mark: u128,
        timestamp: DateTime<Utc>,
    },

    CircuitBreakerReset {
        value: u128,
        timestamp: DateTime<Utc>,
    },

    Compounded {
        harvested: u128,
        compounded: u128,
        bounty: u128,
        timestamp: DateTime<Utc>,
    },

    /// Claimed withdrawal proceeds forwarded to the vault.
    VaultPaid {
        amount: u128,
        timestamp: DateTime<Utc>,
    },

    EmergencyWithdrawal {
        swept: u128,
        timestamp: DateTime<Utc>,
    },

    Unpaused {
        timestamp: DateTime<Utc>,
    },

    ParameterChanged {
        name: String,
        timestamp: DateTime<Utc>,
    },
}
