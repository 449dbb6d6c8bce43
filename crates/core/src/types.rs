//! Domain types shared across components.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::math::BPS;
use crate::principal::Principal;

// =============================================================================
// Venues and allocation
// =============================================================================

/// One of the two yield sources capital is split between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    /// Low-risk venue (lending, stable yield).
    Safe,
    /// Directional venue whose exposure is hedged.
    Growth,
}

impl Venue {
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Safe => Self::Growth,
            Self::Growth => Self::Safe,
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safe => write!(f, "safe"),
            Self::Growth => write!(f, "growth"),
        }
    }
}

/// Target split between the venues, in basis points. Always sums to 10,000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationTargets {
    safe_bps: u128,
    growth_bps: u128,
}

impl AllocationTargets {
    /// # Errors
    ///
    /// Returns `InvalidParameter` unless `safe_bps + growth_bps == 10_000`.
    pub fn new(safe_bps: u128, growth_bps: u128) -> Result<Self> {
        if safe_bps.checked_add(growth_bps) != Some(BPS) {
            return Err(VaultError::invalid(
                "allocation_targets",
                format!("{safe_bps} + {growth_bps} must equal {BPS}"),
            ));
        }
        Ok(Self {
            safe_bps,
            growth_bps,
        })
    }

    /// Targets from the safe share alone; growth takes the remainder.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `safe_bps` exceeds 10,000.
    pub fn from_safe(safe_bps: u128) -> Result<Self> {
        if safe_bps > BPS {
            return Err(VaultError::invalid("safe_bps", format!("{safe_bps} > {BPS}")));
        }
        Ok(Self {
            safe_bps,
            growth_bps: BPS - safe_bps,
        })
    }

    #[must_use]
    pub const fn safe_bps(&self) -> u128 {
        self.safe_bps
    }

    #[must_use]
    pub const fn growth_bps(&self) -> u128 {
        self.growth_bps
    }

    #[must_use]
    pub const fn for_venue(&self, venue: Venue) -> u128 {
        match venue {
            Venue::Safe => self.safe_bps,
            Venue::Growth => self.growth_bps,
        }
    }
}

impl Default for AllocationTargets {
    fn default() -> Self {
        Self {
            safe_bps: 7_000,
            growth_bps: 3_000,
        }
    }
}

// =============================================================================
// Volatility
// =============================================================================

/// Market volatility classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityBand {
    Low,
    Medium,
    High,
    Extreme,
}

impl fmt::Display for VolatilityBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Extreme => write!(f, "extreme"),
        }
    }
}

/// Observable volatility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolatilitySnapshot {
    pub band: VolatilityBand,
    /// Smoothed absolute price change, bps.
    pub accumulator_bps: u128,
    /// Reference price from the last update (0 before the first observation).
    pub last_price: u128,
    pub last_update: Option<DateTime<Utc>>,
}

// =============================================================================
// Circuit breaker
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub active: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub high_water_mark: u128,
    pub last_checked_value: u128,
    pub last_checked_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Hedge
// =============================================================================

/// Short hedge against the growth venue's directional exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HedgePosition {
    pub active: bool,
    pub exposure_amount: u128,
    pub hedge_size: u128,
    pub collateral_used: u128,
    /// Price at open or last adjustment. Non-zero whenever `active`.
    pub entry_price: u128,
    pub open_timestamp: Option<DateTime<Utc>>,
    pub hedge_ratio_bps: u128,
}

/// What a hedge update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum HedgeAction {
    None,
    Opened { hedge_size: u128, entry_price: u128 },
    Adjusted {
        previous_size: u128,
        hedge_size: u128,
        realized_pnl: i128,
    },
    Closed { realized_pnl: i128, reason: HedgeCloseReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HedgeCloseReason {
    Manual,
    AdverseFunding,
    ExposureGone,
    Emergency,
}

impl fmt::Display for HedgeCloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::AdverseFunding => write!(f, "adverse_funding"),
            Self::ExposureGone => write!(f, "exposure_gone"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}

// =============================================================================
// Compounding
// =============================================================================

/// One harvest-and-compound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompoundRecord {
    pub timestamp: DateTime<Utc>,
    pub harvested: u128,
    pub compounded: u128,
    pub bounty_paid: u128,
    pub caller: Principal,
}

// =============================================================================
// Rebalancing
// =============================================================================

/// Result of a rebalance evaluation. Produced fresh, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RebalanceAction {
    pub needs_rebalance: bool,
    /// Positive: capital should move into the safe venue.
    pub safe_delta: i128,
    /// Positive: capital should move into the growth venue.
    pub growth_delta: i128,
    /// Coarse 0-10 scale.
    pub urgency: u8,
}

impl RebalanceAction {
    #[must_use]
    pub const fn none() -> Self {
        Self {
            needs_rebalance: false,
            safe_delta: 0,
            growth_delta: 0,
            urgency: 0,
        }
    }

    /// The venue capital leaves and the amount, if anything moves.
    #[must_use]
    pub fn movement(&self) -> Option<(Venue, Venue, u128)> {
        if !self.needs_rebalance {
            return None;
        }
        if self.safe_delta > 0 {
            Some((Venue::Growth, Venue::Safe, self.safe_delta.unsigned_abs()))
        } else if self.growth_delta > 0 {
            Some((Venue::Safe, Venue::Growth, self.growth_delta.unsigned_abs()))
        } else {
            None
        }
    }
}
