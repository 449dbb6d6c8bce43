//! Contracts of the external collaborators the engine drives.
//!
//! Implementations are thin pass-throughs to a venue. They return final,
//! authoritative amounts or fail explicitly; the engine never retries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::principal::Principal;

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Outcome of a withdrawal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawOutcome {
    /// Funds are back in custody.
    Completed(u128),
    /// Funds are in flight; claim with [`YieldSource::claim_withdraw`] later.
    Pending { requested: u128 },
}

/// Adapter for one yield venue.
pub trait YieldSource: Send + Sync {
    fn name(&self) -> &str;

    /// Deposits `amount`; returns the value actually credited.
    fn deposit_value(&self, amount: u128) -> CollaboratorResult<u128>;

    fn request_withdraw(&self, amount: u128) -> CollaboratorResult<WithdrawOutcome>;

    /// Claims a previously pending withdrawal; returns the amount received.
    fn claim_withdraw(&self) -> CollaboratorResult<u128>;

    fn has_pending_withdrawal(&self) -> bool;

    /// Claims accrued rewards; returns the harvested value.
    fn claim_rewards(&self) -> CollaboratorResult<u128>;

    fn total_value(&self) -> CollaboratorResult<u128>;
}

/// Raw price feed reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceData {
    /// WAD-scaled price. May be non-positive on a broken feed.
    pub value: i128,
    pub updated_at: DateTime<Utc>,
    /// False when the feed's answer belongs to an unfinished round.
    pub round_complete: bool,
}

pub trait PriceFeed: Send + Sync {
    fn latest_price(&self) -> CollaboratorResult<PriceData>;
}

/// Funding rate of the hedge venue, signed bps per funding period.
///
/// Positive values pay shorts; negative values charge them.
pub trait FundingRateSource: Send + Sync {
    fn funding_rate_bps(&self) -> CollaboratorResult<i64>;
}

/// Custody of the engine's idle balance.
pub trait AssetCustody: Send + Sync {
    fn transfer(&self, to: &Principal, amount: u128) -> CollaboratorResult<()>;
}
