//! Typed failures shared by every engine component.
//!
//! Failures fall into the categories of [`ErrorCategory`]. Only
//! authorization and capital-safety failures are allowed to abort a cycle
//! once it has started mutating state; see [`VaultError::aborts_cycle`].

use thiserror::Error;

use crate::principal::Principal;

/// Arithmetic failure from the checked fixed-point helpers.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum MathError {
    #[error("arithmetic overflow")]
    Overflow,
    #[error("arithmetic underflow")]
    Underflow,
    #[error("division by zero")]
    DivisionByZero,
}

/// Failure reported by an external collaborator (yield source, feed, custody).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{source_name}: {message}")]
pub struct CollaboratorError {
    /// Name of the collaborator that failed.
    pub source_name: String,
    pub message: String,
}

impl CollaboratorError {
    #[must_use]
    pub fn new(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

/// Coarse classification used by the propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller is not the permitted identity.
    Authorization,
    /// Price input too old or invalid.
    Validity,
    /// An interval has not elapsed yet.
    Timing,
    /// Circuit breaker, allocation cap, slippage.
    CapitalSafety,
    /// An external collaborator failed.
    External,
    /// Engine-internal condition (math, parameters, reentrancy, pause).
    Internal,
}

/// Errors returned by engine components.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VaultError {
    /// Caller is not allowed to invoke this entry point.
    #[error("caller {caller} is not authorized for {operation}")]
    NotAuthorized {
        caller: Principal,
        operation: &'static str,
    },

    /// Price feed data is older than allowed or its round is incomplete.
    #[error("stale price: age {age_secs}s exceeds {max_age_secs}s or round incomplete")]
    StalePrice { age_secs: u64, max_age_secs: u64 },

    /// Price feed reported a non-positive value.
    #[error("invalid price: {value}")]
    InvalidPrice { value: i128 },

    /// Compounding attempted before the minimum interval elapsed.
    #[error("compound too soon, {remaining_secs} seconds remaining")]
    CompoundTooSoon { remaining_secs: u64 },

    /// Queued parameter change executed before its delay elapsed.
    #[error("change {id} is timelocked for {remaining_secs} more seconds")]
    TimelockNotElapsed { id: u64, remaining_secs: u64 },

    /// Risk manager forbids execution (breaker active or extreme volatility).
    #[error("execution not allowed: {reason}")]
    ExecutionNotAllowed { reason: String },

    /// Drawdown exceeded the configured maximum; the breaker is now active.
    #[error("circuit breaker triggered: drawdown {drawdown_bps} bps exceeds {max_drawdown_bps} bps")]
    CircuitBreakerTriggered {
        drawdown_bps: u128,
        max_drawdown_bps: u128,
    },

    /// Received amount undershoots the expected amount by too much.
    #[error("slippage too high: expected {expected}, got {actual} (max {max_slippage_bps} bps)")]
    SlippageTooHigh {
        expected: u128,
        actual: u128,
        max_slippage_bps: u128,
    },

    /// A single venue's share of total value exceeds the cap.
    #[error("allocation {allocation_bps} bps exceeds limit {max_allocation_bps} bps")]
    AllocationExceedsLimit {
        allocation_bps: u128,
        max_allocation_bps: u128,
    },

    /// Entry point invoked from inside itself.
    #[error("reentrant call into {operation}")]
    ReentrantCall { operation: &'static str },

    /// Engine is paused after an emergency withdrawal.
    #[error("engine is paused")]
    Paused,

    /// Parameter outside its permitted range.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("collaborator failure: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("math error: {0}")]
    Math(#[from] MathError),
}

impl VaultError {
    /// Shorthand for [`VaultError::InvalidParameter`].
    #[must_use]
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::NotAuthorized { .. } => ErrorCategory::Authorization,
            Self::StalePrice { .. } | Self::InvalidPrice { .. } => ErrorCategory::Validity,
            Self::CompoundTooSoon { .. } | Self::TimelockNotElapsed { .. } => {
                ErrorCategory::Timing
            }
            Self::ExecutionNotAllowed { .. }
            | Self::CircuitBreakerTriggered { .. }
            | Self::SlippageTooHigh { .. }
            | Self::AllocationExceedsLimit { .. } => ErrorCategory::CapitalSafety,
            Self::Collaborator(_) => ErrorCategory::External,
            Self::ReentrantCall { .. }
            | Self::Paused
            | Self::InvalidParameter { .. }
            | Self::Math(_) => ErrorCategory::Internal,
        }
    }

    /// Whether this failure may abort a cycle after it started mutating state.
    #[must_use]
    pub const fn aborts_cycle(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Authorization | ErrorCategory::CapitalSafety
        )
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
