//! Fixed-point arithmetic on `u128` amounts.
//!
//! Two scales are used throughout the engine:
//!
//! - **Basis points** (`BPS`): ratios expressed as integers where
//!   10,000 = 100%. Allocation targets, drift, drawdown, fees and bounties
//!   all live on this scale.
//! - **WAD** (`WAD`): 18-decimal fixed point for prices and ratios that
//!   need more precision than basis points can carry.
//!
//! Every multiplication goes through a checked path and reports
//! [`MathError::Overflow`] instead of wrapping. Subtraction comes in two
//! flavours: [`safe_sub`] saturates at zero (used where a shortfall simply
//! means "nothing left") and [`checked_sub`] reports the underflow.

use rust_decimal::Decimal;

use crate::error::MathError;

// =============================================================================
// Constants
// =============================================================================

/// Basis-point denominator. 10,000 bps = 100%.
pub const BPS: u128 = 10_000;

/// 18-decimal fixed-point unit.
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// Seconds in a 365-day year.
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

pub type MathResult<T> = Result<T, MathError>;

// =============================================================================
// Core operations
// =============================================================================

/// Computes `a * b / denominator` without losing the intermediate product.
///
/// # Errors
///
/// Returns [`MathError::DivisionByZero`] if `denominator` is zero and
/// [`MathError::Overflow`] if `a * b` does not fit in a `u128`.
pub fn mul_div(a: u128, b: u128, denominator: u128) -> MathResult<u128> {
    if denominator == 0 {
        return Err(MathError::DivisionByZero);
    }
    if a == 0 || b == 0 {
        return Ok(0);
    }
    match a.checked_mul(b) {
        Some(product) => Ok(product / denominator),
        None => {
            // Split `a` into quotient and remainder against the denominator so
            // the large half never multiplies at full width.
            let q = a / denominator;
            let r = a % denominator;
            let high = q.checked_mul(b).ok_or(MathError::Overflow)?;
            let low = r.checked_mul(b).ok_or(MathError::Overflow)? / denominator;
            high.checked_add(low).ok_or(MathError::Overflow)
        }
    }
}

/// Applies a basis-point ratio: `amount * bps / 10_000`.
///
/// # Errors
///
/// Returns [`MathError::Overflow`] on overflow.
pub fn bps_mul(amount: u128, bps: u128) -> MathResult<u128> {
    mul_div(amount, bps, BPS)
}

/// Share of `part` in `whole`, in basis points. Zero when `whole` is zero.
///
/// # Errors
///
/// Returns [`MathError::Overflow`] on overflow.
pub fn bps_of(part: u128, whole: u128) -> MathResult<u128> {
    if whole == 0 {
        return Ok(0);
    }
    mul_div(part, BPS, whole)
}

/// WAD multiplication: `a * b / 1e18`.
///
/// # Errors
///
/// Returns [`MathError::Overflow`] on overflow.
pub fn wad_mul(a: u128, b: u128) -> MathResult<u128> {
    mul_div(a, b, WAD)
}

/// WAD division: `a * 1e18 / b`.
///
/// # Errors
///
/// Returns [`MathError::DivisionByZero`] if `b` is zero, or
/// [`MathError::Overflow`] on overflow.
pub fn wad_div(a: u128, b: u128) -> MathResult<u128> {
    mul_div(a, WAD, b)
}

/// Subtraction that floors at zero.
#[must_use]
pub const fn safe_sub(a: u128, b: u128) -> u128 {
    a.saturating_sub(b)
}

/// Subtraction that reports underflow.
///
/// # Errors
///
/// Returns [`MathError::Underflow`] when `b > a`.
pub fn checked_sub(a: u128, b: u128) -> MathResult<u128> {
    a.checked_sub(b).ok_or(MathError::Underflow)
}

/// Checked addition.
///
/// # Errors
///
/// Returns [`MathError::Overflow`] on overflow.
pub fn checked_add(a: u128, b: u128) -> MathResult<u128> {
    a.checked_add(b).ok_or(MathError::Overflow)
}

/// Integer square root (floor), Newton's method.
#[must_use]
pub fn sqrt(value: u128) -> u128 {
    if value < 2 {
        return value;
    }
    let mut x = value / 2 + 1;
    let mut y = (x + value / x) / 2;
    while y < x {
        x = y;
        y = (x + value / x) / 2;
    }
    x
}

#[must_use]
pub fn min(a: u128, b: u128) -> u128 {
    a.min(b)
}

#[must_use]
pub fn max(a: u128, b: u128) -> u128 {
    a.max(b)
}

#[must_use]
pub const fn abs_diff(a: u128, b: u128) -> u128 {
    a.abs_diff(b)
}

/// Signed difference `a - b` as `i128`.
///
/// # Errors
///
/// Returns [`MathError::Overflow`] if either side exceeds `i128::MAX`.
pub fn signed_delta(a: u128, b: u128) -> MathResult<i128> {
    let a = i128::try_from(a).map_err(|_| MathError::Overflow)?;
    let b = i128::try_from(b).map_err(|_| MathError::Overflow)?;
    a.checked_sub(b).ok_or(MathError::Overflow)
}

/// Converts a raw base-unit amount into a human-readable decimal.
///
/// Amounts that do not fit the 96-bit `Decimal` mantissa saturate to
/// `Decimal::MAX`; this is a display helper, never an accounting path.
#[must_use]
pub fn to_decimal(amount: u128, decimals: u32) -> Decimal {
    i64::try_from(amount)
        .ok()
        .map(|v| Decimal::new(v, decimals.min(28)))
        .or_else(|| {
            i128::try_from(amount)
                .ok()
                .and_then(|v| Decimal::try_from_i128_with_scale(v, decimals.min(28)).ok())
        })
        .unwrap_or(Decimal::MAX)
}
