//! Slippage and allocation-cap checks.

use vault_engine_core::math::{bps_mul, bps_of, safe_sub};
use vault_engine_core::{Result, VaultError};

/// Fails if `actual` undershoots `expected` by more than `max_slippage_bps`.
/// Meeting or beating the expectation always passes.
///
/// # Errors
///
/// Returns `SlippageTooHigh` when the shortfall exceeds the limit.
pub fn validate_slippage(expected: u128, actual: u128, max_slippage_bps: u128) -> Result<()> {
    if actual >= expected {
        return Ok(());
    }
    let allowed_shortfall = bps_mul(expected, max_slippage_bps)?;
    if safe_sub(expected, actual) > allowed_shortfall {
        return Err(VaultError::SlippageTooHigh {
            expected,
            actual,
            max_slippage_bps,
        });
    }
    Ok(())
}

/// Fails if `protocol_value` is more than `max_allocation_bps` of `total_value`.
///
/// # Errors
///
/// Returns `AllocationExceedsLimit` when over the cap.
pub fn validate_allocation(
    protocol_value: u128,
    total_value: u128,
    max_allocation_bps: u128,
) -> Result<()> {
    let allocation_bps = bps_of(protocol_value, total_value)?;
    if allocation_bps > max_allocation_bps {
        return Err(VaultError::AllocationExceedsLimit {
            allocation_bps,
            max_allocation_bps,
        });
    }
    Ok(())
}
