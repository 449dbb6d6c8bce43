//! Price feed validation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use vault_engine_core::clock::elapsed;
use vault_engine_core::{PriceData, Result, VaultError};

/// Validates a raw feed reading and returns the positive WAD price.
///
/// Checks run in order: age against `max_age`, positivity, round
/// completeness. A reading stamped in the future counts as age zero.
///
/// # Errors
///
/// - `StalePrice` if the reading is older than `max_age` or its round is incomplete
/// - `InvalidPrice` if the value is zero or negative
pub fn validate_price(data: &PriceData, now: DateTime<Utc>, max_age: Duration) -> Result<u128> {
    let age = elapsed(data.updated_at, now);
    if age > max_age {
        return Err(VaultError::StalePrice {
            age_secs: age.as_secs(),
            max_age_secs: max_age.as_secs(),
        });
    }

    if data.value <= 0 {
        return Err(VaultError::InvalidPrice { value: data.value });
    }

    if !data.round_complete {
        return Err(VaultError::StalePrice {
            age_secs: age.as_secs(),
            max_age_secs: max_age.as_secs(),
        });
    }

    Ok(data.value.unsigned_abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn reading(value: i128, age_secs: i64, round_complete: bool) -> PriceData {
        PriceData {
            value,
            updated_at: now() - chrono::Duration::seconds(age_secs),
            round_complete,
        }
    }

    #[test]
    fn test_fresh_positive_price_passes() {
        let price = validate_price(&reading(2_000, 10, true), now(), Duration::from_secs(3_600));
        assert_eq!(price.unwrap(), 2_000);
    }

    #[test]
    fn test_exactly_at_staleness_limit_passes() {
        let price = validate_price(&reading(1, 3_600, true), now(), Duration::from_secs(3_600));
        assert!(price.is_ok());
    }

    #[test]
    fn test_stale_price_rejected() {
        let err = validate_price(&reading(2_000, 3_601, true), now(), Duration::from_secs(3_600))
            .unwrap_err();
        assert_eq!(
            err,
            VaultError::StalePrice {
                age_secs: 3_601,
                max_age_secs: 3_600
            }
        );
    }

    #[test]
    fn test_non_positive_price_rejected() {
        for value in [0, -5] {
            let err = validate_price(&reading(value, 0, true), now(), Duration::from_secs(60))
                .unwrap_err();
            assert_eq!(err, VaultError::InvalidPrice { value });
        }
    }

    #[test]
    fn test_incomplete_round_is_stale() {
        let err =
            validate_price(&reading(2_000, 0, false), now(), Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, VaultError::StalePrice { .. }));
    }

    #[test]
    fn test_staleness_checked_before_validity() {
        let err =
            validate_price(&reading(-1, 7_200, true), now(), Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, VaultError::StalePrice { .. }));
    }
}
