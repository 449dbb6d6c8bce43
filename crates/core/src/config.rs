use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::math::BPS;
use crate::principal::Principal;
use crate::types::AllocationTargets;

// =============================================================================
// Top level
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub principals: PrincipalsConfig,
    pub risk: RiskConfig,
    pub rebalance: RebalanceConfig,
    pub hedge: HedgeConfig,
    pub compounder: CompounderConfig,
    pub orchestrator: OrchestratorConfig,
    pub governance: GovernanceConfig,
}

impl EngineConfig {
    /// Checks every section for out-of-range or inconsistent values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.risk.validate()?;
        self.rebalance.validate()?;
        self.hedge.validate()?;
        self.compounder.validate()?;
        Ok(())
    }
}

fn check_bps(name: &'static str, value: u128) -> Result<()> {
    if value > BPS {
        return Err(VaultError::invalid(name, format!("{value} exceeds {BPS} bps")));
    }
    Ok(())
}

// =============================================================================
// Principals
// =============================================================================

/// Identities allowed on each class of entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrincipalsConfig {
    /// The strategy engine itself; the only caller components accept for mutations.
    pub orchestrator: Principal,
    /// Timelocked parameter changes.
    pub governance: Principal,
    /// Emergency withdrawal, pause and manual breaker trips.
    pub guardian: Principal,
    /// The pooled vault depositing and withdrawing capital.
    pub vault: Principal,
}

impl Default for PrincipalsConfig {
    fn default() -> Self {
        Self {
            orchestrator: Principal::new("strategy-engine"),
            governance: Principal::new("governance"),
            guardian: Principal::new("guardian"),
            vault: Principal::new("vault"),
        }
    }
}

// =============================================================================
// Risk
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Maximum age of a price reading.
    #[serde(with = "duration_secs")]
    pub price_staleness: Duration,

    /// Readings further apart than this replace the accumulator instead of
    /// averaging into it.
    #[serde(with = "duration_secs")]
    pub volatility_window: Duration,

    /// Accumulator cutoffs: below `medium` is Low, below `high` Medium,
    /// below `extreme` High, otherwise Extreme.
    pub medium_volatility_bps: u128,
    pub high_volatility_bps: u128,
    pub extreme_volatility_bps: u128,

    /// Drawdown from the high-water mark that trips the breaker.
    pub max_drawdown_bps: u128,

    /// Minimum time the breaker stays active.
    #[serde(with = "duration_secs")]
    pub breaker_cooldown: Duration,

    /// Share of the high-water mark value must recover to before reset.
    pub recovery_bps: u128,

    pub max_slippage_bps: u128,

    /// Cap on the growth venue's share of total value.
    pub max_allocation_bps: u128,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            price_staleness: Duration::from_secs(3_600),
            volatility_window: Duration::from_secs(3_600),
            medium_volatility_bps: 200,
            high_volatility_bps: 500,
            extreme_volatility_bps: 1_000,
            max_drawdown_bps: 1_000,
            breaker_cooldown: Duration::from_secs(86_400),
            recovery_bps: 9_500,
            max_slippage_bps: 100,
            max_allocation_bps: 5_000,
        }
    }
}

impl RiskConfig {
    /// # Errors
    ///
    /// Returns `InvalidParameter` for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if self.price_staleness.is_zero() {
            return Err(VaultError::invalid("price_staleness", "must be non-zero"));
        }
        if !(self.medium_volatility_bps < self.high_volatility_bps
            && self.high_volatility_bps < self.extreme_volatility_bps)
        {
            return Err(VaultError::invalid(
                "volatility_thresholds",
                "must be strictly increasing",
            ));
        }
        check_bps("max_drawdown_bps", self.max_drawdown_bps)?;
        check_bps("recovery_bps", self.recovery_bps)?;
        check_bps("max_slippage_bps", self.max_slippage_bps)?;
        check_bps("max_allocation_bps", self.max_allocation_bps)?;
        Ok(())
    }

    #[must_use]
    pub fn with_max_drawdown_bps(mut self, bps: u128) -> Self {
        self.max_drawdown_bps = bps;
        self
    }

    #[must_use]
    pub fn with_breaker_cooldown(mut self, cooldown: Duration) -> Self {
        self.breaker_cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_price_staleness(mut self, staleness: Duration) -> Self {
        self.price_staleness = staleness;
        self
    }

    #[must_use]
    pub fn with_volatility_window(mut self, window: Duration) -> Self {
        self.volatility_window = window;
        self
    }

    #[must_use]
    pub fn with_max_slippage_bps(mut self, bps: u128) -> Self {
        self.max_slippage_bps = bps;
        self
    }

    #[must_use]
    pub fn with_max_allocation_bps(mut self, bps: u128) -> Self {
        self.max_allocation_bps = bps;
        self
    }
}

// =============================================================================
// Rebalance
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    /// Governance-set base split.
    pub targets: AllocationTargets,
    pub drift_threshold_bps: u128,
    #[serde(with = "duration_secs")]
    pub min_interval: Duration,
    /// Rebalance regardless of drift once this much time has passed.
    #[serde(with = "duration_secs")]
    pub max_interval: Duration,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            targets: AllocationTargets::default(),
            drift_threshold_bps: 500,
            min_interval: Duration::from_secs(3_600),
            max_interval: Duration::from_secs(7 * 86_400),
        }
    }
}

impl RebalanceConfig {
    /// # Errors
    ///
    /// Returns `InvalidParameter` for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        AllocationTargets::new(self.targets.safe_bps(), self.targets.growth_bps())?;
        check_bps("drift_threshold_bps", self.drift_threshold_bps)?;
        if self.min_interval > self.max_interval {
            return Err(VaultError::invalid(
                "rebalance_interval",
                "min_interval exceeds max_interval",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_drift_threshold_bps(mut self, bps: u128) -> Self {
        self.drift_threshold_bps = bps;
        self
    }

    #[must_use]
    pub fn with_intervals(mut self, min: Duration, max: Duration) -> Self {
        self.min_interval = min;
        self.max_interval = max;
        self
    }
}

// =============================================================================
// Hedge
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HedgeConfig {
    pub enabled: bool,
    /// Fraction of exposure offset by the short.
    pub hedge_ratio_bps: u128,
    /// Relative exposure change that triggers an adjustment.
    pub adjust_threshold_bps: u128,
    /// Adverse funding beyond this closes the hedge.
    pub max_funding_rate_bps: u64,
    /// Share of safe-venue value offered as hedge collateral.
    pub collateral_budget_bps: u128,
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hedge_ratio_bps: 5_000,
            adjust_threshold_bps: 1_000,
            max_funding_rate_bps: 100,
            collateral_budget_bps: 1_000,
        }
    }
}

impl HedgeConfig {
    /// # Errors
    ///
    /// Returns `InvalidParameter` for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        check_bps("hedge_ratio_bps", self.hedge_ratio_bps)?;
        check_bps("adjust_threshold_bps", self.adjust_threshold_bps)?;
        check_bps("collateral_budget_bps", self.collateral_budget_bps)?;
        Ok(())
    }

    #[must_use]
    pub fn with_hedge_ratio_bps(mut self, bps: u128) -> Self {
        self.hedge_ratio_bps = bps;
        self
    }

    #[must_use]
    pub fn with_adjust_threshold_bps(mut self, bps: u128) -> Self {
        self.adjust_threshold_bps = bps;
        self
    }

    #[must_use]
    pub fn with_max_funding_rate_bps(mut self, bps: u64) -> Self {
        self.max_funding_rate_bps = bps;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// =============================================================================
// Compounder
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompounderConfig {
    #[serde(with = "duration_secs")]
    pub min_interval: Duration,
    /// Caller incentive as a share of harvested value.
    pub bounty_bps: u128,
    /// Upper bound governance may set `bounty_bps` to.
    pub max_bounty_bps: u128,
    pub history_capacity: usize,
}

impl Default for CompounderConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(3_600),
            bounty_bps: 50,
            max_bounty_bps: 500,
            history_capacity: 100,
        }
    }
}

impl CompounderConfig {
    /// # Errors
    ///
    /// Returns `InvalidParameter` for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        check_bps("max_bounty_bps", self.max_bounty_bps)?;
        if self.bounty_bps > self.max_bounty_bps {
            return Err(VaultError::invalid(
                "bounty_bps",
                format!("{} exceeds max {}", self.bounty_bps, self.max_bounty_bps),
            ));
        }
        if self.history_capacity == 0 {
            return Err(VaultError::invalid("history_capacity", "must be non-zero"));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    #[must_use]
    pub fn with_bounty_bps(mut self, bps: u128) -> Self {
        self.bounty_bps = bps;
        self
    }
}

// =============================================================================
// Orchestrator / governance
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Number of recent events retained for monitoring.
    pub event_buffer: usize,
    /// Decimals of the accounting asset, for display only.
    pub asset_decimals: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            event_buffer: 50,
            asset_decimals: 18,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Delay between queueing and executing a parameter change.
    #[serde(with = "duration_secs")]
    pub delay: Duration,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2 * 86_400),
        }
    }
}

// =============================================================================
// Serde support for Duration
// =============================================================================

/// Serializes a `Duration` as whole seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.risk.medium_volatility_bps, 200);
        assert_eq!(config.risk.high_volatility_bps, 500);
        assert_eq!(config.risk.extreme_volatility_bps, 1_000);
        assert_eq!(config.risk.recovery_bps, 9_500);
        assert_eq!(config.rebalance.targets.safe_bps(), 7_000);
        assert_eq!(config.compounder.history_capacity, 100);
        assert_eq!(config.compounder.bounty_bps, 50);
    }

    #[test]
    fn test_rejects_bad_bps() {
        let mut config = EngineConfig::default();
        config.risk.max_drawdown_bps = 10_001;
        assert!(matches!(
            config.validate(),
            Err(VaultError::InvalidParameter {
                name: "max_drawdown_bps",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_inverted_intervals() {
        let config = RebalanceConfig::default()
            .with_intervals(Duration::from_secs(100), Duration::from_secs(10));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bounty_above_max() {
        let config = CompounderConfig::default().with_bounty_bps(600);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_increasing_volatility_thresholds() {
        let mut config = RiskConfig::default();
        config.high_volatility_bps = config.medium_volatility_bps;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations_serialize_as_seconds() {
        let json = serde_json::to_value(RiskConfig::default()).unwrap();
        assert_eq!(json["price_staleness"], 3_600);
        assert_eq!(json["breaker_cooldown"], 86_400);
    }

    #[test]
    fn test_builder_methods() {
        let risk = RiskConfig::default()
            .with_max_drawdown_bps(2_000)
            .with_breaker_cooldown(Duration::from_secs(60));
        assert_eq!(risk.max_drawdown_bps, 2_000);
        assert_eq!(risk.breaker_cooldown, Duration::from_secs(60));
    }
}
