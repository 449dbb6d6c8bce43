//! CLI subcommands and the simulated stack they drive.

pub mod run;
pub mod show_config;
pub mod simulate;

pub use run::RunArgs;
pub use show_config::ShowConfigArgs;
pub use simulate::SimulateArgs;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::info;
use vault_engine_core::math::WAD;
use vault_engine_core::{Clock, ConfigLoader, EngineConfig};
use vault_engine_orchestrator::{
    EngineCollaborators, InMemoryCustody, ScriptedFundingRate, SimulatedPriceFeed,
    SimulatedYieldSource, StrategyEngine,
};

/// Arguments shared by every command that loads configuration.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Config file path (missing files fall back to defaults)
    #[arg(short, long, default_value = "config/engine.toml")]
    pub config: String,

    /// Profile overlay, loaded from `<stem>.<profile>.toml` next to the config
    #[arg(long)]
    pub profile: Option<String>,
}

impl ConfigArgs {
    pub fn load(&self) -> Result<EngineConfig> {
        match &self.profile {
            Some(profile) => ConfigLoader::load_with_profile(&self.config, profile),
            None => ConfigLoader::load(&self.config),
        }
        .with_context(|| format!("Failed to load config from {}", self.config))
    }
}

/// Knobs of the simulated venues.
#[derive(Args, Debug, Clone)]
pub struct VenueArgs {
    /// Capital the vault deposits before the first cycle, in whole units
    #[arg(long, default_value = "1000000")]
    pub deposit: Decimal,

    /// Rewards accrued per claim at the safe venue, bps of its value
    #[arg(long, default_value_t = 2)]
    pub safe_reward_bps: u128,

    /// Rewards accrued per claim at the growth venue, bps of its value
    #[arg(long, default_value_t = 5)]
    pub growth_reward_bps: u128,

    /// Seconds before a growth venue withdrawal can be claimed
    #[arg(long, default_value_t = 0)]
    pub growth_withdraw_delay_secs: u64,

    /// Funding rate reported by the hedge venue, signed bps
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub funding_rate_bps: i64,
}

/// Engine wired to in-memory collaborators.
pub struct SimulatedStack {
    pub engine: Arc<StrategyEngine>,
    pub feed: Arc<SimulatedPriceFeed>,
    pub growth: Arc<SimulatedYieldSource>,
    pub custody: Arc<InMemoryCustody>,
}

impl SimulatedStack {
    /// Builds the engine and funds it with the configured deposit.
    ///
    /// `prices[0]` is the opening price; the rest are served one per
    /// [`SimulatedPriceFeed::advance`].
    pub fn build(
        config: &EngineConfig,
        venues: &VenueArgs,
        prices: &[i128],
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let Some((&opening, script)) = prices.split_first() else {
            bail!("at least one price is required");
        };

        let feed = Arc::new(
            SimulatedPriceFeed::new(opening, clock.clone()).with_script(script.to_vec()),
        );
        let safe = Arc::new(
            SimulatedYieldSource::new("safe", clock.clone())
                .with_reward_rate_bps(venues.safe_reward_bps),
        );
        let growth = Arc::new(
            SimulatedYieldSource::new("growth", clock.clone())
                .with_reward_rate_bps(venues.growth_reward_bps)
                .with_withdraw_delay(Duration::from_secs(venues.growth_withdraw_delay_secs)),
        );
        let custody = Arc::new(InMemoryCustody::new());
        let funding = Arc::new(ScriptedFundingRate::new(venues.funding_rate_bps));

        let engine = Arc::new(StrategyEngine::new(
            config,
            EngineCollaborators {
                safe,
                growth: growth.clone(),
                price_feed: feed.clone(),
                custody: custody.clone(),
                funding: Some(funding),
            },
            clock,
        ));

        let deposit = to_base_units(venues.deposit, config.orchestrator.asset_decimals)?;
        let deployed = engine
            .deploy_capital(&config.principals.vault, deposit)
            .context("Initial deployment failed")?;
        info!(deposit, deployed, "Simulated vault funded");

        Ok(Self {
            engine,
            feed,
            growth,
            custody,
        })
    }
}

/// Converts a whole-unit amount to base units of an asset with `decimals`.
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<u128> {
    if amount.is_sign_negative() {
        bail!("amount {amount} must not be negative");
    }
    let scale = 10u64
        .checked_pow(decimals)
        .with_context(|| format!("{decimals} decimals is out of range"))?;
    amount
        .checked_mul(Decimal::from(scale))
        .and_then(|scaled| scaled.trunc().to_u128())
        .with_context(|| format!("amount {amount} is out of range"))
}

/// Converts a whole-unit price to the WAD-scaled feed value. Non-positive
/// prices pass through so broken-feed paths can be simulated.
pub fn to_wad_price(price: Decimal) -> Result<i128> {
    let wad = u64::try_from(WAD).context("WAD does not fit u64")?;
    price
        .checked_mul(Decimal::from(wad))
        .and_then(|scaled| scaled.trunc().to_i128())
        .with_context(|| format!("price {price} is out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use vault_engine_core::ManualClock;

    // ==== Unit conversion ====

    #[test]
    fn test_to_base_units() {
        assert_eq!(to_base_units(dec!(1.5), 18).unwrap(), 1_500_000_000_000_000_000);
        assert_eq!(to_base_units(dec!(100), 6).unwrap(), 100_000_000);
        assert_eq!(to_base_units(dec!(0.0000001), 6).unwrap(), 0);
    }

    #[test]
    fn test_to_base_units_rejects_bad_input() {
        assert!(to_base_units(dec!(-1), 18).is_err());
        assert!(to_base_units(dec!(1), 30).is_err());
    }

    #[test]
    fn test_to_wad_price() {
        assert_eq!(to_wad_price(dec!(2000)).unwrap(), 2_000 * WAD as i128);
        assert_eq!(to_wad_price(dec!(0.5)).unwrap(), (WAD / 2) as i128);
        assert_eq!(to_wad_price(dec!(-1)).unwrap(), -(WAD as i128));
    }

    // ==== Simulated stack ====

    fn venues() -> VenueArgs {
        VenueArgs {
            deposit: dec!(1000),
            safe_reward_bps: 0,
            growth_reward_bps: 0,
            growth_withdraw_delay_secs: 0,
            funding_rate_bps: 0,
        }
    }

    #[test]
    fn test_stack_deploys_initial_deposit() {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let stack = SimulatedStack::build(
            &EngineConfig::default(),
            &venues(),
            &[2_000 * WAD as i128],
            clock,
        )
        .unwrap();

        assert_eq!(stack.engine.idle_balance(), 0);
        assert_eq!(stack.engine.total_managed_value().unwrap(), 1_000 * WAD);
        assert!(stack.custody.transfers().is_empty());
    }

    #[test]
    fn test_stack_requires_a_price() {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        assert!(SimulatedStack::build(&EngineConfig::default(), &venues(), &[], clock).is_err());
    }
}
