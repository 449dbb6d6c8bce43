//! Long-running keeper loop against simulated venues on wall-clock time.

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;
use rust_decimal::Decimal;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};
use vault_engine_core::{Clock, Principal, SystemClock, VaultError};

use super::{to_wad_price, ConfigArgs, SimulatedStack, VenueArgs};

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub venues: VenueArgs,

    /// Seconds between cycles
    #[arg(long, default_value_t = 60)]
    pub interval_secs: u64,

    /// Reference price in whole units
    #[arg(long, default_value = "2000")]
    pub price: Decimal,

    /// Keeper identity credited with bounties
    #[arg(long, default_value = "keeper")]
    pub keeper: String,
}

pub async fn run(args: RunArgs) -> Result<()> {
    if args.interval_secs == 0 {
        bail!("--interval-secs must be positive");
    }
    let config = args.config.load()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let stack = SimulatedStack::build(
        &config,
        &args.venues,
        &[to_wad_price(args.price)?],
        clock,
    )?;
    let keeper = Principal::new(args.keeper);

    info!(
        interval_secs = args.interval_secs,
        keeper = %keeper,
        "Engine running, press Ctrl+C to stop"
    );

    let mut ticker = interval(Duration::from_secs(args.interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                stack.feed.advance();
                match stack.engine.run_cycle(&keeper) {
                    Ok(report) => {
                        info!(
                            cycle = report.cycle,
                            band = %report.volatility_band,
                            harvested = report.harvested,
                            bounty = report.bounty,
                            rebalanced = report.rebalanced,
                            failures = report.failures.len(),
                            "Cycle report"
                        );
                        debug!(report = %serde_json::to_string(&report)?, "Cycle report detail");
                    }
                    Err(e) => {
                        warn!(error = %e, category = ?e.category(), "Cycle aborted");
                        if matches!(e, VaultError::ExecutionNotAllowed { .. }) {
                            match stack.engine.try_recover(&keeper) {
                                Ok(allowed) => info!(allowed, "Recovery attempted"),
                                Err(e) => warn!(error = %e, "Recovery failed"),
                            }
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&stack.engine.status())?);
    info!(
        bounties = stack.custody.received_by(&keeper),
        "Engine stopped"
    );
    Ok(())
}
