//! Offline simulation on a manual clock.
//!
//! Each step advances the clock, serves the next scripted price, applies the
//! growth venue's return and runs one cycle. Reports and the final status
//! are printed to stdout as JSON; logs go to stderr.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use rust_decimal::Decimal;
use tracing::{info, warn};
use vault_engine_core::{ManualClock, Principal, VaultError};

use super::{to_wad_price, ConfigArgs, SimulatedStack, VenueArgs};

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub venues: VenueArgs,

    /// Number of cycles to run
    #[arg(long, default_value_t = 24)]
    pub cycles: u32,

    /// Comma-separated price path in whole units, one per cycle; the last price repeats
    #[arg(long, value_delimiter = ',', default_value = "2000")]
    pub prices: Vec<Decimal>,

    /// Simulated seconds between cycles
    #[arg(long, default_value_t = 3600)]
    pub step_secs: u64,

    /// Return applied to the growth venue each step, bps (negative for losses)
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub growth_return_bps: i64,

    /// Print only the final status
    #[arg(long)]
    pub quiet: bool,
}

pub fn run(args: SimulateArgs) -> Result<()> {
    let config = args.config.load()?;
    let prices = args
        .prices
        .iter()
        .map(|price| to_wad_price(*price))
        .collect::<Result<Vec<_>>>()?;

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let stack = SimulatedStack::build(&config, &args.venues, &prices, clock.clone())?;
    let keeper = Principal::new("simulator");

    info!(
        cycles = args.cycles,
        step_secs = args.step_secs,
        prices = prices.len(),
        "Starting simulation"
    );

    let mut completed = 0u32;
    let mut aborted = 0u32;
    for step in 1..=args.cycles {
        clock.advance_secs(args.step_secs);
        stack.feed.advance();
        if args.growth_return_bps != 0 {
            stack.growth.apply_return_bps(args.growth_return_bps);
        }

        match stack.engine.run_cycle(&keeper) {
            Ok(report) => {
                completed += 1;
                if !args.quiet {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
            Err(e) => {
                aborted += 1;
                warn!(step, error = %e, category = ?e.category(), "Cycle aborted");
                if matches!(e, VaultError::ExecutionNotAllowed { .. }) {
                    let allowed = stack.engine.try_recover(&keeper)?;
                    info!(step, allowed, "Recovery attempted");
                }
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&stack.engine.status())?);
    info!(
        completed,
        aborted,
        bounties = stack.custody.received_by(&keeper),
        "Simulation finished"
    );
    Ok(())
}
