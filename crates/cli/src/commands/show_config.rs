use anyhow::Result;
use clap::Args;

use super::ConfigArgs;

#[derive(Args, Debug, Clone)]
pub struct ShowConfigArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Prints the configuration after defaults, file, profile and environment
/// have been merged and validated.
pub fn run(args: &ShowConfigArgs) -> Result<()> {
    let config = args.config.load()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
