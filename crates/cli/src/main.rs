use clap::{Parser, Subcommand};

mod commands;

use commands::{RunArgs, ShowConfigArgs, SimulateArgs};

#[derive(Parser)]
#[command(name = "vault-engine")]
#[command(about = "Keeper-driven strategy engine for a two-venue yield vault", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run cycles against simulated venues on a manual clock and print the reports
    Simulate(SimulateArgs),
    /// Drive cycles on a fixed interval against simulated venues until Ctrl+C
    Run(RunArgs),
    /// Print the merged, validated configuration
    ShowConfig(ShowConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate(args) => commands::simulate::run(args)?,
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::ShowConfig(args) => commands::show_config::run(&args)?,
    }

    Ok(())
}
