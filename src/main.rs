use clap::Parser;
use dotenv::dotenv;
use tracing_subscriber::EnvFilter;

use paircycler::cli::{Cli, Commands};
use paircycler::commands;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from the .env file
    dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cli.verbose).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Run => commands::run_engine().await?,
        Commands::Pairs { limit, status } => commands::run_pairs(limit, status).await?,
        Commands::Stats => commands::run_stats().await?,
    }

    Ok(())
}
