//! Main entry point for the energy-data-downloader CLI

use clap::Parser;
use energy_data_downloader::cli::{self, Cli};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    // Check if JSON output is requested via environment variable
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("energy_data_downloader=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    // A scheduled run must always terminate normally: failures are logged
    // with their full chain, and a user interrupt is reported distinctly.
    let result: anyhow::Result<()> = tokio::select! {
        outcome = cli::commands::execute(&cli) => outcome.map_err(anyhow::Error::new),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted by user");
            return;
        }
    };

    if let Err(e) = result {
        error!("command failed: {e:#}");
        std::process::exit(1);
    }
}
