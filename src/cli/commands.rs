//! Command definitions and execution

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::config::{Settings, BATCH_SIZE};
use crate::store::{loader, Store};
use crate::updater::UpdateOrchestrator;
use crate::KindSelection;

use super::CliError;

/// Incremental downloader and SQLite loader for grid generation forecasts
/// and day-ahead spot prices.
#[derive(Debug, Parser)]
#[command(name = "energy-data-downloader", version, about)]
pub struct Cli {
    /// Base directory for data files (overrides ENERGY_DATA_DIR)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Resolve the settings for this invocation.
    pub fn settings(&self) -> Settings {
        match &self.data_dir {
            Some(dir) => Settings::new(dir.clone()),
            None => Settings::from_env(),
        }
    }
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch the latest upstream data into the local archive tree
    Update(UpdateArgs),
    /// Load the archive tree into the SQLite store
    Load(LoadArgs),
    /// Update and then load; the scheduled entry point
    Run(UpdateArgs),
}

/// Arguments for `update` and `run`
#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// First year to fetch (default: previous year)
    #[arg(long)]
    pub from_year: Option<i32>,

    /// Last year to fetch (default: current year)
    #[arg(long)]
    pub to_year: Option<i32>,

    /// Dataset kinds to fetch: wind, solar, price, or all
    #[arg(long, default_value = "all")]
    pub kind: KindSelection,
}

impl UpdateArgs {
    /// Execute the update run.
    ///
    /// # Errors
    /// Returns an error for archive failures or when no fetcher could be
    /// constructed; per-period fetch failures are logged and skipped.
    pub async fn execute(&self, settings: &Settings) -> Result<(), CliError> {
        if let (Some(from), Some(to)) = (self.from_year, self.to_year) {
            if from > to {
                return Err(CliError::InvalidArgument(format!(
                    "from-year {from} is after to-year {to}"
                )));
            }
        }
        let orchestrator = UpdateOrchestrator::new(settings.clone())?;
        orchestrator
            .update(self.from_year, self.to_year, self.kind)
            .await?;
        Ok(())
    }
}

/// Arguments for `load`
#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Dataset kinds to load: wind, solar, price, or all
    #[arg(long, default_value = "all")]
    pub kind: KindSelection,
}

impl LoadArgs {
    /// Execute the load run.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened; per-kind load
    /// failures are logged and skipped.
    pub async fn execute(&self, settings: &Settings) -> Result<(), CliError> {
        let store = Store::connect(&settings.db_file()).await?;
        let result = loader::load(&store, settings, self.kind, BATCH_SIZE).await;
        store.close().await;
        info!("store connection closed");
        result?;
        Ok(())
    }
}

/// Execute the parsed command.
///
/// # Errors
/// Propagates the first terminal failure of the selected command.
pub async fn execute(cli: &Cli) -> Result<(), CliError> {
    let settings = cli.settings();
    match &cli.command {
        Commands::Update(args) => args.execute(&settings).await,
        Commands::Load(args) => args.execute(&settings).await,
        Commands::Run(args) => {
            args.execute(&settings).await?;
            LoadArgs { kind: args.kind }.execute(&settings).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_kind_argument_parsing() {
        let cli = Cli::parse_from(["energy-data-downloader", "update", "--kind", "solar"]);
        match cli.command {
            Commands::Update(args) => assert_eq!(args.kind, KindSelection::Solar),
            _ => panic!("expected update command"),
        }
    }

    #[test]
    fn test_invalid_kind_is_rejected() {
        let result =
            Cli::try_parse_from(["energy-data-downloader", "update", "--kind", "belpex"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_run_defaults_to_all_kinds() {
        let cli = Cli::parse_from(["energy-data-downloader", "run"]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.kind, KindSelection::All);
                assert_eq!(args.from_year, None);
                assert_eq!(args.to_year, None);
            }
            _ => panic!("expected run command"),
        }
    }
}
