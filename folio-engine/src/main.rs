//! Folio - command line front end of the rebalancing engine.
//!
//! Reads a JSON snapshot, prints JSON on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use folio_common::config::{expand_path, Config};
use folio_common::logging::init_logging_with_exclusions;
use folio_engine::{PortfolioSnapshot, RebalanceEngine};

/// Two-layer portfolio rebalancing.
#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(version)]
#[command(about = "Two-layer portfolio rebalancing engine", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.folio/config.json)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute a rebalance plan
    Plan {
        /// Portfolio snapshot (JSON)
        #[arg(long)]
        snapshot: String,

        /// New capital to split between reserve and investments
        #[arg(long)]
        capital: Option<f64>,
    },

    /// Sample the efficient frontier of the held asset classes
    Frontier {
        /// Portfolio snapshot (JSON)
        #[arg(long)]
        snapshot: String,

        /// Number of frontier points
        #[arg(long, default_value = "20")]
        points: usize,
    },

    /// Show the emergency reserve status
    Reserve {
        /// Portfolio snapshot (JSON)
        #[arg(long)]
        snapshot: String,
    },

    /// Validate and print the effective configuration
    CheckConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.as_deref().map(expand_path);
    let config = match cli.command {
        Commands::Reserve { .. } => Config::load_for_reserve(config_path.as_deref())?,
        _ => Config::load_and_validate(config_path.as_deref())?,
    };

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );
    tracing::debug!("Folio v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Plan { snapshot, capital } => {
            let snapshot = read_snapshot(&snapshot)?;
            let engine = RebalanceEngine::new(&config)?;
            let started = std::time::Instant::now();
            let plan = engine.run(&snapshot, capital)?;
            tracing::info!(
                duration_ms = started.elapsed().as_millis() as u64,
                actions = plan.actions.len(),
                orders = plan.orders.len(),
                degraded = plan.is_degraded(),
                "Plan computed"
            );
            print_json(&plan)
        }
        Commands::Frontier { snapshot, points } => {
            let snapshot = read_snapshot(&snapshot)?;
            let engine = RebalanceEngine::new(&config)?;
            print_json(&engine.frontier(&snapshot, points)?)
        }
        Commands::Reserve { snapshot } => {
            let snapshot = read_snapshot(&snapshot)?;
            print_json(&snapshot.reserve_status(&config.reserve)?)
        }
        Commands::CheckConfig => {
            RebalanceEngine::new(&config)?;
            print_json(&config)
        }
    }
}

fn read_snapshot(raw: &str) -> Result<PortfolioSnapshot> {
    let path: PathBuf = expand_path(raw);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read snapshot from {}", path.display()))?;
    PortfolioSnapshot::from_json(&content)
        .with_context(|| format!("Failed to parse snapshot from {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
