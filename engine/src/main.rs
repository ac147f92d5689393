// Cadence plan orchestrator
// Main entry point for the cadence binary

use anyhow::Context;
use cadence_engine::cli::{Cli, Command};
use cadence_engine::config::Config;
use cadence_engine::handlers::{
    handle_catalog, handle_resume, handle_run, handle_validate, BudgetOverrides, OutputFormat,
};
use cadence_engine::telemetry::init_telemetry_with_level;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // --log wins over the config file, so telemetry can start right away
    if let Some(level) = &cli.log {
        init_telemetry_with_level(level);
    }

    tracing::debug!("Cadence v{}", env!("CARGO_PKG_VERSION"));

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        Config::load_or_create().context("Failed to load configuration")?
    };

    // Config-driven log level (only takes effect if RUST_LOG is not set)
    if cli.log.is_none() {
        init_telemetry_with_level(&config.core.log_level);
    }

    // Handle commands
    match cli.command {
        Command::Run {
            goal,
            context,
            max_tokens,
            max_time_secs,
            max_steps,
        } => {
            tracing::info!("Executing goal: {}", goal);
            let overrides = BudgetOverrides {
                max_tokens,
                max_time_secs,
                max_steps,
            };
            handle_run(goal, context, overrides, &config, format).await
        }

        Command::Validate { plan } => {
            tracing::info!("Validating plan file: {}", plan.display());
            if !handle_validate(&plan, &config, format).await? {
                std::process::exit(1);
            }
            Ok(())
        }

        Command::Resume { snapshot } => {
            tracing::info!("Resuming from snapshot: {}", snapshot.display());
            handle_resume(&snapshot, &config, format).await
        }

        Command::Catalog => handle_catalog(&config, format).await,
    }
}
