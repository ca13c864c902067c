//! LoadFleet CLI - controller entry point

use clap::{CommandFactory, FromArgMatches};
use tracing::{error, info};

use loadfleet_cli::{
    cli::{client_plan, Cli},
    commands::CommandDispatcher,
    config::AppConfig,
    error::Result,
    reporter::ConsoleReporter,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments, keeping positions to pair --arg with --client
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    // Load configuration before logging so the file can turn on verbose output
    let loaded = load_configuration(&cli);
    let verbose = cli.verbose || loaded.as_ref().map(|c| c.verbose).unwrap_or(false);
    setup_logging(verbose);

    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = config.apply_cli(&cli) {
        error!("Invalid option: {}", e);
        std::process::exit(1);
    }

    // Clients on the command line replace those in the file
    let plan = match client_plan(&matches) {
        Ok(plan) if plan.is_empty() => config.client_plan(),
        Ok(plan) => plan,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let handler = Box::new(ConsoleReporter::stdout());
    match CommandDispatcher::execute(cli.selected(), config, &plan, handler).await {
        Ok(outcome) if outcome.failed => {
            error!("One or more clients failed");
            std::process::exit(1);
        }
        Ok(_) => {
            info!("LoadFleet exited successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command execution failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<AppConfig> {
    match &cli.config {
        Some(config_path) => AppConfig::load_from_file(config_path),
        None => Ok(AppConfig::default()),
    }
}
