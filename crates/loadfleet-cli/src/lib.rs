//! LoadFleet CLI library
//!
//! Argument parsing, configuration loading, console reporting and the command handlers behind
//! the `loadfleet` binary.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod reporter;

pub use cli::{client_plan, Cli, Commands};
pub use commands::{build_fleet, CommandDispatcher};
pub use config::{AppConfig, ClientPlan};
pub use error::{CliError, Result};
pub use reporter::ConsoleReporter;
