//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{ArgMatches, Parser, Subcommand};

use crate::config::ClientPlan;
use crate::error::{CliError, Result};

#[derive(Parser, Debug)]
#[command(name = "loadfleet", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Agent to control: host[,port], ip:host, ip4:host, ip6:host, [v6addr],port or sock:path
    #[arg(long = "client", value_name = "SPEC")]
    pub clients: Vec<String>,

    /// Job file sent to every agent
    #[arg(short, long, value_name = "PATH")]
    pub job: Option<PathBuf>,

    /// Argument forwarded to the most recently named client and the clients sharing its arguments
    #[arg(long = "arg", value_name = "TOKEN", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Interval between progress requests
    #[arg(long, value_name = "MS")]
    pub eta_interval_ms: Option<u64>,

    /// Keep agents connected after they have nothing left to do
    #[arg(long)]
    pub stay_connected: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the job on every client (the default)
    Run,
    /// Connect to every client, print what it reports about itself and exit
    Probe,
}

impl Cli {
    /// Subcommand to execute
    pub fn selected(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}

/// Pair every `--arg` with the `--client` that precedes it on the command line
pub fn client_plan(matches: &ArgMatches) -> Result<Vec<ClientPlan>> {
    let clients = indexed(matches, "clients");
    let args = indexed(matches, "args");

    let mut plan: Vec<(usize, ClientPlan)> = clients
        .into_iter()
        .map(|(index, spec)| (index, ClientPlan::new(spec)))
        .collect();

    for (index, token) in args {
        let owner = plan
            .iter_mut()
            .rev()
            .find(|(client_index, _)| *client_index < index)
            .ok_or_else(|| CliError::Usage(format!("--arg {} given before any --client", token)))?;
        owner.1.args.push(token);
    }

    Ok(plan.into_iter().map(|(_, client)| client).collect())
}

fn indexed(matches: &ArgMatches, id: &str) -> Vec<(usize, String)> {
    match (matches.indices_of(id), matches.get_many::<String>(id)) {
        (Some(indices), Some(values)) => indices.zip(values.cloned()).collect(),
        _ => Vec::new(),
    }
}
