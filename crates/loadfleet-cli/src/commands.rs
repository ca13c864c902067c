//! Command handlers for the LoadFleet CLI

use std::io;
use std::path::Path;
use std::sync::Arc;

use loadfleet_runtime::{Fleet, FleetHandle, FleetHandler, NetConnector, RunOutcome};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cli::Commands;
use crate::config::{AppConfig, ClientPlan};
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(
        command: Commands,
        config: AppConfig,
        plan: &[ClientPlan],
        handler: Box<dyn FleetHandler>,
    ) -> Result<RunOutcome> {
        match command {
            Commands::Run => {
                let fleet = build_fleet(&config, plan, handler)?;
                Self::handle_run(fleet, config.job_file.as_deref()).await
            }
            Commands::Probe => {
                // peers must leave once they have answered
                let mut config = config;
                config.fleet.stay_connected = false;
                let fleet = build_fleet(&config, plan, handler)?;
                Self::handle_probe(fleet).await
            }
        }
    }

    /// Connect, ship the job, start it and service the fleet until every agent is done
    async fn handle_run(mut fleet: Fleet, job: Option<&Path>) -> Result<RunOutcome> {
        if fleet.connect_all().await {
            return Err(CliError::NoClients);
        }
        if let Some(path) = job {
            if fleet.send_job_file_all(path).await {
                return Err(CliError::NoClients);
            }
        }
        if fleet.registry().iter().any(|p| p.job_sent()) && fleet.start_all().await {
            return Err(CliError::NoClients);
        }

        Ok(Self::service(&mut fleet).await)
    }

    /// Connect and wait for every probe reply
    async fn handle_probe(mut fleet: Fleet) -> Result<RunOutcome> {
        if fleet.connect_all().await {
            return Err(CliError::NoClients);
        }
        Ok(Self::service(&mut fleet).await)
    }

    async fn service(fleet: &mut Fleet) -> RunOutcome {
        let watcher = spawn_signal_watcher(fleet.handle());
        let outcome = fleet.run().await;
        watcher.abort();

        let stats = fleet.statistics();
        info!(
            frames = stats.frames_received,
            dropped = stats.frames_dropped,
            timeouts = stats.timeouts,
            "fleet finished"
        );
        outcome
    }
}

/// Create the fleet and add every planned client in order
pub fn build_fleet(
    config: &AppConfig,
    plan: &[ClientPlan],
    handler: Box<dyn FleetHandler>,
) -> Result<Fleet> {
    if plan.is_empty() {
        return Err(CliError::Usage(
            "no clients given, use --client or a config file".to_string(),
        ));
    }

    let mut fleet = Fleet::new(config.fleet.clone(), Arc::new(NetConnector), handler)?;
    let mut previous = None;
    for client in plan {
        let id = fleet.add_client_to_group(&client.spec, previous)?;
        for token in &client.args {
            fleet.add_argument(id, token)?;
        }
        previous = Some(id);
    }
    Ok(fleet)
}

// ----------------------------------------------------------------------------
// Signals
// ----------------------------------------------------------------------------

/// First interrupt asks every agent to quit, a second one abandons the loop
fn spawn_signal_watcher(handle: FleetHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = wait_for_signal().await {
            warn!(error = %err, "signal handling unavailable");
            return;
        }
        info!("interrupted, terminating clients");
        if !handle.terminate() {
            return;
        }

        if wait_for_signal().await.is_ok() {
            warn!("interrupted again, leaving without waiting for clients");
            handle.stop();
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
