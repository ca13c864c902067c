//! LoadFleet CLI configuration
//!
//! Settings come from an optional TOML file and are then overridden by command-line flags.
//! The fleet's own tuning lives in the nested `[fleet]` table:
//!
//! ```toml
//! hosts = ["node-a", "node-b,8766", "sock:/run/agent.sock"]
//! args = ["--runtime=30"]
//! job_file = "randread.fio"
//!
//! [fleet]
//! eta_interval_ms = 500
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use loadfleet_core::FleetConfig;
use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Client Plan
// ----------------------------------------------------------------------------

/// One client to add, with the arguments named right after it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPlan {
    pub spec: String,
    pub args: Vec<String>,
}

impl ClientPlan {
    pub fn new(spec: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            args: Vec::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the controller binary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Agents to control, in address specification syntax
    pub hosts: Vec<String>,

    /// Arguments forwarded to the last host and those sharing its arguments
    pub args: Vec<String>,

    /// Job file sent to every agent
    pub job_file: Option<PathBuf>,

    /// Enable verbose logging output
    pub verbose: bool,

    pub fleet: FleetConfig,
}

impl AppConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.fleet.validate()?;
        if !self.args.is_empty() && self.hosts.is_empty() {
            return Err(CliError::Config(
                "args given without any host to forward them to".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply command-line flags on top of the file values
    pub fn apply_cli(&mut self, cli: &Cli) -> Result<()> {
        if let Some(ms) = cli.eta_interval_ms {
            self.fleet.eta_interval_ms = ms;
        }
        if cli.stay_connected {
            self.fleet.stay_connected = true;
        }
        if cli.verbose {
            self.verbose = true;
        }
        if cli.job.is_some() {
            self.job_file = cli.job.clone();
        }
        self.fleet.validate()?;
        Ok(())
    }

    /// Clients named in the file, the arguments attached to the last one
    pub fn client_plan(&self) -> Vec<ClientPlan> {
        let mut plan: Vec<ClientPlan> = self.hosts.iter().map(ClientPlan::new).collect();
        if let Some(last) = plan.last_mut() {
            last.args = self.args.clone();
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_load_from_file_with_nested_fleet_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
hosts = ["node-a", "node-b,8766"]
args = ["--runtime=30"]
job_file = "randread.fio"

[fleet]
eta_interval_ms = 500
stay_connected = true
"#
        )
        .unwrap();

        let config = AppConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.fleet.eta_interval_ms, 500);
        assert!(config.fleet.stay_connected);
        assert_eq!(config.fleet.poll_wait_ms, FleetConfig::default().poll_wait_ms);
        assert_eq!(config.job_file, Some(PathBuf::from("randread.fio")));

        let plan = config.client_plan();
        assert_eq!(plan[0], ClientPlan::new("node-a"));
        assert_eq!(plan[1].args, vec!["--runtime=30"]);
    }

    #[test]
    fn test_invalid_fleet_settings_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[fleet]\neta_interval_ms = 0\n").unwrap();
        assert!(AppConfig::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load_from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_flags_override_file_values() {
        let mut config = AppConfig {
            job_file: Some(PathBuf::from("file.fio")),
            ..Default::default()
        };
        let cli = Cli::parse_from([
            "loadfleet",
            "--job",
            "flag.fio",
            "--eta-interval-ms",
            "2000",
            "--verbose",
        ]);
        config.apply_cli(&cli).unwrap();

        assert_eq!(config.job_file, Some(PathBuf::from("flag.fio")));
        assert_eq!(config.fleet.eta_interval_ms, 2000);
        assert!(config.verbose);
        assert!(!config.fleet.stay_connected);
    }
}
