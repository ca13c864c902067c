//! Error handling for the LoadFleet CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Fleet error: {0}")]
    Fleet(#[from] loadfleet_core::FleetError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Invalid(#[from] loadfleet_core::ConfigError),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("No clients could be reached")]
    NoClients,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Config(err.to_string())
    }
}
