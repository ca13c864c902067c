//! Fleet Configuration
//!
//! Tunables of the controller loop. Every field has a default so a partial TOML table is
//! enough to override a single value.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::protocol::MAX_PAYLOAD_LEN;

/// Default TCP port of a load agent
pub const DEFAULT_PORT: u16 = 8765;

/// Default cadence of the ETA broadcast and the timeout sweep
pub const DEFAULT_ETA_INTERVAL_MS: u64 = 900;

/// A request is abandoned after this many ETA intervals without a reply
pub const REQUEST_TIMEOUT_FACTOR: u64 = 20;

// ----------------------------------------------------------------------------
// Fleet Configuration
// ----------------------------------------------------------------------------

/// Configuration of the fleet controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Interval between ETA broadcasts in milliseconds
    pub eta_interval_ms: u64,
    /// Request timeout in milliseconds; derived from the ETA interval when unset
    pub request_timeout_ms: Option<u64>,
    /// Upper bound on one wait for inbound frames
    pub poll_wait_ms: u64,
    /// Port used when an address specification names none
    pub default_port: u16,
    /// Keep peers connected after they have nothing left to do
    pub stay_connected: bool,
    /// Largest payload accepted from a peer
    pub max_payload_len: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            eta_interval_ms: DEFAULT_ETA_INTERVAL_MS,
            request_timeout_ms: None,
            poll_wait_ms: 100,
            default_port: DEFAULT_PORT,
            stay_connected: false,
            max_payload_len: MAX_PAYLOAD_LEN,
        }
    }
}

impl FleetConfig {
    /// Short intervals for tests driven by a mock clock
    pub fn testing() -> Self {
        Self {
            eta_interval_ms: 50,
            request_timeout_ms: Some(500),
            poll_wait_ms: 10,
            ..Self::default()
        }
    }

    /// Keeps peers connected, for sessions driven by an operator
    pub fn interactive() -> Self {
        Self {
            stay_connected: true,
            ..Self::default()
        }
    }

    pub fn eta_interval(&self) -> Duration {
        Duration::from_millis(self.eta_interval_ms)
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_millis(self.poll_wait_ms)
    }

    /// Effective request timeout in milliseconds
    pub fn request_timeout_ms(&self) -> u64 {
        self.request_timeout_ms
            .unwrap_or_else(|| self.eta_interval_ms.saturating_mul(REQUEST_TIMEOUT_FACTOR))
    }

    /// Reject values the dispatcher cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.eta_interval_ms == 0 {
            return Err(invalid("eta_interval_ms", "must be greater than zero"));
        }
        if self.poll_wait_ms == 0 {
            return Err(invalid("poll_wait_ms", "must be greater than zero"));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(invalid("request_timeout_ms", "must be greater than zero"));
        }
        if self.default_port == 0 {
            return Err(invalid("default_port", "must be a valid TCP port"));
        }
        if self.max_payload_len == 0 || self.max_payload_len > MAX_PAYLOAD_LEN {
            return Err(invalid(
                "max_payload_len",
                &format!("must be between 1 and {}", MAX_PAYLOAD_LEN),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeout_derives_from_interval() {
        let config = FleetConfig::default();
        assert_eq!(config.eta_interval_ms, 900);
        assert_eq!(config.request_timeout_ms(), 18_000);

        let explicit = FleetConfig {
            request_timeout_ms: Some(1234),
            ..FleetConfig::default()
        };
        assert_eq!(explicit.request_timeout_ms(), 1234);
    }

    #[test]
    fn test_presets_validate() {
        assert!(FleetConfig::default().validate().is_ok());
        assert!(FleetConfig::testing().validate().is_ok());
        assert!(FleetConfig::interactive().validate().is_ok());
        assert!(FleetConfig::interactive().stay_connected);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = FleetConfig {
            eta_interval_ms: 0,
            ..FleetConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "eta_interval_ms"
        ));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: FleetConfig = toml::from_str("eta_interval_ms = 250").unwrap();
        assert_eq!(config.eta_interval_ms, 250);
        assert_eq!(config.default_port, DEFAULT_PORT);
        assert_eq!(config.request_timeout_ms(), 5_000);
    }
}
