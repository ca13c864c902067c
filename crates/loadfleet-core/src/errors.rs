//! Error types for the LoadFleet controller
//!
//! `FleetError` is the unified error returned by fleet operations. It separates the failure
//! classes the controller reacts to differently: transport failures and timeouts evict a single
//! peer, protocol errors drop a single frame, file errors evict a peer and propagate, and
//! configuration errors are reported before any connection is made.

use std::path::PathBuf;

use crate::protocol::Opcode;
use crate::types::RequestTag;

// ----------------------------------------------------------------------------
// Protocol Errors
// ----------------------------------------------------------------------------

/// Errors raised while decoding or correlating wire frames
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Frame header too short: expected {expected} bytes, got {actual}")]
    HeaderTooShort { expected: usize, actual: usize },

    #[error("Unsupported protocol version {version}")]
    UnsupportedVersion { version: u16 },

    #[error("Header checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    HeaderChecksum { expected: u32, actual: u32 },

    #[error("Payload checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    PayloadChecksum { expected: u32, actual: u32 },

    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Payload for {opcode:?} truncated: needed {needed} more bytes, {remaining} left")]
    Truncated {
        opcode: Opcode,
        needed: usize,
        remaining: usize,
    },

    #[error("Payload for {opcode:?} has {extra} trailing bytes")]
    TrailingBytes { opcode: Opcode, extra: usize },

    #[error("Argument {index} of {count} is malformed")]
    MalformedArgument { index: usize, count: usize },

    #[error("Opcode {opcode:?} carries no payload of the requested type")]
    UnexpectedOpcode { opcode: Opcode },

    #[error("Unknown opcode {raw}")]
    UnknownOpcode { raw: u16 },

    #[error("Unable to find matching tag {tag} for {opcode:?} reply")]
    UnmatchedTag { tag: RequestTag, opcode: Opcode },
}

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

/// Errors raised while validating configuration and address specifications
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid address specification '{spec}': {reason}")]
    InvalidAddress { spec: String, reason: String },

    #[error("Unable to resolve host '{host}'")]
    Unresolvable { host: String },

    #[error("Invalid local socket path '{path}': {reason}")]
    InvalidSocketPath { path: String, reason: String },

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

// ----------------------------------------------------------------------------
// Fleet Error
// ----------------------------------------------------------------------------

/// Main error type for fleet operations
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("Transport error for {peer}: {source}")]
    Transport {
        peer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Peer {peer} timed out waiting for {opcode:?}")]
    Timeout { peer: String, opcode: Opcode },

    #[error("Job file {path:?}: {source}")]
    JobFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Peer {peer} reported error {code}")]
    Remote { peer: String, code: i32 },

    #[error("Peer not found: {peer}")]
    PeerNotFound { peer: String },

    #[error("Peer {peer} is not connected")]
    NotConnected { peer: String },
}

impl FleetError {
    /// Create a transport error for the named peer
    pub fn transport(peer: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            peer: peer.into(),
            source,
        }
    }

    /// Create a peer-not-found error
    pub fn peer_not_found(peer: impl ToString) -> Self {
        Self::PeerNotFound {
            peer: peer.to_string(),
        }
    }

    /// Whether this error should cost the originating peer its membership in the fleet
    pub fn evicts_peer(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Timeout { .. }
                | Self::JobFile { .. }
                | Self::NotConnected { .. }
        )
    }
}

/// Result type alias for fleet operations
pub type FleetResult<T> = Result<T, FleetError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_classes() {
        let transport = FleetError::transport(
            "host1",
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"),
        );
        assert!(transport.evicts_peer());

        let protocol = FleetError::from(ProtocolError::UnknownOpcode { raw: 99 });
        assert!(!protocol.evicts_peer());

        let remote = FleetError::Remote {
            peer: "host1".into(),
            code: 5,
        };
        assert!(!remote.evicts_peer());
    }

    #[test]
    fn test_unmatched_tag_message() {
        let err = ProtocolError::UnmatchedTag {
            tag: RequestTag::new(42),
            opcode: Opcode::Eta,
        };
        assert!(err.to_string().contains("Unable to find matching tag"));
    }
}
