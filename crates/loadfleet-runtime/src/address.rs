//! Agent address specifications
//!
//! Accepted forms (the port defaults to the configured agent port):
//!
//! - `host` and `host,port`
//! - `ip:host[,port]` and `ip4:host[,port]` to force IPv4
//! - `ip6:host[,port]` to force IPv6
//! - `[v6-literal]` and `[v6-literal],port`
//! - `sock:path` for a local stream socket

use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use loadfleet_core::ConfigError;

/// Longest accepted local socket path, in bytes
pub const MAX_SOCKET_PATH_LEN: usize = 107;

/// Transport family requested for a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    Ipv4,
    Ipv6,
    Unix,
}

// ----------------------------------------------------------------------------
// Address Specification
// ----------------------------------------------------------------------------

/// Parsed but unresolved address specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpec {
    /// Requested family; `None` lets resolution pick one
    pub kind: Option<AddressKind>,
    /// Hostname as written, or the socket path
    pub host: String,
    pub port: u16,
}

fn invalid(spec: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidAddress {
        spec: spec.to_string(),
        reason: reason.into(),
    }
}

fn parse_port(spec: &str, raw: &str) -> Result<u16, ConfigError> {
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid(spec, format!("'{}' is not a valid port", raw))),
        Ok(port) => Ok(port),
    }
}

impl AddressSpec {
    pub fn parse(spec: &str, default_port: u16) -> Result<Self, ConfigError> {
        let spec = spec.trim();

        if let Some(path) = spec.strip_prefix("sock:") {
            validate_socket_path(path)?;
            return Ok(Self {
                kind: Some(AddressKind::Unix),
                host: path.to_string(),
                port: 0,
            });
        }

        let (mut kind, rest) = if let Some(rest) = spec.strip_prefix("ip6:") {
            (Some(AddressKind::Ipv6), rest)
        } else if let Some(rest) = spec.strip_prefix("ip4:") {
            (Some(AddressKind::Ipv4), rest)
        } else if let Some(rest) = spec.strip_prefix("ip:") {
            (Some(AddressKind::Ipv4), rest)
        } else {
            (None, spec)
        };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let close = bracketed
                .find(']')
                .ok_or_else(|| invalid(spec, "missing closing ']'"))?;
            let host = &bracketed[..close];
            let tail = &bracketed[close + 1..];
            let port = match tail.strip_prefix(',') {
                Some(raw) => parse_port(spec, raw)?,
                None if tail.is_empty() => default_port,
                None => return Err(invalid(spec, "unexpected text after ']'")),
            };
            if kind.is_none() {
                kind = Some(AddressKind::Ipv6);
            }
            (host, port)
        } else {
            match rest.split_once(',') {
                Some((host, raw)) => (host, parse_port(spec, raw)?),
                None => (rest, default_port),
            }
        };

        if host.is_empty() {
            return Err(invalid(spec, "empty hostname"));
        }

        Ok(Self {
            kind,
            host: host.to_string(),
            port,
        })
    }

    /// Turn the specification into a connectable address
    pub fn resolve(&self) -> Result<PeerAddress, ConfigError> {
        if self.kind == Some(AddressKind::Unix) {
            validate_socket_path(&self.host)?;
            return Ok(PeerAddress::Unix {
                path: PathBuf::from(&self.host),
            });
        }

        let wanted = |addr: &SocketAddr| match self.kind {
            Some(AddressKind::Ipv6) => addr.is_ipv6(),
            Some(AddressKind::Ipv4) => addr.is_ipv4(),
            _ => true,
        };

        let addr = match self.host.parse::<IpAddr>() {
            Ok(ip) => Some(SocketAddr::new(ip, self.port)).filter(|a| wanted(a)),
            Err(_) => {
                let candidates: Vec<SocketAddr> = (self.host.as_str(), self.port)
                    .to_socket_addrs()
                    .map_err(|_| ConfigError::Unresolvable {
                        host: self.host.clone(),
                    })?
                    .collect();
                // Without an explicit family IPv4 is preferred
                candidates
                    .iter()
                    .copied()
                    .find(|a| wanted(a) && (self.kind.is_some() || a.is_ipv4()))
                    .or_else(|| candidates.iter().copied().find(|a| wanted(a)))
            }
        };

        let addr = addr.ok_or_else(|| ConfigError::Unresolvable {
            host: self.host.clone(),
        })?;

        Ok(PeerAddress::Inet {
            host: self.host.clone(),
            addr,
        })
    }
}

fn validate_socket_path(path: &str) -> Result<(), ConfigError> {
    let reason = if path.is_empty() {
        "path is empty"
    } else if path.len() > MAX_SOCKET_PATH_LEN {
        "path is too long"
    } else {
        return Ok(());
    };
    Err(ConfigError::InvalidSocketPath {
        path: path.to_string(),
        reason: reason.to_string(),
    })
}

// ----------------------------------------------------------------------------
// Resolved Address
// ----------------------------------------------------------------------------

/// Resolved transport address of a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerAddress {
    Inet { host: String, addr: SocketAddr },
    Unix { path: PathBuf },
}

impl PeerAddress {
    pub fn kind(&self) -> AddressKind {
        match self {
            PeerAddress::Inet { addr, .. } if addr.is_ipv6() => AddressKind::Ipv6,
            PeerAddress::Inet { .. } => AddressKind::Ipv4,
            PeerAddress::Unix { .. } => AddressKind::Unix,
        }
    }

    pub fn is_ipv6(&self) -> bool {
        self.kind() == AddressKind::Ipv6
    }

    /// Hostname as written, or the socket path
    pub fn host(&self) -> String {
        match self {
            PeerAddress::Inet { host, .. } => host.clone(),
            PeerAddress::Unix { path } => path.display().to_string(),
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddress::Inet { addr, .. } => write!(f, "{}", addr),
            PeerAddress::Unix { path } => write!(f, "sock:{}", path.display()),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
