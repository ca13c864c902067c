//! Core types shared across the LoadFleet crates
//!
//! Identifiers are plain counter newtypes. None of them is ever derived from a memory
//! address, so every value that crosses the wire is stable and opaque to the remote side.

use core::fmt;
use core::ops::{Add, Sub};
use std::time::Instant;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Peer Identifier
// ----------------------------------------------------------------------------

/// Arena key of a peer inside the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(u64);

impl PeerId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Connection Identifier
// ----------------------------------------------------------------------------

/// Handle of a live transport connection
///
/// Allocated fresh for every successful connect, so a frame that was in flight from an old
/// connection can never be attributed to a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Request Tag
// ----------------------------------------------------------------------------

/// Correlation tag carried in the frame header
///
/// Zero means "no tag". Tagged requests always receive a non-zero value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct RequestTag(u64);

impl RequestTag {
    /// The unset tag used on fire-and-forget commands
    pub const NONE: RequestTag = RequestTag(0);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn is_set(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for RequestTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ----------------------------------------------------------------------------
// ETA Round Identifier
// ----------------------------------------------------------------------------

/// Identifier of one fleet-wide ETA collection round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EtaRoundId(u64);

impl EtaRoundId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EtaRoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eta-round#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Peer State
// ----------------------------------------------------------------------------

/// Lifecycle state of a remote agent as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PeerState {
    #[default]
    Disconnected,
    Connected,
    /// Start acknowledgement received, jobs announced
    Started,
    /// Jobs are executing on the agent
    Running,
    Stopped,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerState::Disconnected => "disconnected",
            PeerState::Connected => "connected",
            PeerState::Started => "started",
            PeerState::Running => "running",
            PeerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp on the controller's monotonic clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(other))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    pub const fn new(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed between `self` and a later `now`
    pub fn elapsed_since(&self, now: Timestamp) -> u64 {
        now - *self
    }
}

// ----------------------------------------------------------------------------
// Time Source
// ----------------------------------------------------------------------------

/// Abstraction over the clock so timeout handling can be driven deterministically in tests
pub trait TimeSource {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Monotonic clock measured from the moment the source was created
#[derive(Debug, Clone, Copy)]
pub struct MonotonicTimeSource {
    origin: Instant,
}

impl MonotonicTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTimeSource {
    fn now(&self) -> Timestamp {
        let millis = self.origin.elapsed().as_millis();
        Timestamp(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_arithmetic_saturates() {
        let early = Timestamp::new(100);
        let late = Timestamp::new(250);
        assert_eq!(late - early, 150);
        assert_eq!(early - late, 0);
        assert_eq!(early.elapsed_since(late), 150);
        assert_eq!(Timestamp::new(u64::MAX) + 1, Timestamp::new(u64::MAX));
    }

    #[test]
    fn test_request_tag_unset() {
        assert!(!RequestTag::NONE.is_set());
        assert!(RequestTag::new(1).is_set());
        assert_eq!(RequestTag::default(), RequestTag::NONE);
    }

    #[test]
    fn test_monotonic_source_never_goes_backwards() {
        let clock = MonotonicTimeSource::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
