//! LoadFleet Core
//!
//! This crate provides the stateless building blocks of the LoadFleet controller: the
//! little-endian wire codec spoken with remote load-generation agents, the statistics types
//! those agents report together with their cross-fleet merge formulas, and the shared
//! identifier, time and configuration types used by the runtime.
//!
//! Nothing in here performs I/O. The stateful pieces (peer registry, reply tracking, the
//! dispatcher loop) live in `loadfleet-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod errors;
pub mod protocol;
pub mod stats;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::FleetConfig;
pub use errors::{ConfigError, FleetError, FleetResult, ProtocolError};
pub use protocol::{
    CommandLine, DiskUtil, Frame, FrameHeader, Opcode, Payload, ProbeReply, StartAck,
    StopReport, TextLine, ThreadStatus,
};
pub use stats::{DiskUtilAgg, DiskUtilStat, GroupRunStats, IoStat, JobsEta, ThreadStat};
pub use types::{
    ConnectionId, EtaRoundId, MonotonicTimeSource, PeerId, PeerState, RequestTag, TimeSource,
    Timestamp,
};
