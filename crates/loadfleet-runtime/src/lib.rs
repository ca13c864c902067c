//! LoadFleet Runtime
//!
//! The stateful half of the controller. A `Fleet` owns the peer registry, tracks the replies
//! each agent still owes, aggregates progress and final statistics across agents, and runs
//! the dispatch loop that services every connection from a single task.
//!
//! Typical use:
//!
//! 1. add clients (`Fleet::add_client`, `Fleet::add_argument`)
//! 2. `connect_all`, `send_job_file_all`, `start_all`
//! 3. `run` until every agent has finished, steering it through a `FleetHandle`

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod address;
pub mod aggregator;
pub mod control;
pub mod dispatcher;
pub mod fleet;
pub mod handler;
pub mod peer;
pub mod registry;
pub mod tracker;
pub mod transport;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use address::{AddressKind, AddressSpec, PeerAddress, MAX_SOCKET_PATH_LEN};
pub use aggregator::{EtaRound, EtaRounds, FleetSummary};
pub use control::{ControlMessage, FleetHandle, RunOutcome};
pub use fleet::{Fleet, FleetStatistics, INBOUND_CHANNEL_CAPACITY};
pub use handler::{FleetHandler, LoggingHandler};
pub use peer::Peer;
pub use registry::PeerRegistry;
pub use tracker::{PendingReplies, PendingRequest, ReplyStatistics, RequestContext, TagAllocator};
pub use transport::{
    read_frame, write_frame, Connection, Connector, InboundEvent, InboundKind, NetConnector,
    Stream,
};

// Re-export core so callers need a single dependency
pub use loadfleet_core;
