//! Remote agent state as tracked by the controller

use loadfleet_core::protocol::{ProbeReply, PROGRAM_NAME};
use loadfleet_core::{ConnectionId, EtaRoundId, PeerId, PeerState};

use crate::address::PeerAddress;
use crate::tracker::PendingReplies;
use crate::transport::Connection;

/// One remote agent
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    address: PeerAddress,
    hostname: String,
    /// Name announced in the probe reply
    name: Option<String>,
    pub(crate) state: PeerState,
    pub(crate) refs: usize,
    pub(crate) args: Vec<String>,
    pub(crate) pending: PendingReplies,
    pub(crate) eta_in_flight: Option<EtaRoundId>,
    pub(crate) connection: Option<Connection>,
    pub(crate) job_sent: bool,
    pub(crate) disk_header_printed: bool,
    /// The last text chunk did not finish its line
    pub(crate) skip_newline: bool,
    pub(crate) error: i32,
    pub(crate) jobs: u32,
    pub(crate) probe: Option<ProbeReply>,
    pub(crate) stats_reported: bool,
    /// The registry reference has been dropped; the peer lives on only while borrowed
    pub(crate) evicted: bool,
}

impl Peer {
    pub(crate) fn new(id: PeerId, address: PeerAddress) -> Self {
        Self {
            id,
            hostname: address.host(),
            address,
            name: None,
            state: PeerState::Disconnected,
            refs: 1,
            args: vec![PROGRAM_NAME.to_string()],
            pending: PendingReplies::new(),
            eta_in_flight: None,
            connection: None,
            job_sent: false,
            disk_header_printed: false,
            skip_newline: false,
            error: 0,
            jobs: 0,
            probe: None,
            stats_reported: false,
            evicted: false,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// Hostname as it was given to the controller
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Probe-supplied name, falling back to the hostname
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.hostname)
    }

    pub(crate) fn adopt_name(&mut self, name: &str) {
        if self.name.is_none() && !name.is_empty() {
            self.name = Some(name.to_string());
        }
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn ref_count(&self) -> usize {
        self.refs
    }

    /// Arguments forwarded with JOBLINE, program name first
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Whether arguments beyond the implicit program name were added
    pub fn has_extra_args(&self) -> bool {
        self.args.len() > 1
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection.as_ref().map(Connection::id)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn pending(&self) -> &PendingReplies {
        &self.pending
    }

    pub fn eta_in_flight(&self) -> Option<EtaRoundId> {
        self.eta_in_flight
    }

    pub fn job_sent(&self) -> bool {
        self.job_sent
    }

    pub fn disk_header_printed(&self) -> bool {
        self.disk_header_printed
    }

    /// The previous text chunk ended mid-line, so the next one continues it
    pub fn skip_newline(&self) -> bool {
        self.skip_newline
    }

    /// Last error code reported in a STOP
    pub fn error(&self) -> i32 {
        self.error
    }

    /// Jobs announced in the start acknowledgement
    pub fn jobs(&self) -> u32 {
        self.jobs
    }

    pub fn probe(&self) -> Option<&ProbeReply> {
        self.probe.as_ref()
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted
    }

    /// Nothing sent, nothing owed: the peer has no reason to stay
    pub(crate) fn is_idle(&self) -> bool {
        !self.job_sent && self.pending.is_empty()
    }
}
