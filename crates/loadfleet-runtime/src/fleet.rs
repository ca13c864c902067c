//! The fleet object and its connection management
//!
//! `Fleet` owns everything the controller knows: the peer registry, the reply tracker state
//! on each peer, ETA rounds, the summary accumulator, the handler table and the channels
//! that feed the dispatch loop. This module covers setting peers up and sending commands to
//! them; the loop itself lives in `dispatcher`.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use loadfleet_core::protocol::{CommandLine, Frame, Opcode};
use loadfleet_core::{
    ConfigError, ConnectionId, EtaRoundId, FleetConfig, FleetError, FleetResult,
    MonotonicTimeSource, PeerId, PeerState, RequestTag, TimeSource, Timestamp,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::address::AddressKind;
use crate::aggregator::{EtaRounds, FleetSummary};
use crate::control::{ControlMessage, FleetHandle};
use crate::handler::FleetHandler;
use crate::peer::Peer;
use crate::registry::PeerRegistry;
use crate::tracker::{ReplyStatistics, RequestContext, TagAllocator};
use crate::transport::{Connection, Connector, InboundEvent};

/// Capacity of the channel between reader tasks and the dispatch loop
pub const INBOUND_CHANNEL_CAPACITY: usize = 1024;

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Counters describing a fleet's activity
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FleetStatistics {
    pub frames_received: u64,
    /// Frames dropped for an unknown opcode, an unknown connection or a bad payload
    pub frames_dropped: u64,
    pub evictions: u64,
    pub timeouts: u64,
    pub replies: ReplyStatistics,
}

// ----------------------------------------------------------------------------
// Fleet
// ----------------------------------------------------------------------------

/// Controller for a set of remote agents
pub struct Fleet<T: TimeSource = MonotonicTimeSource> {
    pub(crate) config: FleetConfig,
    pub(crate) registry: PeerRegistry,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) handler: Box<dyn FleetHandler>,
    pub(crate) time_source: T,
    pub(crate) inbound_tx: mpsc::Sender<InboundEvent>,
    pub(crate) inbound_rx: mpsc::Receiver<InboundEvent>,
    pub(crate) control_tx: mpsc::UnboundedSender<ControlMessage>,
    pub(crate) control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    pub(crate) eta_rounds: EtaRounds,
    pub(crate) summary: FleetSummary,
    pub(crate) tags: TagAllocator,
    pub(crate) next_connection: u64,
    pub(crate) last_eta: Timestamp,
    pub(crate) failed: bool,
    pub(crate) stop_requested: bool,
    pub(crate) stats: FleetStatistics,
}

impl Fleet<MonotonicTimeSource> {
    /// Create a fleet on the monotonic clock
    pub fn new(
        config: FleetConfig,
        connector: Arc<dyn Connector>,
        handler: Box<dyn FleetHandler>,
    ) -> FleetResult<Self> {
        Self::with_time_source(config, connector, handler, MonotonicTimeSource::new())
    }
}

impl<T: TimeSource> Fleet<T> {
    /// Create a fleet driven by the given clock
    pub fn with_time_source(
        config: FleetConfig,
        connector: Arc<dyn Connector>,
        handler: Box<dyn FleetHandler>,
        time_source: T,
    ) -> FleetResult<Self> {
        config.validate()?;
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let last_eta = time_source.now();

        Ok(Self {
            registry: PeerRegistry::new(config.default_port),
            config,
            connector,
            handler,
            time_source,
            inbound_tx,
            inbound_rx,
            control_tx,
            control_rx,
            eta_rounds: EtaRounds::new(),
            summary: FleetSummary::default(),
            tags: TagAllocator::new(),
            next_connection: 1,
            last_eta,
            failed: false,
            stop_requested: false,
            stats: FleetStatistics::default(),
        })
    }

    /// Handle for steering the fleet from other tasks
    pub fn handle(&self) -> FleetHandle {
        FleetHandle::new(self.control_tx.clone())
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn statistics(&self) -> FleetStatistics {
        self.stats
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn peer(&self, peer: PeerId) -> Option<&Peer> {
        self.registry.get(peer)
    }

    /// Number of peers that have not been evicted
    pub fn live_peers(&self) -> usize {
        self.registry.live_count()
    }

    pub fn eta_rounds(&self) -> &EtaRounds {
        &self.eta_rounds
    }

    pub fn summary(&self) -> &FleetSummary {
        &self.summary
    }

    // ------------------------------------------------------------------------
    // Peer Setup
    // ------------------------------------------------------------------------

    pub fn add_client(&mut self, spec: &str) -> Result<PeerId, ConfigError> {
        self.registry.add(spec)
    }

    /// Add a client, letting `previous` share its arguments when it has none of its own
    pub fn add_client_to_group(
        &mut self,
        spec: &str,
        previous: Option<PeerId>,
    ) -> Result<PeerId, ConfigError> {
        self.registry.add_to_group(spec, previous)
    }

    pub fn add_client_explicit(
        &mut self,
        host: &str,
        kind: AddressKind,
        port: u16,
    ) -> Result<PeerId, ConfigError> {
        self.registry.add_explicit(host, kind, port)
    }

    pub fn add_argument(&mut self, peer: PeerId, token: &str) -> FleetResult<()> {
        self.registry.add_argument(peer, token)
    }

    // ------------------------------------------------------------------------
    // Connection Management
    // ------------------------------------------------------------------------

    /// Open the transport to `peer` and send the capability probe
    pub async fn connect(&mut self, peer: PeerId) -> FleetResult<()> {
        let (address, name) = {
            let p = self
                .registry
                .get(peer)
                .ok_or_else(|| FleetError::peer_not_found(peer))?;
            (p.address().clone(), p.display_name().to_string())
        };

        debug!(peer = %name, %address, "connecting");
        let connector = Arc::clone(&self.connector);
        let stream = connector
            .connect(&address)
            .await
            .map_err(|err| FleetError::transport(&name, err))?;

        let id = ConnectionId::new(self.next_connection);
        self.next_connection += 1;
        let connection = Connection::spawn(
            id,
            stream,
            self.config.max_payload_len,
            self.inbound_tx.clone(),
        );
        self.registry.attach_connection(peer, connection)?;
        if let Some(p) = self.registry.get_mut(peer) {
            p.state = PeerState::Connected;
        }
        info!(peer = %name, %address, connection = %id, "connected");

        self.send_tracked(peer, Opcode::Probe, RequestContext::None)
            .await?;
        Ok(())
    }

    /// Connect every peer; failed peers are evicted. Returns whether the fleet is now empty
    pub async fn connect_all(&mut self) -> bool {
        for id in self.registry.ids() {
            if let Err(err) = self.connect(id).await {
                error!(peer = %id, error = %err, "connect failed");
                self.evict(id);
                continue;
            }

            let has_args = self
                .registry
                .get(id)
                .map(Peer::has_extra_args)
                .unwrap_or(false);
            if has_args {
                if let Err(err) = self.send_command_line(id).await {
                    error!(peer = %id, error = %err, "sending command line failed");
                    self.evict(id);
                }
            }
        }
        self.live_peers() == 0
    }

    /// Forward the peer's argument vector as a JOBLINE command
    pub async fn send_command_line(&mut self, peer: PeerId) -> FleetResult<()> {
        let args = self
            .registry
            .get(peer)
            .ok_or_else(|| FleetError::peer_not_found(peer))?
            .args()
            .to_vec();
        debug!(peer = %peer, argc = args.len(), "sending command line");

        let frame = Frame::with_payload(Opcode::JobLine, RequestTag::NONE, &CommandLine::new(args));
        self.send_frame(peer, &frame).await?;
        if let Some(p) = self.registry.get_mut(peer) {
            p.job_sent = true;
        }
        Ok(())
    }

    /// Read a job file and send it as one JOB payload; the peer is evicted on failure
    pub async fn send_job_file(&mut self, peer: PeerId, path: &Path) -> FleetResult<()> {
        if self.registry.get(peer).is_none() {
            return Err(FleetError::peer_not_found(peer));
        }

        let contents = match tokio::fs::read(path).await {
            Ok(contents) => contents,
            Err(source) => {
                error!(peer = %peer, path = %path.display(), error = %source, "job file unreadable");
                self.evict(peer);
                return Err(FleetError::JobFile {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        debug!(peer = %peer, path = %path.display(), len = contents.len(), "sending job file");
        let frame = Frame::new(Opcode::Job, RequestTag::NONE, Bytes::from(contents));
        if let Err(err) = self.send_frame(peer, &frame).await {
            error!(peer = %peer, error = %err, "sending job file failed");
            self.evict(peer);
            return Err(err);
        }

        if let Some(p) = self.registry.get_mut(peer) {
            p.job_sent = true;
        }
        Ok(())
    }

    /// Send the job file to every peer; returns whether the fleet is now empty
    pub async fn send_job_file_all(&mut self, path: &Path) -> bool {
        for id in self.registry.ids() {
            if let Err(err) = self.send_job_file(id, path).await {
                debug!(peer = %id, error = %err, "peer dropped while sending job file");
            }
        }
        self.live_peers() == 0
    }

    /// Tell `peer` to run its jobs; the peer is evicted if the command cannot be sent
    pub async fn start(&mut self, peer: PeerId) -> FleetResult<()> {
        if let Err(err) = self.send_frame(peer, &Frame::command(Opcode::Run)).await {
            error!(peer = %peer, error = %err, "start failed");
            self.evict(peer);
            return Err(err);
        }
        Ok(())
    }

    /// Start every peer; returns whether the fleet is now empty
    pub async fn start_all(&mut self) -> bool {
        for id in self.registry.ids() {
            if let Err(err) = self.start(id).await {
                debug!(peer = %id, error = %err, "peer dropped while starting");
            }
        }
        self.live_peers() == 0
    }

    /// Ask `peer` to quit; failures are ignored
    pub async fn terminate(&mut self, peer: PeerId) {
        if let Err(err) = self.send_frame(peer, &Frame::command(Opcode::Quit)).await {
            debug!(peer = %peer, error = %err, "quit not delivered");
        }
    }

    pub async fn terminate_all(&mut self) {
        info!(peers = self.live_peers(), "terminating clients");
        for id in self.registry.ids() {
            self.terminate(id).await;
        }
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    pub(crate) async fn send_frame(&mut self, peer: PeerId, frame: &Frame) -> FleetResult<()> {
        let p = self
            .registry
            .get_mut(peer)
            .ok_or_else(|| FleetError::peer_not_found(peer))?;
        let name = p.display_name().to_string();
        let connection = p
            .connection
            .as_mut()
            .ok_or_else(|| FleetError::NotConnected { peer: name.clone() })?;
        connection
            .send(frame)
            .await
            .map_err(|err| FleetError::transport(name, err))
    }

    /// Send a request that expects a reply and record it on the peer
    pub(crate) async fn send_tracked(
        &mut self,
        peer: PeerId,
        opcode: Opcode,
        context: RequestContext,
    ) -> FleetResult<RequestTag> {
        let tag = self.tags.allocate();
        let now = self.time_source.now();
        self.send_frame(peer, &Frame::new(opcode, tag, Bytes::new()))
            .await?;

        let p = self
            .registry
            .get_mut(peer)
            .ok_or_else(|| FleetError::peer_not_found(peer))?;
        p.pending.track(opcode, tag, context, now);
        self.stats.replies.tracked += 1;
        debug!(peer = %peer, ?opcode, %tag, "request sent");
        Ok(tag)
    }

    // ------------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------------

    /// Drop the registry's reference to `peer` and close its connection
    ///
    /// Idempotent. The peer is freed once any reference held by the dispatcher is released.
    pub fn evict(&mut self, peer: PeerId) {
        let Some(p) = self.registry.get_mut(peer) else {
            return;
        };
        if p.evicted {
            return;
        }
        p.evicted = true;
        debug!(peer = %peer, host = p.hostname(), "evicting");

        drop(self.registry.detach_connection(peer));
        self.stats.evictions += 1;
        self.release(peer);
    }

    /// Drop one reference, settling the peer's obligations if it was the last
    pub(crate) fn release(&mut self, peer: PeerId) {
        if let Some(removed) = self.registry.release(peer) {
            self.settle_removed(removed);
        }
    }

    fn settle_removed(&mut self, mut peer: Peer) {
        let abandoned = peer.pending.clear();
        if !abandoned.is_empty() {
            debug!(peer = peer.display_name(), count = abandoned.len(), "pending requests cancelled");
        }
        if let Some(round) = peer.eta_in_flight.take() {
            self.settle_eta(round);
        }
        if !peer.stats_reported {
            self.summary.peer_lost();
            self.deliver_summary_if_complete();
        }
        info!(peer = peer.display_name(), "client removed");
    }

    // ------------------------------------------------------------------------
    // Aggregation
    // ------------------------------------------------------------------------

    /// Count down one owed ETA reply and publish the round if it completed
    pub(crate) fn settle_eta(&mut self, round: EtaRoundId) {
        if let Some(total) = self.eta_rounds.settle(round) {
            self.handler.on_eta_merged(&total);
        }
    }

    pub(crate) fn deliver_summary_if_complete(&mut self) {
        if let Some((ts, gs)) = self.summary.take_if_complete() {
            self.handler.on_fleet_summary(&ts, &gs);
        }
    }
}
