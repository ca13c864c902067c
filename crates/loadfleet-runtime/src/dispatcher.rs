//! Dispatch loop
//!
//! One task runs the loop and is the only code that touches fleet state. Each iteration it
//! drops peers with nothing left to do, runs the periodic ETA broadcast and timeout sweep,
//! then waits a bounded time for inbound frames or control messages and routes whatever
//! arrived.

use loadfleet_core::protocol::{Frame, Opcode, Payload, ProbeReply};
use loadfleet_core::stats::JobsEta;
use loadfleet_core::{EtaRoundId, PeerId, PeerState, ProtocolError, TimeSource, Timestamp};
use tracing::{debug, error, info, trace, warn};

use crate::control::{ControlMessage, RunOutcome};
use crate::fleet::Fleet;
use crate::tracker::RequestContext;
use crate::transport::{InboundEvent, InboundKind};

impl<T: TimeSource> Fleet<T> {
    /// Service all peers until none are left or a stop is requested
    pub async fn run(&mut self) -> RunOutcome {
        self.summary.begin(self.live_peers());
        self.last_eta = self.time_source.now();
        let poll_wait = self.config.poll_wait();
        info!(peers = self.live_peers(), "dispatch loop started");

        loop {
            self.evict_idle_peers();
            if self.registry.is_empty() || self.stop_requested {
                break;
            }

            let now = self.time_source.now();
            if now - self.last_eta >= self.config.eta_interval_ms {
                self.last_eta = now;
                self.broadcast_eta().await;
                if self.sweep_timeouts(now) > 0 {
                    continue;
                }
            }

            tokio::select! {
                biased;
                Some(message) = self.control_rx.recv() => {
                    self.handle_control(message).await;
                }
                Some(event) = self.inbound_rx.recv() => {
                    self.handle_inbound(event);
                    while let Ok(event) = self.inbound_rx.try_recv() {
                        self.handle_inbound(event);
                    }
                }
                _ = tokio::time::sleep(poll_wait) => {}
            }
        }

        let outcome = RunOutcome {
            failed: self.failed,
            stopped: self.stop_requested,
        };
        info!(failed = outcome.failed, stopped = outcome.stopped, "dispatch loop finished");
        outcome
    }

    fn stay_connected(&self) -> bool {
        self.config.stay_connected || self.handler.stay_connected()
    }

    pub(crate) fn evict_idle_peers(&mut self) {
        if self.stay_connected() {
            return;
        }
        let idle: Vec<PeerId> = self
            .registry
            .iter()
            .filter(|p| p.is_idle())
            .map(|p| p.id())
            .collect();
        for id in idle {
            debug!(peer = %id, "nothing left to do");
            self.evict(id);
        }
    }

    async fn handle_control(&mut self, message: ControlMessage) {
        debug!(?message, "control message");
        match message {
            ControlMessage::Terminate => self.terminate_all().await,
            ControlMessage::Stop => self.stop_requested = true,
        }
    }

    // ------------------------------------------------------------------------
    // Periodic Work
    // ------------------------------------------------------------------------

    /// Ask every running peer without an outstanding ETA request for a progress snapshot
    pub(crate) async fn broadcast_eta(&mut self) {
        let round = self.eta_rounds.begin();

        for id in self.registry.ids() {
            let eligible = self.registry.get(id).is_some_and(|p| {
                !p.evicted && p.state == PeerState::Running && p.eta_in_flight.is_none()
            });
            if !eligible {
                continue;
            }

            match self
                .send_tracked(id, Opcode::SendEta, RequestContext::Eta(round))
                .await
            {
                Ok(_) => {
                    self.eta_rounds.expect_reply(round);
                    if let Some(p) = self.registry.get_mut(id) {
                        p.eta_in_flight = Some(round);
                    }
                }
                Err(err) => {
                    error!(peer = %id, error = %err, "ETA request failed");
                    self.failed = true;
                    self.evict(id);
                }
            }
        }

        // nobody asked means nothing to report, so no empty merged ETA is published
        if self.eta_rounds.discard_if_empty(round) {
            trace!(%round, "no ETA requests sent");
        } else {
            debug!(%round, "ETA round started");
        }
    }

    /// Evict expired requests; peers left with nothing pending are timed out.
    /// Returns how many peers were evicted.
    pub(crate) fn sweep_timeouts(&mut self, now: Timestamp) -> usize {
        let timeout = self.config.request_timeout_ms();
        let mut evicted = 0;

        for id in self.registry.ids() {
            let Some(peer) = self.registry.get_mut(id) else {
                continue;
            };
            if peer.evicted || peer.pending.is_empty() {
                continue;
            }
            let expired = peer.pending.expire(now, timeout);
            if expired.is_empty() {
                continue;
            }
            let drained = peer.pending.is_empty();
            let name = peer.display_name().to_string();

            self.stats.replies.expired += expired.len() as u64;
            for request in &expired {
                warn!(
                    peer = %name,
                    opcode = ?request.opcode,
                    tag = %request.tag,
                    age_ms = request.age(now),
                    "request timed out"
                );
                if let RequestContext::Eta(round) = request.context {
                    self.finish_eta_request(id, round);
                }
            }

            if drained {
                if let Some(peer) = self.registry.get(id) {
                    self.handler.on_timeout(peer);
                }
                self.stats.timeouts += 1;
                self.failed = true;
                self.evict(id);
                evicted += 1;
            }
        }

        evicted
    }

    // ------------------------------------------------------------------------
    // Inbound Routing
    // ------------------------------------------------------------------------

    pub(crate) fn handle_inbound(&mut self, event: InboundEvent) {
        let Some(id) = self.registry.acquire_by_connection(event.connection) else {
            self.stats.frames_dropped += 1;
            debug!(connection = %event.connection, "event from unknown connection dropped");
            return;
        };

        match event.kind {
            InboundKind::Frame(frame) => {
                self.stats.frames_received += 1;
                self.route_frame(id, frame);
            }
            InboundKind::Closed => {
                info!(peer = %self.name_of(id), "client disconnected");
                self.failed = true;
                self.evict(id);
            }
            InboundKind::Failed(err) => {
                error!(peer = %self.name_of(id), error = %err, "connection failed");
                self.failed = true;
                self.evict(id);
            }
        }

        if self.registry.get(id).is_some_and(|p| p.error != 0) {
            self.failed = true;
        }
        self.release(id);
    }

    fn name_of(&self, id: PeerId) -> String {
        self.registry
            .get(id)
            .map(|p| p.display_name().to_string())
            .unwrap_or_else(|| id.to_string())
    }

    fn route_frame(&mut self, id: PeerId, frame: Frame) {
        trace!(peer = %id, opcode = frame.opcode.name(), tag = %frame.tag, "routing");

        if matches!(frame.opcode, Opcode::Eta | Opcode::Probe) {
            self.route_reply(id, frame);
            return;
        }

        match Payload::decode(&frame) {
            Ok(payload) => self.route_payload(id, frame.opcode, payload),
            Err(ProtocolError::UnknownOpcode { raw }) => {
                self.stats.frames_dropped += 1;
                warn!(peer = %self.name_of(id), opcode = raw, "unknown client op");
            }
            Err(err) => {
                self.stats.frames_dropped += 1;
                warn!(peer = %self.name_of(id), opcode = frame.opcode.name(), error = %err, "undecodable payload");
            }
        }
    }

    /// Replies that must match a pending request before reaching a handler
    fn route_reply(&mut self, id: PeerId, frame: Frame) {
        let Some(peer) = self.registry.get_mut(id) else {
            return;
        };
        let Some(request) = peer.pending.take(frame.tag) else {
            self.stats.replies.unmatched += 1;
            self.stats.frames_dropped += 1;
            let err = ProtocolError::UnmatchedTag {
                tag: frame.tag,
                opcode: frame.opcode,
            };
            warn!(peer = %self.name_of(id), "{}", err);
            return;
        };
        self.stats.replies.matched += 1;

        match Payload::decode(&frame) {
            Ok(Payload::Probe(probe)) => self.handle_probe(id, probe),
            Ok(Payload::Eta(eta)) => self.handle_eta(id, request.context, &eta),
            Ok(_) => {}
            Err(err) => {
                self.stats.frames_dropped += 1;
                warn!(peer = %self.name_of(id), opcode = frame.opcode.name(), error = %err, "undecodable reply");
                if let RequestContext::Eta(round) = request.context {
                    self.finish_eta_request(id, round);
                }
            }
        }
    }

    fn route_payload(&mut self, id: PeerId, opcode: Opcode, payload: Payload) {
        match payload {
            Payload::Empty => match opcode {
                Opcode::Quit => {
                    if let Some(peer) = self.registry.get(id) {
                        self.handler.on_quit(peer);
                    }
                    self.evict(id);
                }
                Opcode::ServerStart => {
                    if let Some(peer) = self.registry.get_mut(id) {
                        peer.state = PeerState::Running;
                    }
                    if let Some(peer) = self.registry.get(id) {
                        self.handler.on_job_start(peer);
                    }
                }
                other => debug!(peer = %id, opcode = other.name(), "ignored command"),
            },
            Payload::Text(line) => {
                if let Some(peer) = self.registry.get(id) {
                    self.handler.on_text(peer, &line);
                }
                if let Some(peer) = self.registry.get_mut(id) {
                    peer.skip_newline = !line.ends_line();
                }
            }
            Payload::DiskUtil(du) => {
                if let Some(peer) = self.registry.get(id) {
                    self.handler.on_disk_util(peer, &du);
                }
                if let Some(peer) = self.registry.get_mut(id) {
                    peer.disk_header_printed = true;
                }
            }
            Payload::ThreadStatus(status) => {
                if let Some(peer) = self.registry.get(id) {
                    self.handler.on_thread_status(peer, &status);
                }
                if let Some(peer) = self.registry.get_mut(id) {
                    peer.stats_reported = true;
                }
                self.summary.record(&status);
                self.deliver_summary_if_complete();
            }
            Payload::GroupStats(gs) => {
                if let Some(peer) = self.registry.get(id) {
                    self.handler.on_group_stats(peer, &gs);
                }
            }
            Payload::Start(ack) => {
                if let Some(peer) = self.registry.get_mut(id) {
                    peer.jobs = ack.jobs;
                    peer.state = PeerState::Started;
                }
                if let Some(peer) = self.registry.get(id) {
                    self.handler.on_start(peer, &ack);
                }
            }
            Payload::Stop(report) => {
                if let Some(peer) = self.registry.get_mut(id) {
                    peer.state = PeerState::Stopped;
                    peer.error = report.error;
                }
                if report.error != 0 {
                    self.failed = true;
                }
                if let Some(peer) = self.registry.get(id) {
                    self.handler.on_stop(peer, &report);
                }
            }
            Payload::AddJob(job) => {
                if let Some(peer) = self.registry.get(id) {
                    self.handler.on_add_job(peer, &job);
                }
            }
            Payload::Job(_) | Payload::JobLine(_) => {
                debug!(peer = %id, opcode = opcode.name(), "controller-bound job command ignored");
            }
            Payload::Probe(_) | Payload::Eta(_) => {}
        }
    }

    fn handle_probe(&mut self, id: PeerId, probe: ProbeReply) {
        if let Some(peer) = self.registry.get_mut(id) {
            peer.adopt_name(&probe.hostname);
            peer.probe = Some(probe.clone());
        }
        if let Some(peer) = self.registry.get(id) {
            self.handler.on_probe(peer, &probe);
        }
    }

    fn handle_eta(&mut self, id: PeerId, context: RequestContext, eta: &JobsEta) {
        if let Some(peer) = self.registry.get(id) {
            self.handler.on_eta(peer, eta);
        }
        if let RequestContext::Eta(round) = context {
            self.eta_rounds.merge(round, eta);
            self.finish_eta_request(id, round);
        }
    }

    /// The ETA request of `id` for `round` is answered or abandoned
    fn finish_eta_request(&mut self, id: PeerId, round: EtaRoundId) {
        let owed = match self.registry.get_mut(id) {
            Some(peer) if peer.eta_in_flight == Some(round) => {
                peer.eta_in_flight = None;
                true
            }
            _ => false,
        };
        if owed {
            self.settle_eta(round);
        }
    }
}
