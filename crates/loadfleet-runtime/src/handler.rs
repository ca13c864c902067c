//! Reply handlers
//!
//! The fleet decodes every inbound frame and hands the result to a `FleetHandler`. Every
//! method has a default that logs through `tracing`, so an implementation only overrides
//! the events it presents to a user.

use loadfleet_core::protocol::{DiskUtil, ProbeReply, StartAck, StopReport, TextLine, ThreadStatus};
use loadfleet_core::stats::{GroupRunStats, JobsEta, ThreadStat};
use tracing::{debug, error, info, warn};

use crate::peer::Peer;

/// Callbacks invoked by the dispatcher for decoded replies
///
/// Peer flags such as `skip_newline` and `disk_header_printed` reflect the state before the
/// current event; the fleet updates them after the callback returns.
pub trait FleetHandler: Send {
    fn on_text(&mut self, peer: &Peer, line: &TextLine) {
        info!(peer = peer.display_name(), level = line.level, "{}", line.text.trim_end());
    }

    fn on_disk_util(&mut self, peer: &Peer, du: &DiskUtil) {
        debug!(
            peer = peer.display_name(),
            device = %du.stat.name,
            util = du.stat.utilization(),
            "disk utilization"
        );
    }

    fn on_thread_status(&mut self, peer: &Peer, status: &ThreadStatus) {
        info!(
            peer = peer.display_name(),
            job = %status.ts.name,
            groupid = status.ts.groupid,
            error = status.ts.error,
            "job finished"
        );
    }

    fn on_group_stats(&mut self, peer: &Peer, stats: &GroupRunStats) {
        debug!(peer = peer.display_name(), groupid = stats.groupid, "group statistics");
    }

    fn on_eta(&mut self, peer: &Peer, eta: &JobsEta) {
        debug!(
            peer = peer.display_name(),
            running = eta.nr_running,
            eta_sec = eta.eta_sec,
            "progress"
        );
    }

    /// Fleet-wide progress, once per completed ETA round
    fn on_eta_merged(&mut self, eta: &JobsEta) {
        info!(
            running = eta.nr_running,
            pending = eta.nr_pending,
            eta_sec = eta.eta_sec,
            "fleet progress"
        );
    }

    /// Merged terminal statistics of every peer, delivered once
    fn on_fleet_summary(&mut self, ts: &ThreadStat, gs: &GroupRunStats) {
        info!(
            name = %ts.name,
            members = ts.members,
            read_bytes = ts.io_bytes[0],
            write_bytes = ts.io_bytes[1],
            kb_base = gs.kb_base,
            "fleet summary"
        );
    }

    fn on_probe(&mut self, peer: &Peer, probe: &ProbeReply) {
        info!(
            peer = peer.display_name(),
            hostname = %probe.hostname,
            big_endian = probe.bigendian,
            bits = probe.word_bits(),
            os = probe.os_name(),
            arch = probe.arch_name(),
            version = %probe.version(),
            "probe"
        );
    }

    fn on_start(&mut self, peer: &Peer, ack: &StartAck) {
        debug!(peer = peer.display_name(), jobs = ack.jobs, "start acknowledged");
    }

    fn on_job_start(&mut self, peer: &Peer) {
        debug!(peer = peer.display_name(), "jobs running");
    }

    fn on_stop(&mut self, peer: &Peer, report: &StopReport) {
        if report.error != 0 {
            warn!(peer = peer.display_name(), error = report.error, "stopped with error");
        } else {
            debug!(peer = peer.display_name(), "stopped");
        }
    }

    fn on_quit(&mut self, peer: &Peer) {
        debug!(peer = peer.display_name(), "quit");
    }

    fn on_add_job(&mut self, peer: &Peer, job: &[u8]) {
        debug!(peer = peer.display_name(), len = job.len(), "job added");
    }

    fn on_timeout(&mut self, peer: &Peer) {
        error!(peer = peer.display_name(), "client timed out");
    }

    /// Keep peers connected after they have nothing left to do
    fn stay_connected(&self) -> bool {
        false
    }
}

/// Handler that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

impl FleetHandler for LoggingHandler {}
