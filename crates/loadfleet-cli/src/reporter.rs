//! Console output for fleet events
//!
//! Agent text is relayed verbatim, each new line prefixed with the agent's name. Final
//! statistics, disk counters and progress are rendered in a compact plain-text layout.

use std::fmt;
use std::io::{self, Write};

use loadfleet_core::protocol::{DiskUtil, ProbeReply, StopReport, TextLine, ThreadStatus};
use loadfleet_core::stats::{GroupRunStats, JobsEta, ThreadStat, DATA_DIRECTIONS};
use loadfleet_runtime::{FleetHandler, Peer};
use tracing::{debug, error};

const DIRECTION_NAMES: [&str; DATA_DIRECTIONS] = ["read", "write"];

/// Writes every event to a terminal or any other sink
pub struct ConsoleReporter<W: Write + Send> {
    out: W,
}

impl ConsoleReporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, args: fmt::Arguments<'_>) {
        if let Err(err) = self.out.write_fmt(args).and_then(|()| self.out.flush()) {
            debug!(error = %err, "console write failed");
        }
    }

    fn thread_block(&mut self, owner: &str, ts: &ThreadStat) {
        self.emit(format_args!(
            "{}: {}: (groupid={}, jobs={}): err={:2}: pid={}\n",
            owner,
            ts.name,
            ts.groupid,
            ts.members.max(1),
            ts.error,
            ts.pid
        ));
        for (dir, name) in DIRECTION_NAMES.iter().enumerate() {
            if ts.io_bytes[dir] == 0 {
                continue;
            }
            let clat = &ts.clat_stat[dir];
            self.emit(format_args!(
                "  {:<5}: io={}KB, runt={}msec, clat (usec): min={}, max={}, avg={:.2}, stdev={:.2}\n",
                name,
                ts.io_bytes[dir] >> 10,
                ts.runtime[dir],
                clat.min_val,
                clat.max_val,
                clat.mean,
                clat.variance().sqrt()
            ));
        }
        if ts.total_err_count > 0 {
            self.emit(format_args!(
                "  errors: total={}, first_error={}\n",
                ts.total_err_count, ts.first_error
            ));
        }
    }

    fn group_block(&mut self, gs: &GroupRunStats) {
        self.emit(format_args!(
            "\nRun status group {} (all jobs):\n",
            gs.groupid
        ));
        for (dir, name) in DIRECTION_NAMES.iter().enumerate() {
            if gs.io_kb[dir] == 0 {
                continue;
            }
            self.emit(format_args!(
                "  {:>5}: io={}KB, aggrb={}KB/s, minb={}KB/s, maxb={}KB/s, mint={}msec, maxt={}msec\n",
                name.to_uppercase(),
                gs.io_kb[dir],
                gs.agg[dir],
                gs.min_bw[dir],
                gs.max_bw[dir],
                gs.min_run[dir],
                gs.max_run[dir]
            ));
        }
    }
}

/// Remaining time as `[h:]mm:ss`
pub fn format_eta(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h:{:02}m:{:02}s", h, m, s)
    } else {
        format!("{:02}m:{:02}s", m, s)
    }
}

impl<W: Write + Send> FleetHandler for ConsoleReporter<W> {
    fn on_text(&mut self, peer: &Peer, line: &TextLine) {
        if !peer.skip_newline() {
            self.emit(format_args!("<{}> ", peer.display_name()));
        }
        self.emit(format_args!("{}", line.text));
    }

    fn on_disk_util(&mut self, peer: &Peer, du: &DiskUtil) {
        if !peer.disk_header_printed() {
            self.emit(format_args!("\nDisk stats (read/write):\n"));
        }
        let s = &du.stat;
        self.emit(format_args!(
            "  {}: {}: ios={}/{}, merge={}/{}, ticks={}/{}, in_queue={}, util={:.2}%\n",
            peer.display_name(),
            s.name,
            s.ios[0],
            s.ios[1],
            s.merges[0],
            s.merges[1],
            s.ticks[0],
            s.ticks[1],
            s.time_in_queue,
            s.utilization()
        ));
    }

    fn on_thread_status(&mut self, peer: &Peer, status: &ThreadStatus) {
        self.thread_block(peer.display_name(), &status.ts);
    }

    fn on_group_stats(&mut self, _peer: &Peer, stats: &GroupRunStats) {
        self.group_block(stats);
    }

    fn on_eta(&mut self, _peer: &Peer, _eta: &JobsEta) {}

    fn on_eta_merged(&mut self, eta: &JobsEta) {
        self.emit(format_args!(
            "Jobs: {} (f={}): [{}/{} iops] [eta {}]\n",
            eta.nr_running,
            eta.files_open,
            eta.iops[0],
            eta.iops[1],
            format_eta(eta.eta_sec)
        ));
    }

    fn on_fleet_summary(&mut self, ts: &ThreadStat, gs: &GroupRunStats) {
        self.emit(format_args!("\n"));
        self.thread_block(&ts.name, ts);
        self.group_block(gs);
    }

    fn on_probe(&mut self, peer: &Peer, probe: &ProbeReply) {
        self.emit(format_args!(
            "<{}> hostname={}, be={}, {}-bit, os={}, arch={}, fio={}\n",
            peer.display_name(),
            probe.hostname,
            u8::from(probe.bigendian),
            probe.word_bits(),
            probe.os_name(),
            probe.arch_name(),
            probe.version()
        ));
    }

    fn on_stop(&mut self, peer: &Peer, report: &StopReport) {
        if report.error != 0 {
            error!(peer = peer.display_name(), error = report.error, "jobs failed");
            self.emit(format_args!(
                "<{}> jobs failed with error {}\n",
                peer.display_name(),
                report.error
            ));
        }
    }

    fn on_timeout(&mut self, peer: &Peer) {
        error!(peer = peer.display_name(), "client timed out");
        self.emit(format_args!("<{}> client timed out\n", peer.display_name()));
    }
}
