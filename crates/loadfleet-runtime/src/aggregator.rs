//! Fleet-wide aggregation
//!
//! `EtaRounds` owns the ETA collection rounds: each round counts the replies it still waits
//! for and folds arriving snapshots into one total. `FleetSummary` folds the terminal
//! statistics of every peer into the "All clients" report.

use hashbrown::HashMap;
use loadfleet_core::protocol::ThreadStatus;
use loadfleet_core::stats::{GroupRunStats, JobsEta, ThreadStat};
use loadfleet_core::EtaRoundId;

// ----------------------------------------------------------------------------
// ETA Rounds
// ----------------------------------------------------------------------------

/// One fleet-wide ETA collection in progress
#[derive(Debug, Clone, Default)]
pub struct EtaRound {
    pub merged: JobsEta,
    /// Replies still owed
    pub pending: usize,
}

#[derive(Debug, Default)]
pub struct EtaRounds {
    rounds: HashMap<EtaRoundId, EtaRound>,
    next_id: u64,
}

impl EtaRounds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new round with nothing owed yet
    pub fn begin(&mut self) -> EtaRoundId {
        self.next_id += 1;
        let id = EtaRoundId::new(self.next_id);
        self.rounds.insert(id, EtaRound::default());
        id
    }

    /// Count one more request sent for `round`
    pub fn expect_reply(&mut self, round: EtaRoundId) {
        if let Some(r) = self.rounds.get_mut(&round) {
            r.pending += 1;
        }
    }

    /// Drop `round` if no request was sent for it; returns whether it was discarded
    pub fn discard_if_empty(&mut self, round: EtaRoundId) -> bool {
        match self.rounds.get(&round) {
            Some(r) if r.pending == 0 => {
                self.rounds.remove(&round);
                true
            }
            _ => false,
        }
    }

    pub fn merge(&mut self, round: EtaRoundId, eta: &JobsEta) {
        if let Some(r) = self.rounds.get_mut(&round) {
            r.merged.merge(eta);
        }
    }

    /// Count down one owed reply; the merged total is returned when the round completes
    pub fn settle(&mut self, round: EtaRoundId) -> Option<JobsEta> {
        let r = self.rounds.get_mut(&round)?;
        r.pending = r.pending.saturating_sub(1);
        if r.pending > 0 {
            return None;
        }
        self.rounds.remove(&round).map(|r| r.merged)
    }

    pub fn get(&self, round: EtaRoundId) -> Option<&EtaRound> {
        self.rounds.get(&round)
    }

    pub fn open_rounds(&self) -> usize {
        self.rounds.len()
    }
}

// ----------------------------------------------------------------------------
// Fleet Summary
// ----------------------------------------------------------------------------

/// Accumulates terminal statistics across peers
#[derive(Debug)]
pub struct FleetSummary {
    ts: ThreadStat,
    gs: GroupRunStats,
    expected: usize,
    received: usize,
    enabled: bool,
    delivered: bool,
}

impl Default for FleetSummary {
    fn default() -> Self {
        Self {
            ts: ThreadStat::fleet_accumulator(),
            gs: GroupRunStats::fleet_accumulator(),
            expected: 0,
            received: 0,
            enabled: false,
            delivered: false,
        }
    }
}

impl FleetSummary {
    /// Reset for a run over `peers` peers; a single peer needs no summary
    pub fn begin(&mut self, peers: usize) {
        *self = Self {
            expected: peers,
            enabled: peers > 1,
            ..Self::default()
        };
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn received(&self) -> usize {
        self.received
    }

    /// Fold one terminal report into the totals
    pub fn record(&mut self, status: &ThreadStatus) {
        if !self.enabled || self.delivered {
            return;
        }
        self.ts.merge(&status.ts);
        self.gs.merge(&status.rs);
        self.ts.members += 1;
        self.ts.groupid = status.ts.groupid;
        self.gs.groupid = status.rs.groupid;
        self.received += 1;
    }

    /// A peer left before reporting; it will never be counted
    pub fn peer_lost(&mut self) {
        self.expected = self.expected.saturating_sub(1);
    }

    /// Hand out the totals once every expected peer has reported
    pub fn take_if_complete(&mut self) -> Option<(ThreadStat, GroupRunStats)> {
        if !self.enabled || self.delivered || self.received == 0 {
            return None;
        }
        if self.received < self.expected {
            return None;
        }
        self.delivered = true;
        Some((self.ts.clone(), self.gs))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
