//! Pending-reply tracking
//!
//! Each peer keeps a FIFO of the requests it still owes a reply to. Replies are matched by
//! the wire tag, which is a fleet-unique counter; the typed context recorded with the request
//! tells the dispatcher what the reply belongs to. The tracker is pure: the caller supplies
//! the current time, so timeout behaviour is driven entirely by the fleet's `TimeSource`.

use std::collections::VecDeque;

use loadfleet_core::{EtaRoundId, Opcode, RequestTag, Timestamp};
use smallvec::SmallVec;

// ----------------------------------------------------------------------------
// Pending Request
// ----------------------------------------------------------------------------

/// What an outstanding request is waiting for on the controller side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestContext {
    /// Plain request, such as the connect-time probe
    None,
    /// ETA request contributing to a fleet-wide round
    Eta(EtaRoundId),
}

/// One request awaiting its reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub opcode: Opcode,
    pub tag: RequestTag,
    pub context: RequestContext,
    pub sent_at: Timestamp,
}

impl PendingRequest {
    pub fn age(&self, now: Timestamp) -> u64 {
        self.sent_at.elapsed_since(now)
    }

    pub fn is_expired(&self, now: Timestamp, timeout_ms: u64) -> bool {
        self.age(now) >= timeout_ms
    }
}

// ----------------------------------------------------------------------------
// Pending Replies
// ----------------------------------------------------------------------------

/// Ordered list of one peer's in-flight requests
#[derive(Debug, Default)]
pub struct PendingReplies {
    entries: VecDeque<PendingRequest>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request that was just sent
    pub fn track(
        &mut self,
        opcode: Opcode,
        tag: RequestTag,
        context: RequestContext,
        now: Timestamp,
    ) {
        self.entries.push_back(PendingRequest {
            opcode,
            tag,
            context,
            sent_at: now,
        });
    }

    /// Remove and return the oldest request carrying `tag`
    pub fn take(&mut self, tag: RequestTag) -> Option<PendingRequest> {
        let index = self.entries.iter().position(|entry| entry.tag == tag)?;
        self.entries.remove(index)
    }

    /// Remove every request at least `timeout_ms` old
    pub fn expire(&mut self, now: Timestamp, timeout_ms: u64) -> SmallVec<[PendingRequest; 2]> {
        let mut expired = SmallVec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.is_expired(now, timeout_ms) {
                expired.push(entry);
            } else {
                kept.push_back(entry);
            }
        }
        self.entries = kept;
        expired
    }

    /// Drop every request, returning them for settlement
    pub fn clear(&mut self) -> Vec<PendingRequest> {
        self.entries.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingRequest> {
        self.entries.iter()
    }
}

// ----------------------------------------------------------------------------
// Tag Allocation
// ----------------------------------------------------------------------------

/// Source of fleet-unique, never-zero wire tags
#[derive(Debug)]
pub struct TagAllocator {
    next: u64,
}

impl Default for TagAllocator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl TagAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> RequestTag {
        let tag = RequestTag::new(self.next);
        self.next = self.next.wrapping_add(1).max(1);
        tag
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Counters of reply correlation outcomes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplyStatistics {
    /// Requests sent expecting a reply
    pub tracked: u64,
    /// Replies matched to a pending request
    pub matched: u64,
    /// Replies whose tag matched nothing
    pub unmatched: u64,
    /// Requests abandoned after the timeout
    pub expired: u64,
}

impl ReplyStatistics {
    /// Requests still waiting for a reply
    pub fn outstanding(&self) -> u64 {
        self.tracked
            .saturating_sub(self.matched)
            .saturating_sub(self.expired)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: u64) -> Timestamp {
        Timestamp::new(ms)
    }

    #[test]
    fn test_take_matches_exact_tag_fifo() {
        let mut pending = PendingReplies::new();
        pending.track(Opcode::Probe, RequestTag::new(1), RequestContext::None, ts(0));
        pending.track(
            Opcode::SendEta,
            RequestTag::new(2),
            RequestContext::Eta(EtaRoundId::new(7)),
            ts(5),
        );

        let eta = pending.take(RequestTag::new(2)).unwrap();
        assert_eq!(eta.context, RequestContext::Eta(EtaRoundId::new(7)));
        assert_eq!(pending.len(), 1);

        assert!(pending.take(RequestTag::new(2)).is_none());
        assert!(pending.take(RequestTag::new(99)).is_none());
        assert_eq!(pending.take(RequestTag::new(1)).unwrap().opcode, Opcode::Probe);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_expire_keeps_young_requests() {
        let mut pending = PendingReplies::new();
        pending.track(Opcode::Probe, RequestTag::new(1), RequestContext::None, ts(0));
        pending.track(Opcode::SendEta, RequestTag::new(2), RequestContext::None, ts(900));

        assert!(pending.expire(ts(999), 1000).is_empty());

        let expired = pending.expire(ts(1000), 1000);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].tag, RequestTag::new(1));
        assert_eq!(pending.len(), 1);

        let expired = pending.expire(ts(5000), 1000);
        assert_eq!(expired.len(), 1);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_tags_are_unique_and_never_zero() {
        let mut tags = TagAllocator::new();
        let a = tags.allocate();
        let b = tags.allocate();
        assert!(a.is_set());
        assert_ne!(a, b);

        let mut wrapped = TagAllocator { next: u64::MAX };
        assert_eq!(wrapped.allocate(), RequestTag::new(u64::MAX));
        assert_eq!(wrapped.allocate(), RequestTag::new(1));
    }

    #[test]
    fn test_outstanding_statistics() {
        let stats = ReplyStatistics {
            tracked: 10,
            matched: 6,
            unmatched: 2,
            expired: 1,
        };
        assert_eq!(stats.outstanding(), 3);
    }
}
