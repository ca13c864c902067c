//! Peer registry
//!
//! Peers live in an arena keyed by `PeerId`. Three indices sit on top of it: the insertion
//! order list used for fleet-wide iteration, a hash index from live connection handle to
//! peer, and the current argument-sharing group. A peer leaves every index only when its
//! reference count drops to zero.

use hashbrown::HashMap;
use loadfleet_core::{ConfigError, ConnectionId, FleetError, FleetResult, PeerId};
use smallvec::SmallVec;
use tracing::debug;

use crate::address::{AddressKind, AddressSpec, PeerAddress};
use crate::peer::Peer;
use crate::transport::Connection;

/// Owns every peer known to the fleet
#[derive(Debug)]
pub struct PeerRegistry {
    default_port: u16,
    peers: HashMap<PeerId, Peer>,
    order: Vec<PeerId>,
    by_connection: HashMap<ConnectionId, PeerId>,
    arg_group: SmallVec<[PeerId; 8]>,
    next_id: u64,
}

impl PeerRegistry {
    pub fn new(default_port: u16) -> Self {
        Self {
            default_port,
            peers: HashMap::new(),
            order: Vec::new(),
            by_connection: HashMap::new(),
            arg_group: SmallVec::new(),
            next_id: 1,
        }
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    /// Add a peer from an address specification
    pub fn add(&mut self, spec: &str) -> Result<PeerId, ConfigError> {
        let address = AddressSpec::parse(spec, self.default_port)?.resolve()?;
        Ok(self.insert(address))
    }

    /// Add a peer, first letting `previous` join the argument-sharing group
    ///
    /// `previous` joins only if it still carries nothing but the program name. If it already
    /// has arguments of its own, the group is disbanded instead.
    pub fn add_to_group(
        &mut self,
        spec: &str,
        previous: Option<PeerId>,
    ) -> Result<PeerId, ConfigError> {
        let address = AddressSpec::parse(spec, self.default_port)?.resolve()?;
        if let Some(prev) = previous.and_then(|id| self.peers.get(&id)) {
            if prev.has_extra_args() {
                self.arg_group.clear();
            } else if !self.arg_group.contains(&prev.id()) {
                self.arg_group.push(prev.id());
            }
        }
        Ok(self.insert(address))
    }

    /// Add a peer with an explicit address family instead of a parsed specification
    pub fn add_explicit(
        &mut self,
        host: &str,
        kind: AddressKind,
        port: u16,
    ) -> Result<PeerId, ConfigError> {
        let spec = AddressSpec {
            kind: Some(kind),
            host: host.to_string(),
            port,
        };
        Ok(self.insert(spec.resolve()?))
    }

    fn insert(&mut self, address: PeerAddress) -> PeerId {
        let id = PeerId::new(self.next_id);
        self.next_id += 1;
        debug!(peer = %id, %address, "peer added");
        self.peers.insert(id, Peer::new(id, address));
        self.order.push(id);
        id
    }

    /// Append an argument to `peer` and to every member of the argument-sharing group
    pub fn add_argument(&mut self, peer: PeerId, token: &str) -> FleetResult<()> {
        let target = self
            .peers
            .get_mut(&peer)
            .ok_or_else(|| FleetError::peer_not_found(peer))?;
        target.args.push(token.to_string());
        debug!(peer = %peer, index = target.args.len() - 1, token, "argument added");

        for member in &self.arg_group {
            if *member == peer {
                continue;
            }
            if let Some(p) = self.peers.get_mut(member) {
                p.args.push(token.to_string());
            }
        }
        Ok(())
    }

    /// Members of the current argument-sharing group
    pub fn arg_group(&self) -> &[PeerId] {
        &self.arg_group
    }

    // ------------------------------------------------------------------------
    // Reference Counting
    // ------------------------------------------------------------------------

    pub fn acquire(&mut self, peer: PeerId) -> Option<PeerId> {
        let p = self.peers.get_mut(&peer)?;
        p.refs += 1;
        Some(peer)
    }

    /// Drop one reference; returns the peer once the last reference is gone
    pub fn release(&mut self, peer: PeerId) -> Option<Peer> {
        let p = self.peers.get_mut(&peer)?;
        p.refs = p.refs.saturating_sub(1);
        if p.refs > 0 {
            return None;
        }

        let removed = self.peers.remove(&peer)?;
        self.order.retain(|id| *id != peer);
        self.arg_group.retain(|id| *id != peer);
        if let Some(conn) = removed.connection_id() {
            self.by_connection.remove(&conn);
        }
        debug!(peer = %peer, host = removed.hostname(), "peer removed");
        Some(removed)
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    pub fn attach_connection(&mut self, peer: PeerId, connection: Connection) -> FleetResult<()> {
        let p = self
            .peers
            .get_mut(&peer)
            .ok_or_else(|| FleetError::peer_not_found(peer))?;
        if let Some(old) = p.connection.take() {
            self.by_connection.remove(&old.id());
        }
        self.by_connection.insert(connection.id(), peer);
        p.connection = Some(connection);
        Ok(())
    }

    /// Take the connection away from `peer`, closing it when dropped
    pub fn detach_connection(&mut self, peer: PeerId) -> Option<Connection> {
        let connection = self.peers.get_mut(&peer)?.connection.take()?;
        self.by_connection.remove(&connection.id());
        Some(connection)
    }

    pub fn find_by_connection(&self, connection: ConnectionId) -> Option<PeerId> {
        self.by_connection.get(&connection).copied()
    }

    /// Look up and acquire in one step; the caller must release
    pub fn acquire_by_connection(&mut self, connection: ConnectionId) -> Option<PeerId> {
        let peer = self.find_by_connection(connection)?;
        self.acquire(peer)
    }

    // ------------------------------------------------------------------------
    // Access
    // ------------------------------------------------------------------------

    pub fn get(&self, peer: PeerId) -> Option<&Peer> {
        self.peers.get(&peer)
    }

    pub fn get_mut(&mut self, peer: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(&peer)
    }

    /// Peer ids in insertion order
    pub fn ids(&self) -> Vec<PeerId> {
        self.order.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.order.iter().filter_map(|id| self.peers.get(id))
    }

    /// Peers still holding their registry reference
    pub fn live_count(&self) -> usize {
        self.peers.values().filter(|p| !p.evicted).count()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn connection_count(&self) -> usize {
        self.by_connection.len()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loadfleet_core::config::DEFAULT_PORT;

    fn registry() -> PeerRegistry {
        PeerRegistry::new(DEFAULT_PORT)
    }

    #[test]
    fn test_add_starts_with_program_name() {
        let mut reg = registry();
        let id = reg.add("127.0.0.1").unwrap();
        let peer = reg.get(id).unwrap();
        assert_eq!(peer.args(), ["fio"]);
        assert_eq!(peer.ref_count(), 1);
        assert_eq!(peer.display_name(), "127.0.0.1");
        assert!(!peer.is_connected());
    }

    #[test]
    fn test_failed_add_creates_nothing() {
        let mut reg = registry();
        assert!(reg.add("127.0.0.1,notaport").is_err());
        assert!(reg.add("sock:").is_err());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_arg_group_shares_arguments() {
        let mut reg = registry();
        let a = reg.add("10.0.0.1").unwrap();
        let b = reg.add_to_group("10.0.0.2", Some(a)).unwrap();
        let c = reg.add_to_group("10.0.0.3", Some(b)).unwrap();

        reg.add_argument(c, "--runtime=10").unwrap();
        reg.add_argument(c, "--size=1g").unwrap();

        let expected = ["fio", "--runtime=10", "--size=1g"];
        for id in [a, b, c] {
            assert_eq!(reg.get(id).unwrap().args(), expected);
        }
    }

    #[test]
    fn test_new_group_clears_previous() {
        let mut reg = registry();
        let a = reg.add("10.0.0.1").unwrap();
        let b = reg.add_to_group("10.0.0.2", Some(a)).unwrap();
        reg.add_argument(b, "--shared").unwrap();

        // b already has its own arguments, so the group is disbanded
        let c = reg.add_to_group("10.0.0.3", Some(b)).unwrap();
        reg.add_argument(c, "--only-c").unwrap();

        assert_eq!(reg.get(a).unwrap().args(), ["fio", "--shared"]);
        assert_eq!(reg.get(b).unwrap().args(), ["fio", "--shared"]);
        assert_eq!(reg.get(c).unwrap().args(), ["fio", "--only-c"]);
        assert!(reg.arg_group().is_empty());
    }

    #[test]
    fn test_refcount_requires_matching_releases() {
        let mut reg = registry();
        let id = reg.add("sock:/tmp/agent").unwrap();
        reg.acquire(id).unwrap();
        reg.acquire(id).unwrap();

        assert!(reg.release(id).is_none());
        assert!(reg.release(id).is_none());
        assert!(reg.get(id).is_some());

        let removed = reg.release(id).unwrap();
        assert_eq!(removed.id(), id);
        assert!(reg.get(id).is_none());
        assert!(reg.ids().is_empty());
        assert!(reg.release(id).is_none());
    }

    #[test]
    fn test_release_leaves_arg_group() {
        let mut reg = registry();
        let a = reg.add("10.0.0.1").unwrap();
        let b = reg.add_to_group("10.0.0.2", Some(a)).unwrap();
        assert_eq!(reg.arg_group(), [a]);

        reg.release(a).unwrap();
        assert!(reg.arg_group().is_empty());
        reg.add_argument(b, "--x").unwrap();
        assert_eq!(reg.get(b).unwrap().args(), ["fio", "--x"]);
    }

    #[test]
    fn test_unknown_peer_argument() {
        let mut reg = registry();
        assert!(matches!(
            reg.add_argument(PeerId::new(42), "--x"),
            Err(FleetError::PeerNotFound { .. })
        ));
    }

    #[test]
    fn test_insertion_order() {
        let mut reg = registry();
        let ids: Vec<_> = ["10.0.0.1", "10.0.0.2", "10.0.0.3"]
            .iter()
            .map(|spec| reg.add(spec).unwrap())
            .collect();
        assert_eq!(reg.ids(), ids);
        let hosts: Vec<_> = reg.iter().map(|p| p.hostname().to_string()).collect();
        assert_eq!(hosts, ["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }
}
