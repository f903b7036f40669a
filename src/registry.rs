//! Peer bookkeeping: the local identity plus the fixed sequence of known
//! peers with their liveness and leader flags.
//!
//! This is pure state with no I/O. The owning node wraps a [`Registry`] in a
//! mutex so that flag mutations from concurrent election runs, the health
//! monitor, and inbound handlers never interleave mid-update.

use anyhow::{Context, Result};

/// One participant, identified by the numeric id derived from its listening
/// port. The id never changes after construction.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: u64,
    pub addr: String,
    pub port: String,
    /// Last known reachability. Only updated while handling a protocol event.
    pub active: bool,
    /// Whether this peer is currently believed to be the leader.
    pub leader: bool,
}

impl Peer {
    fn from_endpoint(endpoint: &str, active: bool) -> Result<Self> {
        let (addr, port) = endpoint
            .rsplit_once(':')
            .with_context(|| format!("endpoint '{endpoint}' is not host:port"))?;
        let id = port
            .parse::<u64>()
            .with_context(|| format!("endpoint '{endpoint}' has a non-numeric port"))?;
        Ok(Self {
            id,
            addr: addr.to_string(),
            port: port.to_string(),
            active,
            leader: false,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

/// The process-wide view of the cluster. Peers keep their configuration
/// order for the life of the process; entries are never added or removed
/// after startup.
#[derive(Debug)]
pub struct Registry {
    local: Peer,
    peers: Vec<Peer>,
}

impl Registry {
    /// Builds the registry from the local endpoint and the configured peer
    /// endpoints. Entries that name the local node itself are dropped.
    pub fn new(self_endpoint: &str, peer_endpoints: &[String]) -> Result<Self> {
        let local = Peer::from_endpoint(self_endpoint, true)?;
        let mut peers = Vec::new();
        for endpoint in peer_endpoints {
            let peer = Peer::from_endpoint(endpoint, false)?;
            if !is_local(&local, &peer) {
                peers.push(peer);
            }
        }
        Ok(Self { local, peers })
    }

    pub fn local_id(&self) -> u64 {
        self.local.id
    }

    pub fn is_leader(&self) -> bool {
        self.local.leader
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn mark_active(&mut self, id: u64) {
        if let Some(peer) = self.peers.iter_mut().find(|peer| peer.id == id) {
            peer.active = true;
        }
    }

    pub fn mark_inactive(&mut self, id: u64) {
        if let Some(peer) = self.peers.iter_mut().find(|peer| peer.id == id) {
            peer.active = false;
        }
    }

    /// Flags one peer as the presumed leader without touching anything else.
    /// Used when a higher id acknowledges an election; the authoritative
    /// cleanup happens when its `LEADER` claim arrives.
    pub fn mark_leader(&mut self, id: u64) {
        if let Some(peer) = self.peers.iter_mut().find(|peer| peer.id == id) {
            peer.leader = true;
        }
    }

    /// Takes leadership locally and clears every peer's leader flag.
    /// Returns `true` only on the non-leader to leader transition.
    pub fn become_leader(&mut self) -> bool {
        let transitioned = !self.local.leader;
        for peer in &mut self.peers {
            peer.leader = false;
        }
        self.local.leader = true;
        transitioned
    }

    /// Accepts `leader_id` as the leader: clears the local flag, flags the
    /// matching peer as leader and active, clears every other peer's flag.
    /// Returns `true` only on the leader to non-leader transition.
    pub fn lose_leadership_to(&mut self, leader_id: u64) -> bool {
        let transitioned = self.local.leader;
        self.local.leader = false;
        for peer in &mut self.peers {
            if peer.id == leader_id {
                peer.leader = true;
                peer.active = true;
            } else {
                peer.leader = false;
            }
        }
        transitioned
    }

    /// Id of the believed leader, local node included. `None` while no one
    /// is flagged, which the monitor treats as grounds for an election.
    pub fn leader_id(&self) -> Option<u64> {
        if self.local.leader {
            return Some(self.local.id);
        }
        self.peers.iter().find(|peer| peer.leader).map(|peer| peer.id)
    }
}

/// A configured peer names the local node when the ports match and the hosts
/// are the same or both loopback spellings.
fn is_local(local: &Peer, candidate: &Peer) -> bool {
    candidate.port == local.port
        && (candidate.addr == local.addr
            || (is_loopback(&candidate.addr) && is_loopback(&local.addr)))
}

fn is_loopback(addr: &str) -> bool {
    addr == "127.0.0.1" || addr == "localhost"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::new(
            "127.0.0.1:6661",
            &[
                "127.0.0.1:6662".to_string(),
                "127.0.0.1:6663".to_string(),
            ],
        )
        .expect("valid registry")
    }

    #[test]
    fn excludes_self_including_loopback_aliases() {
        let registry = Registry::new(
            "127.0.0.1:6661",
            &[
                "localhost:6661".to_string(),
                "127.0.0.1:6661".to_string(),
                "127.0.0.1:6662".to_string(),
            ],
        )
        .expect("valid registry");
        assert_eq!(registry.peer_count(), 1);
        assert_eq!(registry.peers()[0].id, 6662);
    }

    #[test]
    fn keeps_same_port_on_other_host() {
        let registry = Registry::new(
            "10.0.0.1:6661",
            &["10.0.0.2:6661".to_string()],
        )
        .expect("valid registry");
        assert_eq!(registry.peer_count(), 1);
    }

    #[test]
    fn rejects_bad_endpoints() {
        assert!(Registry::new("127.0.0.1", &[]).is_err());
        assert!(Registry::new("127.0.0.1:abc", &[]).is_err());
        assert!(Registry::new("127.0.0.1:6661", &["nohost".to_string()]).is_err());
    }

    #[test]
    fn id_is_derived_from_port() {
        let registry = registry();
        assert_eq!(registry.local_id(), 6661);
        assert_eq!(registry.peers()[1].id, 6663);
        assert_eq!(registry.peers()[1].port, "6663");
    }

    #[test]
    fn peers_start_inactive_and_local_starts_active() {
        let registry = registry();
        assert!(registry.peers().iter().all(|peer| !peer.active));
        assert!(!registry.is_leader());
        assert_eq!(registry.leader_id(), None);
    }

    #[test]
    fn become_leader_transitions_once_and_clears_peer_flags() {
        let mut registry = registry();
        registry.mark_leader(6663);

        assert!(registry.become_leader());
        assert!(registry.is_leader());
        assert!(registry.peers().iter().all(|peer| !peer.leader));
        assert_eq!(registry.leader_id(), Some(6661));

        // Repeated calls keep the state but report no transition.
        assert!(!registry.become_leader());
    }

    #[test]
    fn lose_leadership_marks_exactly_one_leader() {
        let mut registry = registry();
        registry.become_leader();

        assert!(registry.lose_leadership_to(6663));
        assert!(!registry.is_leader());
        assert_eq!(registry.leader_id(), Some(6663));
        let leader = &registry.peers()[1];
        assert!(leader.leader && leader.active);
        assert!(!registry.peers()[0].leader);

        assert!(!registry.lose_leadership_to(6663));
    }

    #[test]
    fn lose_leadership_to_unknown_id_clears_all_flags() {
        let mut registry = registry();
        registry.mark_leader(6662);

        assert!(!registry.lose_leadership_to(9999));
        assert_eq!(registry.leader_id(), None);
    }
}
