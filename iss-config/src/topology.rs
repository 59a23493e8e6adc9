// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::crypto::PeerPublicKey;

/// Opaque, total-ordered identifier of a peer within a topology.
///
/// Peers are indexed 0..n within the ordering topology that is active for
/// a given epoch, the same way `consensus-config::AuthorityIndex` indexes
/// authorities within a `Committee`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl PeerId {
    pub fn value(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// A peer's identity: an opaque index plus the key used to verify messages
/// it signs.
#[derive(Clone, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: PeerId,
    pub public_key: PeerPublicKey,
}

impl PeerIdentity {
    pub fn new(id: PeerId, public_key: PeerPublicKey) -> Self {
        Self { id, public_key }
    }
}

impl PartialEq for PeerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for PeerIdentity {}
impl PartialOrd for PeerIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PeerIdentity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

/// Microseconds since the Unix epoch. Used for activation times and for
/// the timestamp carried on every PBFT message (spec.md §6 wire format).
pub type TimestampMicros = u64;

/// The current wall-clock time, in the same units as `TimestampMicros`.
pub fn now_micros() -> TimestampMicros {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_micros() as u64
}

/// The set of peers active for some epoch, fixed for the epoch's duration.
#[derive(Clone, Serialize, Deserialize)]
pub struct OrderingTopology {
    peers: Vec<PeerIdentity>,
    activation_time: TimestampMicros,
}

impl OrderingTopology {
    /// The empty topology used by the Genesis epoch (epoch 0).
    pub fn genesis() -> Self {
        Self {
            peers: Vec::new(),
            activation_time: 0,
        }
    }

    pub fn new(mut peers: Vec<PeerIdentity>, activation_time: TimestampMicros) -> Self {
        peers.sort();
        Self {
            peers,
            activation_time,
        }
    }

    pub fn activation_time(&self) -> TimestampMicros {
        self.activation_time
    }

    pub fn peers(&self) -> &[PeerIdentity] {
        &self.peers
    }

    pub fn size(&self) -> usize {
        self.peers.len()
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.peers.iter().any(|p| p.id == peer)
    }

    pub fn identity(&self, peer: PeerId) -> Option<&PeerIdentity> {
        self.peers.iter().find(|p| p.id == peer)
    }

    /// The peer at a given position in topology order (stable, by `PeerId`).
    pub fn nth(&self, index: usize) -> Option<&PeerIdentity> {
        self.peers.get(index)
    }
}

/// (this peer, the ordering topology it currently participates in), with the
/// PBFT quorum arithmetic derived from the topology size.
#[derive(Clone, Serialize, Deserialize)]
pub struct Membership {
    pub own_peer: PeerId,
    pub topology: OrderingTopology,
}

impl Membership {
    pub fn new(own_peer: PeerId, topology: OrderingTopology) -> Self {
        Self { own_peer, topology }
    }

    pub fn n(&self) -> usize {
        self.topology.size()
    }

    /// `f = ⌊(n−1)/3⌋`
    pub fn f(&self) -> usize {
        self.n().saturating_sub(1) / 3
    }

    /// `2f+1`
    pub fn quorum(&self) -> usize {
        2 * self.f() + 1
    }

    /// `f+1`
    pub fn weak_quorum(&self) -> usize {
        self.f() + 1
    }

    pub fn is_member(&self, peer: PeerId) -> bool {
        self.topology.contains(peer)
    }

    pub fn contains_self(&self) -> bool {
        self.topology.contains(self.own_peer)
    }

    /// True for the Genesis epoch: no peers besides (possibly) this one.
    pub fn has_other_peers(&self) -> bool {
        self.topology
            .peers()
            .iter()
            .any(|p| p.id != self.own_peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PeerKeyPair;
    use rand::{rngs::StdRng, SeedableRng};

    fn topology(n: u32) -> OrderingTopology {
        let mut rng = StdRng::from_seed([7; 32]);
        let peers = (0..n)
            .map(|i| PeerIdentity::new(PeerId(i), PeerKeyPair::generate(&mut rng).public()))
            .collect();
        OrderingTopology::new(peers, 0)
    }

    #[test]
    fn quorum_arithmetic() {
        let membership = Membership::new(PeerId(0), topology(4));
        assert_eq!(membership.f(), 1);
        assert_eq!(membership.quorum(), 3);
        assert_eq!(membership.weak_quorum(), 2);

        let membership = Membership::new(PeerId(0), topology(7));
        assert_eq!(membership.f(), 2);
        assert_eq!(membership.quorum(), 5);
        assert_eq!(membership.weak_quorum(), 3);
    }

    #[test]
    fn genesis_has_no_other_peers() {
        let membership = Membership::new(PeerId(0), OrderingTopology::genesis());
        assert!(!membership.has_other_peers());
    }
}
