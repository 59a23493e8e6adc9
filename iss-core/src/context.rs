// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use iss_config::{Membership, Parameters, PeerId};

use crate::metrics::Metrics;

/// Per-epoch configuration and metrics shared by every component of this
/// peer, mirroring `consensus-core::context::Context`.
#[derive(Clone)]
pub struct Context {
    /// This peer's membership in the currently active ordering topology.
    pub membership: Membership,
    /// Operational parameters (timeouts, catch-up threshold).
    pub parameters: Parameters,
    /// Metrics of this peer.
    pub metrics: Arc<Metrics>,
}

impl Context {
    pub fn new(membership: Membership, parameters: Parameters, metrics: Arc<Metrics>) -> Self {
        Self {
            membership,
            parameters,
            metrics,
        }
    }

    pub fn own_peer(&self) -> PeerId {
        self.membership.own_peer
    }

    pub fn with_membership(mut self, membership: Membership) -> Self {
        self.membership = membership;
        self
    }

    #[cfg(test)]
    pub fn new_for_test(committee_size: u32) -> Self {
        use iss_config::{OrderingTopology, PeerIdentity, PeerKeyPair};
        use rand::{rngs::StdRng, SeedableRng};

        let mut rng = StdRng::from_seed([11; 32]);
        let peers: Vec<_> = (0..committee_size)
            .map(|i| PeerIdentity::new(PeerId(i), PeerKeyPair::generate(&mut rng).public()))
            .collect();
        let topology = OrderingTopology::new(peers, 0);
        let membership = Membership::new(PeerId(0), topology);
        Self::new(
            membership,
            Parameters::default(),
            Arc::new(Metrics::new_for_test()),
        )
    }
}
