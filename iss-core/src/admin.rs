// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Admin probe (spec.md §6 `getOrderingTopology`). `AdminProbe` is a
//! synchronous trait, so it cannot round-trip through the Consensus actor's
//! mailbox; instead the actor publishes a snapshot into this cell on every
//! epoch advance, the same way `consensus-core::context::Context` hands out
//! a plain read of committee state rather than routing through `CoreThread`.

use parking_lot::RwLock;

use iss_config::PeerId;
use iss_types::EpochNumber;

use crate::interfaces::AdminProbe;

pub struct AdminSnapshot {
    state: RwLock<(EpochNumber, Vec<PeerId>)>,
}

impl AdminSnapshot {
    pub fn new(epoch: EpochNumber, peers: Vec<PeerId>) -> Self {
        Self {
            state: RwLock::new((epoch, peers)),
        }
    }

    pub fn publish(&self, epoch: EpochNumber, peers: Vec<PeerId>) {
        *self.state.write() = (epoch, peers);
    }
}

impl AdminProbe for AdminSnapshot {
    fn get_ordering_topology(&self) -> (EpochNumber, Vec<PeerId>) {
        self.state.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_replaces_the_snapshot() {
        let snapshot = AdminSnapshot::new(0, vec![]);
        assert_eq!(snapshot.get_ordering_topology(), (0, vec![]));
        snapshot.publish(1, vec![PeerId(0), PeerId(1)]);
        assert_eq!(snapshot.get_ordering_topology(), (1, vec![PeerId(0), PeerId(1)]));
    }
}
