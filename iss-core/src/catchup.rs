// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Catch-up Detector (spec.md §4.5): tracks the highest epoch each peer has
//! been observed at and decides when this node has fallen far enough behind
//! that it should pause live PBFT and state-transfer instead.

use std::collections::HashMap;

use iss_config::PeerId;
use iss_types::EpochNumber;

pub struct CatchupDetector {
    latest_known_peer_epoch: HashMap<PeerId, EpochNumber>,
    threshold_k: u64,
}

impl CatchupDetector {
    pub fn new(threshold_k: u64) -> Self {
        Self {
            latest_known_peer_epoch: HashMap::new(),
            threshold_k,
        }
    }

    /// Records the highest epoch number observed for `peer`, either from a
    /// future-epoch PBFT message or from a state-transfer exchange
    /// (spec.md §4.1 "update peer-epoch map").
    pub fn observe(&mut self, peer: PeerId, epoch: EpochNumber) {
        let entry = self.latest_known_peer_epoch.entry(peer).or_insert(0);
        if epoch > *entry {
            *entry = epoch;
        }
    }

    /// `∃ ≥ f+1 peers with latestKnownPeerEpoch[p] ≥ currentEpoch + K`
    /// (spec.md §4.5).
    pub fn should_catch_up(&self, current_epoch: EpochNumber, weak_quorum: usize) -> bool {
        let ahead = self
            .latest_known_peer_epoch
            .values()
            .filter(|&&peer_epoch| peer_epoch >= current_epoch + self.threshold_k)
            .count();
        ahead >= weak_quorum
    }

    /// The highest epoch any peer has been observed at, used as the target
    /// for `StateTransferMessage::FetchFrom` (spec.md §4.5: "until the
    /// reported remote epoch is reached").
    pub fn highest_known_epoch(&self) -> Option<EpochNumber> {
        self.latest_known_peer_epoch.values().copied().max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_once_weak_quorum_is_far_enough_ahead() {
        let mut detector = CatchupDetector::new(2);
        detector.observe(PeerId(1), 6);
        detector.observe(PeerId(2), 6);
        detector.observe(PeerId(3), 3);
        // weak quorum = 2, current = 2: peers 1 and 2 are at >= 2+2=4.
        assert!(detector.should_catch_up(2, 2));
        assert_eq!(detector.highest_known_epoch(), Some(6));
    }

    #[test]
    fn does_not_trigger_below_threshold() {
        let mut detector = CatchupDetector::new(2);
        detector.observe(PeerId(1), 3);
        assert!(!detector.should_catch_up(2, 2));
    }

    #[test]
    fn only_the_highest_observed_epoch_per_peer_is_kept() {
        let mut detector = CatchupDetector::new(2);
        detector.observe(PeerId(1), 6);
        detector.observe(PeerId(1), 4);
        assert_eq!(detector.highest_known_epoch(), Some(6));
    }
}
