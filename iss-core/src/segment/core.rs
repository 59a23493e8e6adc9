// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The PBFT state machine run by one Segment Module (spec.md §4.2). `SegmentCore`
//! is synchronous and side-effect free: it returns the network sends, the
//! decided blocks and the timers its caller must arm as `Effect`s, the same
//! split `consensus-core::core::Core` draws between its own synchronous
//! block-acceptance logic and `CoreSignals`, which turns the result into
//! notifications for other tasks.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use bytes::Bytes;

use iss_config::{OrderingTopology, PeerId, TimestampMicros};
use iss_types::{
    BlockMetadata, BlockNumber, Commit, ConsensusMessage, NewView, PayloadDigest, PbftPayload,
    PrePrepare, Prepare, PreparedCertificate, Segment, View, ViewChange,
};

use crate::errors::SegmentError;
use crate::interfaces::EpochInProgress;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotPhase {
    Idle,
    PrePrepared,
    Prepared,
    Committed,
    Completed,
    ViewChanging,
}

/// A pre-prepare/prepare/commit, decided block, or timer request that the
/// caller (the Segment actor) must carry out. `Broadcast` messages carry an
/// empty `signature`; the actor signs them with the epoch's crypto provider
/// before sending.
pub enum Effect {
    Broadcast(ConsensusMessage),
    BlockOrdered(iss_types::OrderedBlock),
    ArmTimer {
        block: BlockNumber,
        view: View,
        after: Duration,
    },
}

struct SlotState {
    phase: SlotPhase,
    view: View,
    timeout: Duration,
    pre_prepare: Option<ConsensusMessage>,
    prepares: BTreeMap<PeerId, ConsensusMessage>,
    commits: BTreeMap<PeerId, ConsensusMessage>,
    already_led: Vec<PeerId>,
    reported: bool,
    pending_payload: Option<Bytes>,
    view_changes: HashMap<View, BTreeMap<PeerId, ConsensusMessage>>,
}

impl SlotState {
    fn new(view_change_timeout: Duration) -> Self {
        Self {
            phase: SlotPhase::Idle,
            view: 0,
            timeout: view_change_timeout,
            pre_prepare: None,
            prepares: BTreeMap::new(),
            commits: BTreeMap::new(),
            already_led: Vec::new(),
            reported: false,
            pending_payload: None,
            view_changes: HashMap::new(),
        }
    }
}

/// Extracts the digest a `PrePrepare`/`Prepare`/`Commit` message votes for.
fn digest_of(msg: &ConsensusMessage) -> Option<PayloadDigest> {
    match &msg.payload {
        PbftPayload::PrePrepare(p) => Some(p.digest),
        PbftPayload::Prepare(p) => Some(p.digest),
        PbftPayload::Commit(c) => Some(c.digest),
        _ => None,
    }
}

fn pre_prepare_payload(msg: &ConsensusMessage) -> Bytes {
    match &msg.payload {
        PbftPayload::PrePrepare(p) => p.payload.clone(),
        _ => Bytes::new(),
    }
}

pub struct SegmentCore {
    segment: Segment,
    topology: OrderingTopology,
    own_peer: PeerId,
    quorum: usize,
    base_timeout: Duration,
    now: TimestampMicros,
    slots: BTreeMap<BlockNumber, SlotState>,
}

impl SegmentCore {
    pub fn new(
        segment: Segment,
        topology: OrderingTopology,
        own_peer: PeerId,
        quorum: usize,
        base_timeout: Duration,
    ) -> Self {
        let slots = segment
            .blocks
            .clone()
            .map(|b| (b, SlotState::new(base_timeout)))
            .collect();
        Self {
            segment,
            topology,
            own_peer,
            quorum,
            base_timeout,
            now: 0,
            slots,
        }
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Stamps the wall-clock time used to timestamp messages this core
    /// originates while processing the next call.
    pub fn tick(&mut self, now: TimestampMicros) {
        self.now = now;
    }

    fn leader(&self, view: View, already_led: &[PeerId]) -> PeerId {
        crate::leader_schedule::leader_for_view(&self.topology, &self.segment, view, already_led)
    }

    /// A locally-created payload is available for `block`. A no-op unless
    /// this peer is the current leader for `block`'s view and the slot is
    /// still `Idle`; otherwise the payload is held so a later view change
    /// that makes this peer leader can use it (spec.md §4.3 `proposalCreated`).
    pub fn propose(&mut self, block: BlockNumber, payload: Bytes) -> Result<Vec<Effect>, SegmentError> {
        if !self.segment.owns(block) {
            return Err(SegmentError::BlockNotOwned { block });
        }
        let now = self.now;
        let slot = self.slots.get_mut(&block).expect("slot exists for owned block");
        let leader = crate::leader_schedule::leader_for_view(
            &self.topology,
            &self.segment,
            slot.view,
            &slot.already_led,
        );
        if leader != self.own_peer || slot.phase != SlotPhase::Idle {
            slot.pending_payload = Some(payload);
            return Ok(vec![]);
        }

        let digest = PayloadDigest::of(&payload);
        let view = slot.view;
        let metadata = BlockMetadata::new(self.segment.epoch, block);
        let pre_prepare = ConsensusMessage {
            metadata,
            view,
            sender: self.own_peer,
            timestamp: now,
            payload: PbftPayload::PrePrepare(PrePrepare { digest, payload }),
            signature: Bytes::new(),
        };
        slot.pre_prepare = Some(pre_prepare.clone());
        slot.phase = SlotPhase::PrePrepared;
        let prepare = ConsensusMessage {
            metadata,
            view,
            sender: self.own_peer,
            timestamp: now,
            payload: PbftPayload::Prepare(Prepare { digest }),
            signature: Bytes::new(),
        };
        slot.prepares.insert(self.own_peer, prepare.clone());

        let mut effects = vec![Effect::Broadcast(pre_prepare), Effect::Broadcast(prepare)];
        effects.extend(self.check_prepared(block));
        Ok(effects)
    }

    /// Dispatches one verified PBFT message addressed to this segment.
    pub fn handle(&mut self, msg: &ConsensusMessage) -> Result<Vec<Effect>, SegmentError> {
        let block = msg.metadata.block;
        if !self.segment.owns(block) {
            return Err(SegmentError::BlockNotOwned { block });
        }
        match &msg.payload {
            PbftPayload::PrePrepare(_) => self.handle_pre_prepare(msg),
            PbftPayload::Prepare(_) => Ok(self.handle_prepare(msg)),
            PbftPayload::Commit(_) => Ok(self.handle_commit(msg)),
            PbftPayload::ViewChange(_) => Ok(self.handle_view_change(msg)),
            PbftPayload::NewView(_) => self.handle_new_view(msg),
        }
    }

    /// The per-slot timer for `expired_view` fired without the slot
    /// completing; starts a view change (spec.md §4.2 "View change").
    pub fn on_timeout(&mut self, block: BlockNumber, expired_view: View) -> Vec<Effect> {
        let now = self.now;
        let metadata = BlockMetadata::new(self.segment.epoch, block);
        let Some(slot) = self.slots.get_mut(&block) else {
            return vec![];
        };
        if slot.phase == SlotPhase::Completed || slot.view != expired_view {
            return vec![];
        }

        let old_leader = crate::leader_schedule::leader_for_view(
            &self.topology,
            &self.segment,
            expired_view,
            &slot.already_led,
        );
        if !slot.already_led.contains(&old_leader) {
            slot.already_led.push(old_leader);
        }

        let prepared = matches!(slot.phase, SlotPhase::Prepared | SlotPhase::Committed)
            .then(|| slot.pre_prepare.as_ref())
            .flatten()
            .and_then(|pp| {
                let digest = digest_of(pp)?;
                let prepares = slot
                    .prepares
                    .values()
                    .filter(|m| digest_of(m) == Some(digest))
                    .cloned()
                    .collect();
                Some(PreparedCertificate {
                    view: expired_view,
                    digest,
                    pre_prepare: Box::new(pp.clone()),
                    prepares,
                })
            });

        slot.phase = SlotPhase::ViewChanging;
        slot.timeout *= 2;
        let timeout = slot.timeout;
        let target_view = expired_view + 1;

        let view_change = ConsensusMessage {
            metadata,
            view: target_view,
            sender: self.own_peer,
            timestamp: now,
            payload: PbftPayload::ViewChange(ViewChange { prepared }),
            signature: Bytes::new(),
        };

        let mut effects = vec![
            Effect::Broadcast(view_change.clone()),
            Effect::ArmTimer {
                block,
                view: target_view,
                after: timeout,
            },
        ];
        effects.extend(self.record_view_change_vote(block, view_change));
        effects
    }

    /// Reconstructs this segment's state after a crash from the persisted
    /// `EpochInProgress` (spec.md §4.2 "In-progress recovery"). Already-
    /// completed blocks are marked `Completed` directly; PBFT messages for
    /// still-incomplete blocks are replayed through the ordinary handler so
    /// the slot resumes at the highest state the replayed votes justify.
    /// The caller should discard any `Broadcast`/`ArmTimer` effects this
    /// returns (recovery must not resend stale votes) and arm fresh timers
    /// for the slots it leaves non-`Completed`; `BlockOrdered` effects,
    /// however, are genuine and must be forwarded.
    pub fn recover(&mut self, in_progress: &EpochInProgress) -> Result<Vec<Effect>, SegmentError> {
        for &block in &in_progress.completed_blocks {
            if let Some(slot) = self.slots.get_mut(&block) {
                slot.phase = SlotPhase::Completed;
                slot.reported = true;
            }
        }
        let mut effects = Vec::new();
        for msg in &in_progress.pbft_messages_for_incomplete_blocks {
            if self.segment.owns(msg.metadata.block) {
                effects.extend(self.handle(msg)?);
            }
        }
        Ok(effects)
    }

    pub fn slot_view(&self, block: BlockNumber) -> Option<View> {
        self.slots.get(&block).map(|s| s.view)
    }

    pub fn slot_timeout(&self, block: BlockNumber) -> Option<Duration> {
        self.slots.get(&block).map(|s| s.timeout)
    }

    pub fn is_completed(&self, block: BlockNumber) -> bool {
        self.slots
            .get(&block)
            .map(|s| s.phase == SlotPhase::Completed)
            .unwrap_or(false)
    }

    #[cfg(test)]
    fn slots_phase_is_prepared(&self, block: BlockNumber) -> bool {
        self.slots
            .get(&block)
            .map(|s| matches!(s.phase, SlotPhase::Prepared | SlotPhase::Committed | SlotPhase::Completed))
            .unwrap_or(false)
    }

    pub fn completed_blocks(&self) -> Vec<BlockNumber> {
        self.slots
            .iter()
            .filter(|(_, s)| s.phase == SlotPhase::Completed)
            .map(|(b, _)| *b)
            .collect()
    }

    fn handle_pre_prepare(&mut self, msg: &ConsensusMessage) -> Result<Vec<Effect>, SegmentError> {
        let block = msg.metadata.block;
        let view = msg.view;
        let now = self.now;

        let current_view = self.slots[&block].view;
        if view != current_view {
            return Ok(vec![]);
        }
        let leader = self.leader(view, &self.slots[&block].already_led);
        if msg.sender != leader {
            return Ok(vec![]);
        }
        let PbftPayload::PrePrepare(pp) = &msg.payload else {
            unreachable!("dispatch already matched PrePrepare")
        };
        if PayloadDigest::of(&pp.payload) != pp.digest {
            return Ok(vec![]);
        }

        let slot = self.slots.get_mut(&block).expect("slot exists for owned block");
        if let Some(existing) = &slot.pre_prepare {
            return if digest_of(existing) == Some(pp.digest) {
                Ok(vec![])
            } else {
                Err(SegmentError::ConflictingPrePrepare { block, view })
            };
        }

        slot.pre_prepare = Some(msg.clone());
        slot.phase = SlotPhase::PrePrepared;
        let prepare = ConsensusMessage {
            metadata: msg.metadata,
            view,
            sender: self.own_peer,
            timestamp: now,
            payload: PbftPayload::Prepare(Prepare { digest: pp.digest }),
            signature: Bytes::new(),
        };
        slot.prepares.insert(self.own_peer, prepare.clone());

        let mut effects = vec![Effect::Broadcast(prepare)];
        effects.extend(self.check_prepared(block));
        Ok(effects)
    }

    fn handle_prepare(&mut self, msg: &ConsensusMessage) -> Vec<Effect> {
        let block = msg.metadata.block;
        let slot = self.slots.get_mut(&block).expect("slot exists for owned block");
        if msg.view != slot.view {
            return vec![];
        }
        slot.prepares.insert(msg.sender, msg.clone());
        self.check_prepared(block)
    }

    fn handle_commit(&mut self, msg: &ConsensusMessage) -> Vec<Effect> {
        let block = msg.metadata.block;
        let slot = self.slots.get_mut(&block).expect("slot exists for owned block");
        if msg.view != slot.view {
            return vec![];
        }
        slot.commits.insert(msg.sender, msg.clone());
        self.check_committed(block)
    }

    fn handle_view_change(&mut self, msg: &ConsensusMessage) -> Vec<Effect> {
        self.record_view_change_vote(msg.metadata.block, msg.clone())
    }

    fn handle_new_view(&mut self, msg: &ConsensusMessage) -> Result<Vec<Effect>, SegmentError> {
        let block = msg.metadata.block;
        let view = msg.view;
        let slot_view = self.slots[&block].view;
        if view <= slot_view {
            return Ok(vec![]);
        }
        let PbftPayload::NewView(nv) = &msg.payload else {
            unreachable!("dispatch already matched NewView")
        };
        if nv.view_changes.len() < self.quorum {
            return Err(SegmentError::InvalidNewView {
                view,
                reason: "insufficient view-change quorum".to_string(),
            });
        }
        let leader = self.leader(view, &self.slots[&block].already_led);
        if msg.sender != leader {
            return Err(SegmentError::InvalidNewView {
                view,
                reason: "sender is not the view leader".to_string(),
            });
        }
        Ok(self.apply_new_view(block, view, (*nv.pre_prepare).clone()))
    }

    fn record_view_change_vote(&mut self, block: BlockNumber, vc: ConsensusMessage) -> Vec<Effect> {
        let target_view = vc.view;
        let slot = self.slots.get_mut(&block).expect("slot exists for owned block");
        slot.view_changes
            .entry(target_view)
            .or_default()
            .insert(vc.sender, vc);
        self.try_form_new_view(block, target_view)
    }

    fn try_form_new_view(&mut self, block: BlockNumber, target_view: View) -> Vec<Effect> {
        let now = self.now;
        let slot = self.slots.get(&block).expect("slot exists for owned block");
        if slot.view >= target_view {
            return vec![];
        }
        let Some(votes) = slot.view_changes.get(&target_view) else {
            return vec![];
        };
        if votes.len() < self.quorum {
            return vec![];
        }
        let leader = self.leader(target_view, &slot.already_led);
        if leader != self.own_peer {
            return vec![];
        }

        let view_changes: Vec<ConsensusMessage> = votes.values().cloned().collect();
        let highest = view_changes
            .iter()
            .filter_map(|m| match &m.payload {
                PbftPayload::ViewChange(vc) => vc.prepared.clone(),
                _ => None,
            })
            .max_by_key(|cert| cert.view);

        let metadata = BlockMetadata::new(self.segment.epoch, block);
        let pre_prepare = match highest {
            Some(cert) => ConsensusMessage {
                metadata,
                view: target_view,
                sender: self.own_peer,
                timestamp: now,
                payload: PbftPayload::PrePrepare(PrePrepare {
                    digest: cert.digest,
                    payload: pre_prepare_payload(&cert.pre_prepare),
                }),
                signature: Bytes::new(),
            },
            None => {
                let slot = self.slots.get(&block).expect("slot exists for owned block");
                let Some(payload) = slot.pending_payload.clone() else {
                    // No justified proposal and nothing new to propose yet;
                    // defer forming NewView until `propose` supplies one.
                    return vec![];
                };
                let digest = PayloadDigest::of(&payload);
                ConsensusMessage {
                    metadata,
                    view: target_view,
                    sender: self.own_peer,
                    timestamp: now,
                    payload: PbftPayload::PrePrepare(PrePrepare { digest, payload }),
                    signature: Bytes::new(),
                }
            }
        };

        let new_view = ConsensusMessage {
            metadata,
            view: target_view,
            sender: self.own_peer,
            timestamp: now,
            payload: PbftPayload::NewView(NewView {
                view_changes,
                pre_prepare: Box::new(pre_prepare.clone()),
            }),
            signature: Bytes::new(),
        };

        let mut effects = vec![Effect::Broadcast(new_view)];
        effects.extend(self.apply_new_view(block, target_view, pre_prepare));
        effects
    }

    fn apply_new_view(&mut self, block: BlockNumber, view: View, pre_prepare: ConsensusMessage) -> Vec<Effect> {
        let now = self.now;
        let metadata = BlockMetadata::new(self.segment.epoch, block);
        let slot = self.slots.get_mut(&block).expect("slot exists for owned block");

        let old_leader = crate::leader_schedule::leader_for_view(
            &self.topology,
            &self.segment,
            slot.view,
            &slot.already_led,
        );
        if !slot.already_led.contains(&old_leader) {
            slot.already_led.push(old_leader);
        }

        slot.view = view;
        slot.prepares.clear();
        slot.commits.clear();
        slot.view_changes.clear();
        slot.phase = SlotPhase::PrePrepared;
        slot.pre_prepare = Some(pre_prepare.clone());
        slot.timeout = std::cmp::max(slot.timeout * 2, self.base_timeout);

        let digest = digest_of(&pre_prepare).expect("pre-prepare always carries a digest");
        let prepare = ConsensusMessage {
            metadata,
            view,
            sender: self.own_peer,
            timestamp: now,
            payload: PbftPayload::Prepare(Prepare { digest }),
            signature: Bytes::new(),
        };
        slot.prepares.insert(self.own_peer, prepare.clone());
        let timeout = slot.timeout;

        let mut effects = vec![
            Effect::Broadcast(prepare),
            Effect::ArmTimer { block, view, after: timeout },
        ];
        effects.extend(self.check_prepared(block));
        effects
    }

    fn check_prepared(&mut self, block: BlockNumber) -> Vec<Effect> {
        let now = self.now;
        let metadata = BlockMetadata::new(self.segment.epoch, block);
        let slot = self.slots.get_mut(&block).expect("slot exists for owned block");
        if slot.phase != SlotPhase::PrePrepared {
            return vec![];
        }
        let Some(digest) = slot.pre_prepare.as_ref().and_then(digest_of) else {
            return vec![];
        };
        let matching = slot
            .prepares
            .values()
            .filter(|m| digest_of(m) == Some(digest))
            .count();
        if matching < self.quorum {
            return vec![];
        }

        slot.phase = SlotPhase::Prepared;
        let commit = ConsensusMessage {
            metadata,
            view: slot.view,
            sender: self.own_peer,
            timestamp: now,
            payload: PbftPayload::Commit(Commit { digest }),
            signature: Bytes::new(),
        };
        slot.commits.insert(self.own_peer, commit.clone());

        let mut effects = vec![Effect::Broadcast(commit)];
        effects.extend(self.check_committed(block));
        effects
    }

    fn check_committed(&mut self, block: BlockNumber) -> Vec<Effect> {
        let slot = self.slots.get_mut(&block).expect("slot exists for owned block");
        if slot.phase != SlotPhase::Prepared {
            return vec![];
        }
        let Some(digest) = slot.pre_prepare.as_ref().and_then(digest_of) else {
            return vec![];
        };
        let matching: Vec<ConsensusMessage> = slot
            .commits
            .values()
            .filter(|m| digest_of(m) == Some(digest))
            .cloned()
            .collect();
        if matching.len() < self.quorum {
            return vec![];
        }

        slot.phase = SlotPhase::Committed;
        if slot.reported {
            return vec![];
        }
        slot.reported = true;
        slot.phase = SlotPhase::Completed;

        let view = slot.view;
        let payload = pre_prepare_payload(slot.pre_prepare.as_ref().expect("prepared implies pre-prepare"));
        let certificate = iss_types::CommitCertificate {
            metadata: BlockMetadata::new(self.segment.epoch, block),
            view,
            digest,
            commits: matching,
        };
        let ordered = iss_types::OrderedBlock {
            metadata: BlockMetadata::new(self.segment.epoch, block),
            payload,
            original_leader: self.segment.original_leader,
            is_last_in_epoch: false,
            commit_certificate: certificate,
        };
        vec![Effect::BlockOrdered(ordered)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iss_config::{OrderingTopology, PeerIdentity, PeerKeyPair};
    use rand::{rngs::StdRng, SeedableRng};

    fn topology(n: u32) -> OrderingTopology {
        let mut rng = StdRng::from_seed([9; 32]);
        let peers = (0..n)
            .map(|i| PeerIdentity::new(PeerId(i), PeerKeyPair::generate(&mut rng).public()))
            .collect();
        OrderingTopology::new(peers, 0)
    }

    fn segment() -> Segment {
        Segment {
            epoch: 1,
            original_leader: PeerId(0),
            blocks: 0..1,
        }
    }

    fn core_for(peer: PeerId, n: u32) -> SegmentCore {
        let topo = topology(n);
        let quorum = 2 * ((n as usize - 1) / 3) + 1;
        SegmentCore::new(segment(), topo, peer, quorum, Duration::from_millis(1000))
    }

    fn as_broadcasts(effects: &[Effect]) -> Vec<&ConsensusMessage> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Broadcast(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn happy_path_decides_at_view_zero() {
        let n = 4;
        let mut leader = core_for(PeerId(0), n);
        let effects = leader.propose(0, Bytes::from_static(b"payload")).unwrap();
        let broadcasts = as_broadcasts(&effects);
        assert_eq!(broadcasts.len(), 2); // pre-prepare + own prepare
        let pre_prepare = broadcasts[0].clone();
        let own_prepare = broadcasts[1].clone();

        let mut replica1 = core_for(PeerId(1), n);
        let mut replica2 = core_for(PeerId(2), n);
        let mut replica3 = core_for(PeerId(3), n);

        let prepare1 = as_broadcasts(&replica1.handle(&pre_prepare).unwrap())[0].clone();
        let prepare2 = as_broadcasts(&replica2.handle(&pre_prepare).unwrap())[0].clone();
        let prepare3 = as_broadcasts(&replica3.handle(&pre_prepare).unwrap())[0].clone();

        let prepares = [own_prepare, prepare1, prepare2, prepare3];
        let mut commits = Vec::new();
        for prepare in &prepares {
            for r in [&mut leader, &mut replica1, &mut replica2, &mut replica3] {
                if let Ok(effects) = r.handle(prepare) {
                    for e in effects {
                        if let Effect::Broadcast(m) = e {
                            if matches!(m.payload, PbftPayload::Commit(_)) {
                                commits.push(m);
                            }
                        }
                    }
                }
            }
        }
        for commit in &commits {
            for r in [&mut leader, &mut replica1, &mut replica2, &mut replica3] {
                let _ = r.handle(commit);
            }
        }

        assert!(leader.is_completed(0));
        assert!(replica1.is_completed(0));
        assert!(replica2.is_completed(0));
        assert!(replica3.is_completed(0));
    }

    #[test]
    fn conflicting_pre_prepare_is_rejected() {
        let n = 4;
        let mut replica = core_for(PeerId(1), n);
        let metadata = BlockMetadata::new(1, 0);
        let first = ConsensusMessage {
            metadata,
            view: 0,
            sender: PeerId(0),
            timestamp: 0,
            payload: PbftPayload::PrePrepare(PrePrepare {
                digest: PayloadDigest::of(b"a"),
                payload: Bytes::from_static(b"a"),
            }),
            signature: Bytes::new(),
        };
        let second = ConsensusMessage {
            payload: PbftPayload::PrePrepare(PrePrepare {
                digest: PayloadDigest::of(b"b"),
                payload: Bytes::from_static(b"b"),
            }),
            ..first.clone()
        };
        replica.handle(&first).unwrap();
        let err = replica.handle(&second).unwrap_err();
        assert!(matches!(err, SegmentError::ConflictingPrePrepare { .. }));
    }

    #[test]
    fn timeout_triggers_view_change_with_doubled_timeout() {
        let mut replica = core_for(PeerId(1), 4);
        let initial = replica.slot_timeout(0).unwrap();
        let effects = replica.on_timeout(0, 0);
        let armed = effects.iter().find_map(|e| match e {
            Effect::ArmTimer { after, .. } => Some(*after),
            _ => None,
        });
        assert_eq!(armed, Some(initial * 2));
        assert_eq!(replica.slot_view(0), Some(0)); // view bumps only once NewView is installed
        let broadcasts = as_broadcasts(&effects);
        assert!(matches!(broadcasts[0].payload, PbftPayload::ViewChange(_)));
        assert_eq!(broadcasts[0].view, 1);
    }

    #[test]
    fn byzantine_commit_minority_does_not_change_the_decision() {
        // n=7, f=2, quorum=5: two Byzantine commits for a different digest
        // must not stop the honest 2f+1 from deciding the real one.
        let n = 7;
        let honest_digest = PayloadDigest::of(b"real");
        let byzantine_digest = PayloadDigest::of(b"fake");
        let metadata = BlockMetadata::new(1, 0);

        let mut replica = core_for(PeerId(6), n);
        let pre_prepare = ConsensusMessage {
            metadata,
            view: 0,
            sender: PeerId(0),
            timestamp: 0,
            payload: PbftPayload::PrePrepare(PrePrepare {
                digest: honest_digest,
                payload: Bytes::from_static(b"real"),
            }),
            signature: Bytes::new(),
        };
        replica.handle(&pre_prepare).unwrap();
        for sender in 0..n {
            let prepare = ConsensusMessage {
                metadata,
                view: 0,
                sender: PeerId(sender),
                timestamp: 0,
                payload: PbftPayload::Prepare(Prepare { digest: honest_digest }),
                signature: Bytes::new(),
            };
            replica.handle(&prepare).unwrap();
        }
        assert!(replica.slots_phase_is_prepared(0));

        for sender in 0..n {
            let commit = ConsensusMessage {
                metadata,
                view: 0,
                sender: PeerId(sender),
                timestamp: 0,
                payload: PbftPayload::Commit(Commit {
                    digest: if sender < 2 { byzantine_digest } else { honest_digest },
                }),
                signature: Bytes::new(),
            };
            replica.handle(&commit).unwrap();
        }
        assert!(replica.is_completed(0));
    }
}
