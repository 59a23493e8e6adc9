// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Async wrapper around `SegmentCore`: signs and sends the `Effect`s the
//! core produces, arms per-slot timers, and reports decided blocks back to
//! the Consensus Module. Mirrors how `consensus-core::core_thread::CoreThread`
//! drives the synchronous `Core` and turns its output into signals.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use iss_config::now_micros;
use iss_types::{BlockNumber, PbftPayload, Provenance, Segment, VerifiedMessage, View};

use crate::actor::{spawn_with_self, Actor, ActorHandle};
use crate::consensus::{ConsensusEvent, ConsensusHandle};
use crate::context::Context;
use crate::interfaces::{CryptoProvider, EpochInProgress, Network};
use crate::metrics::Metrics;

use super::core::{Effect, SegmentCore};

pub enum SegmentMessage {
    /// A locally-created payload is available for `block` (spec.md §4.3
    /// `proposalCreated`).
    Propose { block: BlockNumber, payload: Bytes },
    /// A verified PBFT message addressed to this segment.
    Deliver(VerifiedMessage),
    /// The timer armed for `(block, view)` fired.
    Timeout { block: BlockNumber, view: View },
    /// Reconstruct this segment's state from a persisted `EpochInProgress`
    /// (spec.md §4.2 "In-progress recovery"). Sent once, right after spawn.
    Recover(EpochInProgress),
}

pub struct SegmentActor {
    core: SegmentCore,
    network: Arc<dyn Network>,
    crypto: Arc<dyn CryptoProvider>,
    consensus: ConsensusHandle,
    metrics: Arc<Metrics>,
    epoch: iss_types::EpochNumber,
    self_handle: ActorHandle<SegmentMessage>,
}

impl SegmentActor {
    /// Spawns a Segment actor for `segment` and arms the initial per-slot
    /// timers at the base view-change timeout.
    pub fn spawn(
        segment: Segment,
        context: &Context,
        network: Arc<dyn Network>,
        crypto: Arc<dyn CryptoProvider>,
        consensus: ConsensusHandle,
    ) -> ActorHandle<SegmentMessage> {
        let epoch = segment.epoch;
        let quorum = context.membership.quorum();
        let topology = context.membership.topology.clone();
        let own_peer = context.own_peer();
        let base_timeout = context.parameters.view_change_timeout;
        let metrics = context.metrics.clone();
        let blocks = segment.blocks.clone();

        spawn_with_self(move |self_handle| {
            let core = SegmentCore::new(segment, topology, own_peer, quorum, base_timeout);
            for block in blocks {
                arm_timer(self_handle.clone(), block, 0, base_timeout);
            }
            SegmentActor {
                core,
                network,
                crypto,
                consensus,
                metrics,
                epoch,
                self_handle,
            }
        })
    }

    async fn apply(&mut self, result: Result<Vec<Effect>, crate::errors::SegmentError>) {
        let effects = match result {
            Ok(effects) => effects,
            Err(err) => {
                tracing::debug!(error = %err, "segment rejected message");
                return;
            }
        };
        self.run_effects(effects).await;
    }

    async fn run_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Broadcast(mut message) => {
                    if matches!(message.payload, PbftPayload::ViewChange(_)) {
                        let leader = self.core.segment().original_leader.to_string();
                        self.metrics
                            .view_changes_total
                            .with_label_values(&[&leader])
                            .inc();
                    }
                    let signature = self.crypto.sign(&message.signable_bytes()).await;
                    message.signature = Bytes::from(signature);
                    self.network.broadcast(message).await;
                }
                Effect::BlockOrdered(block) => {
                    self.metrics
                        .blocks_ordered_total
                        .with_label_values(&["from_consensus"])
                        .inc();
                    self.consensus
                        .tell(ConsensusEvent::BlockOrdered {
                            epoch: self.epoch,
                            block,
                            provenance: Provenance::FromConsensus,
                        })
                        .await
                        .ok();
                }
                Effect::ArmTimer { block, view, after } => {
                    arm_timer(self.self_handle.clone(), block, view, after);
                }
            }
        }
    }
}

fn arm_timer(handle: ActorHandle<SegmentMessage>, block: BlockNumber, view: View, after: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        handle.tell(SegmentMessage::Timeout { block, view }).await.ok();
    });
}

#[async_trait::async_trait]
impl Actor for SegmentActor {
    type Message = SegmentMessage;

    async fn handle(&mut self, message: Self::Message) {
        let _scope = crate::metrics::monitored_scope("segment_actor_handle");
        match message {
            SegmentMessage::Propose { block, payload } => {
                self.core.tick(now_micros());
                let result = self.core.propose(block, payload);
                self.apply(result).await;
            }
            SegmentMessage::Deliver(message) => {
                self.core.tick(message.inner().timestamp);
                let result = self.core.handle(message.inner());
                self.apply(result).await;
            }
            SegmentMessage::Timeout { block, view } => {
                let effects = self.core.on_timeout(block, view);
                self.run_effects(effects).await;
            }
            SegmentMessage::Recover(in_progress) => {
                let result = self.core.recover(&in_progress);
                match result {
                    Ok(effects) => {
                        // Only forward the genuinely-new decisions; the
                        // broadcast/timer side effects of replay are not
                        // resent (the slot's own timer is already armed
                        // at spawn time for every still-open block).
                        let decisions: Vec<Effect> = effects
                            .into_iter()
                            .filter(|e| matches!(e, Effect::BlockOrdered(_)))
                            .collect();
                        self.run_effects(decisions).await;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to recover segment state");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use iss_types::ConsensusMessage;

    use super::*;
    use crate::actor::spawn;

    struct RecordingNetwork {
        broadcasts: Mutex<Vec<ConsensusMessage>>,
    }
    impl RecordingNetwork {
        fn new() -> Self {
            Self { broadcasts: Mutex::new(Vec::new()) }
        }
    }
    #[async_trait]
    impl Network for RecordingNetwork {
        async fn send(&self, _peer: iss_config::PeerId, _message: ConsensusMessage) {}
        async fn broadcast(&self, message: ConsensusMessage) {
            self.broadcasts.lock().unwrap().push(message);
        }
    }

    struct NoopCrypto;
    #[async_trait]
    impl CryptoProvider for NoopCrypto {
        async fn sign(&self, bytes: &[u8]) -> Vec<u8> {
            bytes.to_vec()
        }
        async fn verify(&self, _bytes: &[u8], _sig: &[u8], _peer: iss_config::PeerId) -> Result<(), ()> {
            Ok(())
        }
    }

    struct NoopConsensus;
    #[async_trait]
    impl Actor for NoopConsensus {
        type Message = ConsensusEvent;
        async fn handle(&mut self, _message: Self::Message) {}
    }

    fn segment() -> Segment {
        Segment {
            epoch: 1,
            original_leader: iss_config::PeerId(0),
            blocks: 0..1,
        }
    }

    #[tokio::test]
    async fn propose_broadcasts_a_pre_prepare() {
        let context = Context::new_for_test(4);
        let network = Arc::new(RecordingNetwork::new());
        let handle = SegmentActor::spawn(
            segment(),
            &context,
            network.clone(),
            Arc::new(NoopCrypto),
            spawn(NoopConsensus),
        );

        handle
            .tell(SegmentMessage::Propose { block: 0, payload: Bytes::from_static(b"payload") })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let broadcasts = network.broadcasts.lock().unwrap();
        assert!(broadcasts.iter().any(|m| matches!(m.payload, PbftPayload::PrePrepare(_))));
    }

    #[tokio::test]
    async fn timeout_broadcasts_a_view_change_and_records_the_metric() {
        let context = Context::new_for_test(4);
        let network = Arc::new(RecordingNetwork::new());
        let metrics = context.metrics.clone();
        let handle = SegmentActor::spawn(
            segment(),
            &context,
            network.clone(),
            Arc::new(NoopCrypto),
            spawn(NoopConsensus),
        );

        handle.tell(SegmentMessage::Timeout { block: 0, view: 0 }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let broadcasts = network.broadcasts.lock().unwrap();
        assert!(broadcasts.iter().any(|m| matches!(m.payload, PbftPayload::ViewChange(_))));
        assert_eq!(metrics.view_changes_total.with_label_values(&["P0"]).get(), 1);
    }
}
