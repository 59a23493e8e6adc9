// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Consensus Module (spec.md §4.1): the top-level actor. Owns epoch
//! lifecycle, the future-message queue, the catch-up detector, and the
//! Segment Modules and State-Transfer Manager it supervises. Mirrors how
//! `consensus-core::authority_node::ConsensusAuthority` owns and wires
//! together the rest of the `consensus-core` actor graph for one peer.

use std::sync::Arc;

use bytes::Bytes;

use iss_config::{Membership, OrderingTopology, PeerId};
use iss_types::{
    BlockNumber, EpochInfo, EpochNumber, OrderedBlock, OrderedBlockForOutput, Provenance,
    UnverifiedMessage, VerifiedMessage,
};

use crate::actor::{spawn_with_self, Actor, ActorHandle};
use crate::admin::AdminSnapshot;
use crate::catchup::CatchupDetector;
use crate::context::Context;
use crate::epoch_state::EpochState;
use crate::future_queue::FutureMessageQueue;
use crate::interfaces::{
    BlockStore, CryptoProvider, EpochStore, EpochTopologyHistory, Network, OutputSink,
    StateTransferTransport,
};
use crate::leader_schedule::segments_for_epoch;
use crate::segment::{SegmentActor, SegmentMessage};
use crate::state_transfer::{StateTransferActor, StateTransferMessage, StateTransferOutcome};
use crate::validator::MessageValidator;

pub type ConsensusHandle = ActorHandle<ConsensusEvent>;

/// Everything `deliver` can be called with (spec.md §4.1).
pub enum ConsensusEvent {
    Start,
    NewEpochTopology {
        epoch: EpochNumber,
        topology: OrderingTopology,
        crypto: Arc<dyn CryptoProvider>,
    },
    NewEpochStored {
        info: EpochInfo,
    },
    CompleteEpochStored {
        epoch: EpochNumber,
    },
    BlockOrdered {
        epoch: EpochNumber,
        block: OrderedBlock,
        provenance: Provenance,
    },
    AsyncException(String),
    /// A PBFT message straight off the wire, signature not yet checked.
    Unverified(UnverifiedMessage),
    /// A PBFT message the validator already vouched for.
    Verified(VerifiedMessage),
    /// A locally-produced payload is ready for `block` (spec.md §4.3
    /// `proposalCreated`).
    ProposalCreated {
        epoch: EpochNumber,
        block: BlockNumber,
        payload: Bytes,
    },
    StateTransferOutcome(StateTransferOutcome),
    /// A peer is known to be at `epoch`, observed either from a
    /// future-epoch PBFT message or a state-transfer exchange (spec.md
    /// §4.5 `latestKnownPeerEpoch`).
    PeerEpochObserved {
        peer: PeerId,
        epoch: EpochNumber,
    },
}

pub struct ConsensusActor {
    context: Context,
    self_handle: ConsensusHandle,

    epoch_store: Arc<dyn EpochStore>,
    network: Arc<dyn Network>,
    output_sink: Arc<dyn OutputSink>,
    validator: Arc<MessageValidator>,
    state_transfer: ActorHandle<StateTransferMessage>,
    admin: Arc<AdminSnapshot>,

    /// Epoch info and crypto provider of whatever epoch is presently
    /// installed (or was, before catch-up paused live PBFT).
    current_epoch_info: EpochInfo,
    epoch_crypto: Arc<dyn CryptoProvider>,
    latest_completed: EpochNumber,

    /// `None` while waiting for `NewEpochTopology`, during catch-up, or
    /// between `CompleteEpochStored` and the next epoch's installation.
    epoch_state: Option<EpochState>,

    /// A `NewEpochTopology(nᵢ, …)` received while `latestCompleted < nᵢ − 1`
    /// (spec.md §4.1 "remember as pending").
    pending_topology: Option<(EpochNumber, OrderingTopology, Arc<dyn CryptoProvider>)>,
    /// Topology and crypto provider of an epoch whose `startEpoch` has been
    /// issued but whose `NewEpochStored` has not yet come back (spec.md §5:
    /// ordering enforced by the `pipeToSelf` pattern). Kept separate from
    /// `context.membership` so the old epoch's membership checks are not
    /// disturbed while `startEpoch` is in flight.
    pending_install: Option<(OrderingTopology, Arc<dyn CryptoProvider>)>,

    future_queue: FutureMessageQueue,
    catchup: CatchupDetector,
    in_catchup: bool,
}

impl ConsensusActor {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        context: Context,
        initial_epoch_info: EpochInfo,
        epoch_crypto: Arc<dyn CryptoProvider>,
        epoch_store: Arc<dyn EpochStore>,
        network: Arc<dyn Network>,
        output_sink: Arc<dyn OutputSink>,
        state_transfer_transport: Arc<dyn StateTransferTransport>,
        block_store: Arc<dyn BlockStore>,
        history: Arc<dyn EpochTopologyHistory>,
        admin: Arc<AdminSnapshot>,
    ) -> ConsensusHandle {
        let own_peer = context.own_peer();
        let metrics = context.metrics.clone();
        let catchup_threshold = context.parameters.catchup_threshold_epochs;
        let max_forward_time_drift = context.parameters.max_forward_time_drift;
        let store_for_transfer = epoch_store.clone();

        spawn_with_self(move |self_handle| {
            let state_transfer = StateTransferActor::spawn(
                own_peer,
                state_transfer_transport,
                store_for_transfer,
                block_store,
                history,
                self_handle.clone(),
                metrics.clone(),
                max_forward_time_drift,
            );
            ConsensusActor {
                context,
                self_handle,
                epoch_store,
                network,
                output_sink,
                validator: Arc::new(MessageValidator::new(metrics, max_forward_time_drift)),
                state_transfer,
                admin,
                current_epoch_info: initial_epoch_info,
                epoch_crypto,
                latest_completed: 0,
                epoch_state: None,
                pending_topology: None,
                pending_install: None,
                future_queue: FutureMessageQueue::new(),
                catchup: CatchupDetector::new(catchup_threshold),
                in_catchup: false,
            }
        })
    }

    fn fatal(&self, reason: impl std::fmt::Display) {
        tracing::error!(%reason, "fatal consensus error; terminating node");
        std::process::exit(1);
    }

    async fn on_start(&mut self) {
        let latest = match self.epoch_store.latest_completed_epoch().await {
            Ok(latest) => latest,
            Err(err) => return self.fatal(format!("failed to read latestCompletedEpoch: {err}")),
        };
        self.latest_completed = latest.info.number;

        let onboarding = latest.info.is_genesis()
            && self.context.membership.has_other_peers()
            && self.current_epoch_info.is_genesis();
        if onboarding {
            tracing::info!("no local epoch history but peers exist; onboarding via state transfer");
            self.start_state_transfer(1, None).await;
            return;
        }

        if self.current_epoch_info.is_genesis() {
            let topology = self.context.membership.topology.clone();
            let crypto = self.epoch_crypto.clone();
            self.self_handle
                .tell(ConsensusEvent::NewEpochTopology {
                    epoch: 0,
                    topology,
                    crypto,
                })
                .await
                .ok();
            return;
        }

        if self.current_epoch_info.number > self.latest_completed {
            let topology = self.context.membership.topology.clone();
            let crypto = self.epoch_crypto.clone();
            self.install_epoch(self.current_epoch_info, topology, crypto, true).await;
        }
        // Else: completed but the next epoch's topology has not arrived yet; wait.
    }

    async fn on_new_epoch_topology(
        &mut self,
        n: EpochNumber,
        topology: OrderingTopology,
        crypto: Arc<dyn CryptoProvider>,
    ) {
        let current = self.current_epoch_info.number;
        let prev = n.saturating_sub(1);

        if self.latest_completed == prev && current == prev {
            let next_info = self
                .current_epoch_info
                .next(self.context.parameters.epoch_length, topology.activation_time());
            self.pending_install = Some((topology, crypto));
            if let Err(err) = self.epoch_store.start_epoch(next_info).await {
                return self.fatal(format!("startEpoch persistence failed: {err}"));
            }
            self.self_handle
                .tell(ConsensusEvent::NewEpochStored { info: next_info })
                .await
                .ok();
        } else if self.latest_completed == prev && current == n {
            tracing::debug!(epoch = n, "duplicate NewEpochTopology after restart; ignored");
        } else if self.latest_completed < prev {
            self.pending_topology = Some((n, topology, crypto));
        } else if self.latest_completed >= n {
            tracing::debug!(epoch = n, "stale NewEpochTopology replay; ignored");
        } else {
            self.fatal(format!(
                "protocol-impossible state: NewEpochTopology({n}) with latestCompleted=\
                 {} current={current}",
                self.latest_completed
            ));
        }
    }

    async fn on_new_epoch_stored(&mut self, info: EpochInfo) {
        let (topology, crypto) = self.pending_install.take().unwrap_or_else(|| {
            (self.context.membership.topology.clone(), self.epoch_crypto.clone())
        });
        self.install_epoch(info, topology, crypto, false).await;
        self.drain_future_queue().await;
    }

    async fn on_complete_epoch_stored(&mut self, epoch: EpochNumber) {
        self.latest_completed = epoch;
        self.epoch_state = None;

        if let Some((n, topology, crypto)) = self.pending_topology.take() {
            if n == epoch + 1 {
                self.on_new_epoch_topology(n, topology, crypto).await;
            } else {
                self.pending_topology = Some((n, topology, crypto));
            }
        }
    }

    async fn install_epoch(
        &mut self,
        info: EpochInfo,
        topology: OrderingTopology,
        crypto: Arc<dyn CryptoProvider>,
        recover: bool,
    ) {
        self.validator.bind_epoch(info.number, crypto.clone());
        self.validator.forget_epochs_before(info.number.saturating_sub(1));
        self.epoch_crypto = crypto.clone();
        self.current_epoch_info = info;
        self.context = self.context.clone().with_membership(Membership::new(
            self.context.own_peer(),
            topology.clone(),
        ));
        self.context.metrics.current_epoch.set(info.number as i64);
        self.admin.publish(
            info.number,
            topology.peers().iter().map(|p| p.id).collect(),
        );

        let segments = segments_for_epoch(&info, &topology);
        let mut handles = Vec::with_capacity(segments.len());
        for segment in &segments {
            handles.push(SegmentActor::spawn(
                segment.clone(),
                &self.context,
                self.network.clone(),
                crypto.clone(),
                self.self_handle.clone(),
            ));
        }
        let mut state = EpochState::new(info, segments, handles);

        if recover {
            match self.epoch_store.epoch_in_progress(info.number).await {
                Ok(in_progress) => {
                    state.mark_recovered(&in_progress.completed_blocks);
                    for handle in state.handles() {
                        handle.tell(SegmentMessage::Recover(in_progress.clone())).await.ok();
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, epoch = info.number, "failed to read epochInProgress");
                }
            }
        }

        self.epoch_state = Some(state);
        self.maybe_complete_epoch().await;
    }

    async fn maybe_complete_epoch(&mut self) {
        let Some(state) = &self.epoch_state else { return };
        if !state.is_complete() {
            return;
        }
        let epoch = state.info().number;
        let commits = state.last_block_commits();
        if let Err(err) = self.epoch_store.complete_epoch(epoch, commits).await {
            return self.fatal(format!("completeEpoch persistence failed: {err}"));
        }
        self.self_handle
            .tell(ConsensusEvent::CompleteEpochStored { epoch })
            .await
            .ok();
    }

    async fn on_block_ordered(&mut self, epoch: EpochNumber, mut block: OrderedBlock, provenance: Provenance) {
        if epoch != self.current_epoch_info.number {
            // Delivered by state transfer, which has already persisted it
            // via `EpochStore.completeEpoch` itself; just forward.
            self.output_sink
                .deliver(OrderedBlockForOutput { block, provenance })
                .await;
            return;
        }

        let commits = block.commit_certificate.commits.clone();
        let is_last = match &mut self.epoch_state {
            Some(state) => {
                let is_last = state.is_last_block(block.metadata.block);
                state.record_block_ordered(block.metadata.block, &commits);
                is_last
            }
            None => false,
        };
        block.is_last_in_epoch = is_last;
        self.output_sink
            .deliver(OrderedBlockForOutput { block, provenance })
            .await;
        self.maybe_complete_epoch().await;
    }

    async fn on_unverified(&mut self, message: UnverifiedMessage) {
        match self.validator.verify_unverified(message).await {
            Ok(verified) => {
                self.self_handle.tell(ConsensusEvent::Verified(verified)).await.ok();
            }
            Err(err) => {
                tracing::debug!(error = %err, "dropping message that failed validation");
            }
        }
    }

    async fn on_verified(&mut self, message: VerifiedMessage) {
        let meta = message.inner().metadata;
        let sender = message.inner().sender;
        let current = self.current_epoch_info.number;

        if meta.epoch < current {
            return; // stale; discard silently
        }
        if meta.epoch > current {
            self.future_queue.push(message);
            self.catchup.observe(sender, meta.epoch);
            if !self.in_catchup
                && self
                    .catchup
                    .should_catch_up(current, self.context.membership.weak_quorum())
            {
                self.enter_catchup().await;
            }
            return;
        }
        if !self.current_epoch_info.contains_block(meta.block) {
            self.context
                .metrics
                .non_compliance_total
                .with_label_values(&["out_of_bounds_block"])
                .inc();
            return;
        }
        if !self.context.membership.is_member(sender) {
            self.context
                .metrics
                .non_compliance_total
                .with_label_values(&["out_of_topology_sender"])
                .inc();
            return;
        }
        if let Some(state) = &self.epoch_state {
            state.deliver(meta.block, SegmentMessage::Deliver(message)).await.ok();
        }
    }

    async fn on_proposal_created(&mut self, epoch: EpochNumber, block: BlockNumber, payload: Bytes) {
        if epoch != self.current_epoch_info.number {
            return;
        }
        if let Some(state) = &self.epoch_state {
            state.propose(block, payload).await.ok();
        }
    }

    async fn drain_future_queue(&mut self) {
        let ready = self.future_queue.drain_ready(self.current_epoch_info.number);
        for message in ready {
            self.on_verified(message).await;
        }
    }

    async fn start_state_transfer(&self, from_epoch: EpochNumber, up_to_epoch: Option<EpochNumber>) {
        self.state_transfer
            .tell(StateTransferMessage::FetchFrom {
                from_epoch,
                up_to_epoch: up_to_epoch.unwrap_or(from_epoch),
                membership: self.context.membership.clone(),
            })
            .await
            .ok();
    }

    async fn enter_catchup(&mut self) {
        tracing::info!(current = self.current_epoch_info.number, "entering catch-up behavior");
        self.in_catchup = true;
        self.context
            .metrics
            .catchups_triggered_total
            .with_label_values(&["threshold_exceeded"])
            .inc();
        // Live PBFT is paused; the future-queue is preserved as-is.
        self.epoch_state = None;
        // `highest_known_epoch` is a peer's *current* epoch, which is not
        // itself complete yet; the highest epoch we can actually fetch is
        // the one before it.
        let target = self
            .catchup
            .highest_known_epoch()
            .map(|h| h.saturating_sub(1))
            .unwrap_or(self.current_epoch_info.number);
        self.start_state_transfer(self.current_epoch_info.number, Some(target)).await;
    }

    /// Advances `current_epoch_info` past a just-completed state-transfer
    /// target so live consensus resumes at the right epoch (spec.md §4.4
    /// "Result variants": `Completed(finalEpoch)` means epochs up to and
    /// including `finalEpoch` are now locally durable).
    fn advance_past_transferred_epoch(&mut self, final_epoch: EpochNumber) {
        let length = self.context.parameters.epoch_length;
        let activation_time = self.context.membership.topology.activation_time();
        while self.current_epoch_info.number <= final_epoch {
            self.current_epoch_info = self.current_epoch_info.next(length, activation_time);
        }
    }

    async fn exit_catchup(&mut self) {
        tracing::info!(current = self.current_epoch_info.number, "resuming live consensus after catch-up");
        self.in_catchup = false;
        let topology = self.context.membership.topology.clone();
        let crypto = self.epoch_crypto.clone();
        self.install_epoch(self.current_epoch_info, topology, crypto, true).await;
        self.drain_future_queue().await;
    }

    async fn on_state_transfer_outcome(&mut self, outcome: StateTransferOutcome) {
        match outcome {
            StateTransferOutcome::Continue => {}
            StateTransferOutcome::NothingToTransfer => {
                if self.in_catchup {
                    self.exit_catchup().await;
                }
            }
            StateTransferOutcome::Completed { final_epoch } => {
                self.latest_completed = self.latest_completed.max(final_epoch);
                if self.in_catchup {
                    self.advance_past_transferred_epoch(final_epoch);
                    self.exit_catchup().await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Actor for ConsensusActor {
    type Message = ConsensusEvent;

    async fn handle(&mut self, message: Self::Message) {
        match message {
            ConsensusEvent::Start => self.on_start().await,
            ConsensusEvent::NewEpochTopology { epoch, topology, crypto } => {
                self.on_new_epoch_topology(epoch, topology, crypto).await
            }
            ConsensusEvent::NewEpochStored { info } => self.on_new_epoch_stored(info).await,
            ConsensusEvent::CompleteEpochStored { epoch } => self.on_complete_epoch_stored(epoch).await,
            ConsensusEvent::BlockOrdered { epoch, block, provenance } => {
                self.on_block_ordered(epoch, block, provenance).await
            }
            ConsensusEvent::AsyncException(reason) => self.fatal(reason),
            ConsensusEvent::Unverified(message) => self.on_unverified(message).await,
            ConsensusEvent::Verified(message) => self.on_verified(message).await,
            ConsensusEvent::ProposalCreated { epoch, block, payload } => {
                self.on_proposal_created(epoch, block, payload).await
            }
            ConsensusEvent::StateTransferOutcome(outcome) => self.on_state_transfer_outcome(outcome).await,
            ConsensusEvent::PeerEpochObserved { peer, epoch } => self.catchup.observe(peer, epoch),
        }
    }
}
