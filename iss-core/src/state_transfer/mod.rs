// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! State-Transfer Manager (spec.md §4.4): client role for onboarding and
//! catch-up, server role for serving completed epochs to lagging peers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use iss_config::{Membership, PeerId};
use iss_types::{BlockTransferRequest, BlockTransferResponse, ConsensusMessage, EpochNumber, Provenance};

use crate::actor::{Actor, ActorHandle};
use crate::consensus::{ConsensusEvent, ConsensusHandle};
use crate::errors::StateTransferError;
use crate::interfaces::{
    BlockStore, EpochStore, EpochTopologyHistory, StateTransferTransport,
};
use crate::validator::MessageValidator;

/// Outcome of the client role, reported back to the Consensus Module
/// (spec.md §4.4 "Result variants").
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateTransferOutcome {
    Continue,
    Completed { final_epoch: EpochNumber },
    NothingToTransfer,
}

pub enum StateTransferMessage {
    /// Start (or resume) fetching epochs `[from_epoch, up_to_epoch]` from a
    /// weak quorum of `membership`.
    FetchFrom {
        from_epoch: EpochNumber,
        up_to_epoch: EpochNumber,
        membership: Membership,
    },
    ResponseReceived {
        from: PeerId,
        response: BlockTransferResponse,
    },
    ServeRequest {
        requester: PeerId,
        request: BlockTransferRequest,
    },
}

pub struct StateTransferActor {
    own_peer: PeerId,
    transport: Arc<dyn StateTransferTransport>,
    epoch_store: Arc<dyn EpochStore>,
    block_store: Arc<dyn BlockStore>,
    history: Arc<dyn EpochTopologyHistory>,
    consensus: ConsensusHandle,
    validator: MessageValidator,

    next_expected: Option<EpochNumber>,
    target: Option<EpochNumber>,
    pending: BTreeMap<EpochNumber, BlockTransferResponse>,
}

impl StateTransferActor {
    pub fn spawn(
        own_peer: PeerId,
        transport: Arc<dyn StateTransferTransport>,
        epoch_store: Arc<dyn EpochStore>,
        block_store: Arc<dyn BlockStore>,
        history: Arc<dyn EpochTopologyHistory>,
        consensus: ConsensusHandle,
        metrics: Arc<crate::metrics::Metrics>,
        max_forward_time_drift: Duration,
    ) -> ActorHandle<StateTransferMessage> {
        let actor = StateTransferActor {
            own_peer,
            transport,
            epoch_store,
            block_store,
            history,
            consensus,
            validator: MessageValidator::new(metrics, max_forward_time_drift),
            next_expected: None,
            target: None,
            pending: BTreeMap::new(),
        };
        crate::actor::spawn(actor)
    }

    async fn start_fetch(&mut self, from_epoch: EpochNumber, up_to_epoch: EpochNumber, membership: Membership) {
        if from_epoch > up_to_epoch {
            self.report(StateTransferOutcome::NothingToTransfer).await;
            return;
        }
        self.next_expected = Some(from_epoch);
        self.target = Some(up_to_epoch);
        self.pending.clear();
        self.request_from_weak_quorum(from_epoch, &membership).await;
    }

    async fn request_from_weak_quorum(&self, from_epoch: EpochNumber, membership: &Membership) {
        let request = BlockTransferRequest {
            from_epoch,
            requester: self.own_peer,
        };
        let peers: Vec<PeerId> = membership
            .topology
            .peers()
            .iter()
            .map(|p| p.id)
            .filter(|id| *id != self.own_peer)
            .take(membership.weak_quorum())
            .collect();
        for peer in peers {
            self.transport.request(peer, request.clone()).await;
        }
    }

    async fn handle_response(&mut self, response: BlockTransferResponse) {
        let Some(next_expected) = self.next_expected else {
            return; // not currently fetching; ignore stray response
        };
        if response.epoch < next_expected {
            return; // already applied
        }
        if let Err(err) = self.validate(&response).await {
            tracing::debug!(error = %err, epoch = response.epoch, "rejecting block-transfer response");
            return;
        }
        self.pending.insert(response.epoch, response);

        while let Some(response) = self.pending.remove(&self.next_expected.unwrap()) {
            self.apply(response).await;
            let next = self.next_expected.unwrap() + 1;
            self.next_expected = Some(next);
            if next > self.target.unwrap() {
                self.report(StateTransferOutcome::Completed {
                    final_epoch: self.target.unwrap(),
                })
                .await;
                self.next_expected = None;
                self.target = None;
                return;
            }
        }
        self.report(StateTransferOutcome::Continue).await;
    }

    async fn validate(&self, response: &BlockTransferResponse) -> Result<(), StateTransferError> {
        let cert = &response.commit_certificate;
        let Some((topology, crypto)) = self.history.topology_for(response.epoch).await else {
            return Err(StateTransferError::NoResponder);
        };
        let f = topology.size().saturating_sub(1) / 3;
        let quorum = 2 * f + 1;
        if cert.commits.len() < quorum {
            return Err(StateTransferError::InvalidCertificate(response.epoch));
        }
        let last_block = response.blocks.iter().map(|b| b.metadata.block).max();
        if last_block != Some(cert.metadata.block) {
            return Err(StateTransferError::IncompleteResponse(response.epoch));
        }
        let mut blocks: Vec<_> = response.blocks.iter().map(|b| b.metadata.block).collect();
        blocks.sort_unstable();
        let contiguous = blocks
            .windows(2)
            .all(|w| w[1] == w[0] + 1);
        if !contiguous {
            return Err(StateTransferError::IncompleteResponse(response.epoch));
        }

        self.validator.bind_epoch(response.epoch, crypto);
        let mut distinct_senders = std::collections::BTreeSet::new();
        for commit in &cert.commits {
            if commit.metadata != cert.metadata || commit.view != cert.view {
                return Err(StateTransferError::InvalidCertificate(response.epoch));
            }
            if !topology.contains(commit.sender) {
                return Err(StateTransferError::InvalidCertificate(response.epoch));
            }
            if self.validator.verify(commit.clone()).await.is_err() {
                return Err(StateTransferError::InvalidCertificate(response.epoch));
            }
            distinct_senders.insert(commit.sender);
        }
        if distinct_senders.len() < quorum {
            return Err(StateTransferError::InvalidCertificate(response.epoch));
        }
        Ok(())
    }

    async fn apply(&mut self, response: BlockTransferResponse) {
        if self
            .epoch_store
            .complete_epoch(response.epoch, response.commit_certificate.commits.clone())
            .await
            .is_err()
        {
            tracing::error!(epoch = response.epoch, "failed to persist state-transferred epoch");
            return;
        }
        for block in response.blocks {
            self.consensus
                .tell(ConsensusEvent::BlockOrdered {
                    epoch: response.epoch,
                    block,
                    provenance: Provenance::FromStateTransfer,
                })
                .await
                .ok();
        }
    }

    async fn report(&self, outcome: StateTransferOutcome) {
        self.consensus
            .tell(ConsensusEvent::StateTransferOutcome(outcome))
            .await
            .ok();
    }

    async fn serve(&self, requester: PeerId, request: BlockTransferRequest) {
        let latest = match self.epoch_store.latest_completed_epoch().await {
            Ok(epoch) => epoch,
            Err(err) => {
                tracing::warn!(error = %err, "cannot serve block-transfer request");
                return;
            }
        };
        let mut epoch = request.from_epoch;
        while epoch <= latest.info.number {
            let blocks = match self.block_store.blocks_for_epoch(epoch).await {
                Ok(blocks) => blocks,
                Err(_) => break,
            };
            if blocks.is_empty() {
                break;
            }
            let last = blocks.iter().map(|b| b.metadata.block).max().unwrap();
            let Some(last_block) = blocks.iter().find(|b| b.metadata.block == last) else {
                break;
            };
            // The last block's own certificate carries the view it was
            // actually decided at; for the in-progress latest epoch the
            // commit set itself comes from `latest_completed_epoch` instead
            // (see `EpochState::mark_recovered`), but the view is the same.
            let commits: Vec<ConsensusMessage> = if epoch == latest.info.number {
                latest.last_block_commits.clone()
            } else {
                last_block.commit_certificate.commits.clone()
            };
            let response = BlockTransferResponse {
                epoch,
                blocks: blocks.clone(),
                commit_certificate: iss_types::CommitCertificate {
                    metadata: iss_types::BlockMetadata::new(epoch, last),
                    view: last_block.commit_certificate.view,
                    digest: last_block.commit_certificate.digest,
                    commits,
                },
            };
            self.transport.respond(requester, response).await;
            epoch += 1;
        }
    }
}

#[async_trait::async_trait]
impl Actor for StateTransferActor {
    type Message = StateTransferMessage;

    async fn handle(&mut self, message: Self::Message) {
        match message {
            StateTransferMessage::FetchFrom {
                from_epoch,
                up_to_epoch,
                membership,
            } => self.start_fetch(from_epoch, up_to_epoch, membership).await,
            StateTransferMessage::ResponseReceived { response, .. } => self.handle_response(response).await,
            StateTransferMessage::ServeRequest { requester, request } => self.serve(requester, request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use iss_config::{OrderingTopology, PeerIdentity, PeerKeyPair};
    use iss_types::{BlockMetadata, Commit, CompletedEpoch, EpochInfo, PayloadDigest, PbftPayload};
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::interfaces::{CryptoProvider, EpochInProgress, StorageError};
    use crate::metrics::Metrics;

    struct StubTransport {
        responded: Mutex<Vec<BlockTransferResponse>>,
    }
    impl StubTransport {
        fn new() -> Self {
            Self { responded: Mutex::new(Vec::new()) }
        }
    }
    #[async_trait]
    impl StateTransferTransport for StubTransport {
        async fn request(&self, _peer: PeerId, _request: BlockTransferRequest) {}
        async fn respond(&self, _peer: PeerId, response: BlockTransferResponse) {
            self.responded.lock().unwrap().push(response);
        }
    }

    struct StubEpochStore {
        latest: CompletedEpoch,
    }
    #[async_trait]
    impl EpochStore for StubEpochStore {
        async fn start_epoch(&self, _info: EpochInfo) -> Result<(), StorageError> {
            Ok(())
        }
        async fn complete_epoch(&self, _epoch: EpochNumber, _commits: Vec<ConsensusMessage>) -> Result<(), StorageError> {
            Ok(())
        }
        async fn latest_completed_epoch(&self) -> Result<CompletedEpoch, StorageError> {
            Ok(self.latest.clone())
        }
        async fn epoch_in_progress(&self, _epoch: EpochNumber) -> Result<EpochInProgress, StorageError> {
            Ok(EpochInProgress::default())
        }
    }

    struct StubBlockStore {
        blocks: Vec<iss_types::OrderedBlock>,
    }
    #[async_trait]
    impl BlockStore for StubBlockStore {
        async fn blocks_for_epoch(&self, _epoch: EpochNumber) -> Result<Vec<iss_types::OrderedBlock>, StorageError> {
            Ok(self.blocks.clone())
        }
    }

    struct NoopHistory;
    #[async_trait]
    impl EpochTopologyHistory for NoopHistory {
        async fn topology_for(&self, _epoch: EpochNumber) -> Option<(OrderingTopology, Arc<dyn CryptoProvider>)> {
            None
        }
    }

    struct AlwaysOkCrypto;
    #[async_trait]
    impl CryptoProvider for AlwaysOkCrypto {
        async fn sign(&self, bytes: &[u8]) -> Vec<u8> {
            bytes.to_vec()
        }
        async fn verify(&self, _bytes: &[u8], _sig: &[u8], _peer: PeerId) -> Result<(), ()> {
            Ok(())
        }
    }

    struct HistoryWithTopology {
        topology: OrderingTopology,
    }
    #[async_trait]
    impl EpochTopologyHistory for HistoryWithTopology {
        async fn topology_for(&self, _epoch: EpochNumber) -> Option<(OrderingTopology, Arc<dyn CryptoProvider>)> {
            Some((self.topology.clone(), Arc::new(AlwaysOkCrypto)))
        }
    }

    struct RecordingConsensus {
        events: std::sync::Arc<Mutex<Vec<String>>>,
    }
    #[async_trait]
    impl Actor for RecordingConsensus {
        type Message = ConsensusEvent;
        async fn handle(&mut self, message: Self::Message) {
            let desc = match message {
                ConsensusEvent::BlockOrdered { epoch, block, provenance } => {
                    format!("block_ordered:{epoch}:{}:{:?}", block.metadata.block, provenance)
                }
                ConsensusEvent::StateTransferOutcome(outcome) => format!("outcome:{outcome:?}"),
                _ => "other".to_string(),
            };
            self.events.lock().unwrap().push(desc);
        }
    }

    fn topology(n: u32) -> OrderingTopology {
        let mut rng = StdRng::from_seed([9; 32]);
        let peers = (0..n)
            .map(|i| PeerIdentity::new(PeerId(i), PeerKeyPair::generate(&mut rng).public()))
            .collect();
        OrderingTopology::new(peers, 0)
    }

    fn sample_block(epoch: EpochNumber, block: BlockNumber, view: u64, digest: PayloadDigest) -> iss_types::OrderedBlock {
        iss_types::OrderedBlock {
            metadata: BlockMetadata::new(epoch, block),
            payload: Bytes::new(),
            original_leader: PeerId(0),
            is_last_in_epoch: true,
            commit_certificate: iss_types::CommitCertificate {
                metadata: BlockMetadata::new(epoch, block),
                view,
                digest,
                commits: Vec::new(),
            },
        }
    }

    fn sample_commit(epoch: EpochNumber, block: BlockNumber, view: u64, sender: PeerId, digest: PayloadDigest) -> ConsensusMessage {
        ConsensusMessage {
            metadata: BlockMetadata::new(epoch, block),
            view,
            sender,
            timestamp: 0,
            payload: PbftPayload::Commit(Commit { digest }),
            signature: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn serve_reports_the_served_block_own_certificate_view_and_digest() {
        // Bug regression: `serve` used to hardcode `view: 0` on every
        // response instead of the served block's own certificate view.
        let digest = PayloadDigest::of(b"the real payload");
        let block = sample_block(5, 0, /* view */ 7, digest);
        let epoch_store = StubEpochStore {
            latest: CompletedEpoch {
                info: EpochInfo { number: 5, start_block: 0, length: 1, activation_time: 0 },
                last_block_commits: vec![sample_commit(5, 0, 7, PeerId(1), digest)],
            },
        };
        let block_store = StubBlockStore { blocks: vec![block] };
        let transport = std::sync::Arc::new(StubTransport::new());

        let handle = StateTransferActor::spawn(
            PeerId(0),
            transport.clone(),
            std::sync::Arc::new(epoch_store),
            std::sync::Arc::new(block_store),
            std::sync::Arc::new(NoopHistory),
            crate::actor::spawn(RecordingConsensus { events: Default::default() }),
            std::sync::Arc::new(Metrics::new_for_test()),
            std::time::Duration::from_millis(500),
        );
        handle
            .tell(StateTransferMessage::ServeRequest {
                requester: PeerId(1),
                request: BlockTransferRequest { from_epoch: 5, requester: PeerId(1) },
            })
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let responses = transport.responded.lock().unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].commit_certificate.view, 7);
        assert_eq!(responses[0].commit_certificate.digest, digest);
    }

    #[tokio::test]
    async fn client_completes_once_a_quorum_certified_contiguous_response_arrives() {
        let topo = topology(4);
        let membership = Membership::new(PeerId(0), topo.clone());
        let digest = PayloadDigest::of(b"epoch 5 payload");
        let commits = vec![
            sample_commit(5, 0, 2, PeerId(1), digest),
            sample_commit(5, 0, 2, PeerId(2), digest),
            sample_commit(5, 0, 2, PeerId(3), digest),
        ];
        let response = BlockTransferResponse {
            epoch: 5,
            blocks: vec![sample_block(5, 0, 2, digest)],
            commit_certificate: iss_types::CommitCertificate {
                metadata: BlockMetadata::new(5, 0),
                view: 2,
                digest,
                commits,
            },
        };

        let events: std::sync::Arc<Mutex<Vec<String>>> = Default::default();
        let epoch_store = StubEpochStore {
            latest: CompletedEpoch { info: EpochInfo::genesis(), last_block_commits: Vec::new() },
        };
        let handle = StateTransferActor::spawn(
            PeerId(0),
            std::sync::Arc::new(StubTransport::new()),
            std::sync::Arc::new(epoch_store),
            std::sync::Arc::new(StubBlockStore { blocks: Vec::new() }),
            std::sync::Arc::new(HistoryWithTopology { topology: topo }),
            crate::actor::spawn(RecordingConsensus { events: events.clone() }),
            std::sync::Arc::new(Metrics::new_for_test()),
            std::time::Duration::from_millis(500),
        );

        handle
            .tell(StateTransferMessage::FetchFrom { from_epoch: 5, up_to_epoch: 5, membership })
            .await
            .unwrap();
        handle
            .tell(StateTransferMessage::ResponseReceived { from: PeerId(1), response })
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let recorded = events.lock().unwrap();
        assert!(recorded.iter().any(|e| e.contains("block_ordered:5:0")));
        assert!(recorded.iter().any(|e| e.contains("Completed") && e.contains("final_epoch: 5")));
    }
}
