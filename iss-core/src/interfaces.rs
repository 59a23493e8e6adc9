// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! External collaborators the core consumes (spec.md §6). Persistent
//! storage, signing, transport and output delivery are all out of scope
//! (spec.md §1); these traits are the seam, mirroring how
//! `consensus-core::block_verifier::BlockVerifier` and
//! `consensus-core::network::NetworkClient` are consumed as `Arc<dyn _>`
//! rather than implemented in this crate.

use std::sync::Arc;

use async_trait::async_trait;
use iss_config::{OrderingTopology, PeerId};
use iss_types::{
    BlockNumber, BlockTransferRequest, BlockTransferResponse, CompletedEpoch, ConsensusMessage,
    EpochInfo, EpochNumber, OrderedBlock,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("storage operation failed: {0}")]
pub struct StorageError(pub String);

/// PBFT messages recorded for a block that has not yet completed, plus the
/// set of already-completed block numbers, as needed to reconstruct a
/// Segment Module after a crash (spec.md §4.2 "In-progress recovery",
/// §6 `epochInProgress`).
#[derive(Clone, Default)]
pub struct EpochInProgress {
    pub completed_blocks: Vec<BlockNumber>,
    pub pbft_messages_for_incomplete_blocks: Vec<ConsensusMessage>,
}

/// Persistent epoch store (spec.md §6). `startEpoch` must be durable
/// before the `NewEpochStored` event is acted upon; `completeEpoch` must
/// be durable before `CompleteEpochStored` is acted upon (spec.md §5).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EpochStore: Send + Sync + 'static {
    async fn start_epoch(&self, info: EpochInfo) -> Result<(), StorageError>;

    async fn complete_epoch(
        &self,
        epoch: EpochNumber,
        last_block_commits: Vec<ConsensusMessage>,
    ) -> Result<(), StorageError>;

    async fn latest_completed_epoch(&self) -> Result<CompletedEpoch, StorageError>;

    async fn epoch_in_progress(
        &self,
        epoch: EpochNumber,
    ) -> Result<EpochInProgress, StorageError>;
}

/// Signing/verification capability bound to one epoch; keys may change
/// across epochs (spec.md §6).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CryptoProvider: Send + Sync + 'static {
    async fn sign(&self, bytes: &[u8]) -> Vec<u8>;

    async fn verify(&self, bytes: &[u8], signature: &[u8], peer: PeerId) -> Result<(), ()>;
}

/// Network transport (spec.md §6). `broadcast` sends to every peer in the
/// active topology excluding self.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Network: Send + Sync + 'static {
    async fn send(&self, peer: PeerId, message: ConsensusMessage);

    async fn broadcast(&self, message: ConsensusMessage);
}

/// Receives decided blocks and determines the next epoch's membership
/// (spec.md §6).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutputSink: Send + Sync + 'static {
    async fn deliver(&self, output: iss_types::OrderedBlockForOutput);
}

/// Exposed admin probe (spec.md §6).
pub trait AdminProbe: Send + Sync + 'static {
    fn get_ordering_topology(&self) -> (EpochNumber, Vec<PeerId>);
}

/// Transport for the State-Transfer Manager's request/response exchange
/// (spec.md §4.4). Kept distinct from `Network` because these are not PBFT
/// messages and do not go through the bit-exact wire envelope of spec.md §6.
#[async_trait]
pub trait StateTransferTransport: Send + Sync + 'static {
    async fn request(&self, peer: PeerId, request: BlockTransferRequest);

    async fn respond(&self, peer: PeerId, response: BlockTransferResponse);
}

/// Resolves the topology and crypto provider of a historical (not
/// necessarily current) epoch, needed to verify a transferred epoch's
/// commit certificate (spec.md §4.4: "valid under the topology of epoch
/// `e`"). `EpochStore` only exposes the latest/in-progress epoch, not
/// arbitrary historical ones, so this is a distinct interface.
#[async_trait]
pub trait EpochTopologyHistory: Send + Sync + 'static {
    async fn topology_for(&self, epoch: EpochNumber) -> Option<(OrderingTopology, Arc<dyn CryptoProvider>)>;
}

/// Reads back the payloads and certificates of a completed epoch's blocks,
/// needed to serve `BlockTransferRequest`s (spec.md §4.4 "Server"). Kept
/// separate from `EpochStore`, which only tracks completion, not bodies.
#[async_trait]
pub trait BlockStore: Send + Sync + 'static {
    async fn blocks_for_epoch(&self, epoch: EpochNumber) -> Result<Vec<OrderedBlock>, StorageError>;
}
