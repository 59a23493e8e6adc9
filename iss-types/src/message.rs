// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

use iss_config::{PeerId, TimestampMicros};

use crate::digest::PayloadDigest;
use crate::epoch::{BlockMetadata, EpochInfo, View};

/// A PBFT message, fully parsed and still carrying its signature envelope.
/// `spec.md` §3's "PBFT Message": tagged variant, block metadata, view,
/// timestamp, sender, signature envelope.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConsensusMessage {
    pub metadata: BlockMetadata,
    pub view: View,
    pub sender: PeerId,
    pub timestamp: TimestampMicros,
    pub payload: PbftPayload,
    pub signature: Bytes,
}

impl ConsensusMessage {
    /// The bytes that the signature is computed over: everything except
    /// the signature itself.
    pub fn signable_bytes(&self) -> Vec<u8> {
        #[derive(Serialize)]
        struct Signable<'a> {
            metadata: &'a BlockMetadata,
            view: View,
            sender: PeerId,
            timestamp: TimestampMicros,
            payload: &'a PbftPayload,
        }
        bcs::to_bytes(&Signable {
            metadata: &self.metadata,
            view: self.view,
            sender: self.sender,
            timestamp: self.timestamp,
            payload: &self.payload,
        })
        .expect("message serialization should not fail")
    }
}

/// A message as received from the network: signature not yet checked.
#[derive(Clone, Serialize, Deserialize)]
pub struct UnverifiedMessage(pub ConsensusMessage);

/// A message whose signature has been checked against the sender's key for
/// the message's epoch. Only `MessageValidator` should construct one.
#[derive(Clone, Serialize, Deserialize)]
pub struct VerifiedMessage(ConsensusMessage);

impl VerifiedMessage {
    /// Marks a message as verified. Callers outside `MessageValidator`
    /// must not call this without having actually checked the signature.
    pub fn new_verified(message: ConsensusMessage) -> Self {
        Self(message)
    }

    pub fn inner(&self) -> &ConsensusMessage {
        &self.0
    }

    pub fn into_inner(self) -> ConsensusMessage {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PbftMessageKind {
    PrePrepare,
    Prepare,
    Commit,
    ViewChange,
    NewView,
}

impl std::fmt::Display for PbftMessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PbftMessageKind::PrePrepare => "pre_prepare",
            PbftMessageKind::Prepare => "prepare",
            PbftMessageKind::Commit => "commit",
            PbftMessageKind::ViewChange => "view_change",
            PbftMessageKind::NewView => "new_view",
        };
        write!(f, "{s}")
    }
}

#[enum_dispatch]
pub trait PbftPayloadApi {
    fn kind(&self) -> PbftMessageKind;
}

/// The tagged oneof payload of a PBFT message (spec.md §3, §6).
#[derive(Clone, Serialize, Deserialize)]
#[enum_dispatch(PbftPayloadApi)]
pub enum PbftPayload {
    PrePrepare(PrePrepare),
    Prepare(Prepare),
    Commit(Commit),
    ViewChange(ViewChange),
    NewView(NewView),
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PrePrepare {
    pub digest: PayloadDigest,
    pub payload: Bytes,
}

impl PbftPayloadApi for PrePrepare {
    fn kind(&self) -> PbftMessageKind {
        PbftMessageKind::PrePrepare
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Prepare {
    pub digest: PayloadDigest,
}

impl PbftPayloadApi for Prepare {
    fn kind(&self) -> PbftMessageKind {
        PbftMessageKind::Prepare
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Commit {
    pub digest: PayloadDigest,
}

impl PbftPayloadApi for Commit {
    fn kind(&self) -> PbftMessageKind {
        PbftMessageKind::Commit
    }
}

/// The highest Prepared certificate a peer holds for a block at some view
/// `<= v`, bundled into a `ViewChange` message (spec.md §4.2).
#[derive(Clone, Serialize, Deserialize)]
pub struct PreparedCertificate {
    pub view: View,
    pub digest: PayloadDigest,
    pub pre_prepare: Box<ConsensusMessage>,
    pub prepares: Vec<ConsensusMessage>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ViewChange {
    pub prepared: Option<PreparedCertificate>,
}

impl PbftPayloadApi for ViewChange {
    fn kind(&self) -> PbftMessageKind {
        PbftMessageKind::ViewChange
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct NewView {
    pub view_changes: Vec<ConsensusMessage>,
    pub pre_prepare: Box<ConsensusMessage>,
}

impl PbftPayloadApi for NewView {
    fn kind(&self) -> PbftMessageKind {
        PbftMessageKind::NewView
    }
}

/// At least `2f+1` distinct `Commit` messages for identical
/// `(metadata, view, digest)`; proof of a decision (spec.md §3).
#[derive(Clone, Serialize, Deserialize)]
pub struct CommitCertificate {
    pub metadata: BlockMetadata,
    pub view: View,
    pub digest: PayloadDigest,
    pub commits: Vec<ConsensusMessage>,
}

impl CommitCertificate {
    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

/// A block after consensus decided it (spec.md §3).
#[derive(Clone, Serialize, Deserialize)]
pub struct OrderedBlock {
    pub metadata: BlockMetadata,
    pub payload: Bytes,
    pub original_leader: PeerId,
    pub is_last_in_epoch: bool,
    pub commit_certificate: CommitCertificate,
}

/// Persisted once an epoch's blocks are all completed; anchors the next
/// epoch and marks this one durable (spec.md §3).
#[derive(Clone, Serialize, Deserialize)]
pub struct CompletedEpoch {
    pub info: EpochInfo,
    pub last_block_commits: Vec<ConsensusMessage>,
}

/// Tag distinguishing how a decided block reached the output sink
/// (spec.md §4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    FromConsensus,
    FromStateTransfer,
}

/// What Consensus emits to the output sink for each decided block
/// (spec.md §4.1, §6).
#[derive(Clone, Serialize, Deserialize)]
pub struct OrderedBlockForOutput {
    pub block: OrderedBlock,
    pub provenance: Provenance,
}
