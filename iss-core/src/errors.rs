// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use iss_config::{PeerId, TimestampMicros};
use iss_types::{BlockNumber, EpochNumber, View};
use thiserror::Error;

/// Errors raised while validating an inbound message (spec.md §4.6, §7).
///
/// Each variant corresponds to one row of the disposition table in
/// spec.md §7, naming the offending values the way
/// `consensus-core::block_verifier::ConsensusError` names them
/// (`WrongEpoch { expected, actual }`, `InvalidAuthorityIndex { .. }`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidatorError {
    #[error("failed to parse message: {0}")]
    Malformed(#[from] iss_types::ParseError),
    #[error("signature invalid for sender {sender} at epoch {epoch}")]
    InvalidSignature { sender: PeerId, epoch: EpochNumber },
    #[error("sender {sender} is not a member of the topology for epoch {epoch}")]
    OutOfTopology { sender: PeerId, epoch: EpochNumber },
    #[error("no crypto provider bound for epoch {0}")]
    UnknownEpoch(EpochNumber),
    #[error("message from {sender} timestamped {timestamp} is too far in the future")]
    ForwardClockDrift { sender: PeerId, timestamp: TimestampMicros },
}

/// Errors raised by the Consensus Module's dispatch logic (spec.md §4.1, §7).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("block {block} at epoch {epoch} is out of the epoch's segment range")]
    BlockOutOfRange { epoch: EpochNumber, block: BlockNumber },
    #[error("sender {sender} is not a member of the topology for epoch {epoch}")]
    SenderOutOfTopology { sender: PeerId, epoch: EpochNumber },
    #[error(
        "protocol-impossible state: epoch topology for {new_epoch} arrived with \
         latestCompleted={latest_completed} current={current}"
    )]
    InvariantViolation {
        new_epoch: EpochNumber,
        latest_completed: EpochNumber,
        current: EpochNumber,
    },
    #[error("storage operation failed: {0}")]
    StorageFailure(String),
}

/// Errors raised inside a Segment Module's PBFT state machine (spec.md §4.2).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    #[error("block {block} is not owned by this segment")]
    BlockNotOwned { block: BlockNumber },
    #[error("view {got} is stale, current view for block {block} is {current}")]
    StaleView {
        block: BlockNumber,
        current: View,
        got: View,
    },
    #[error("pre-prepare for block {block} view {view} already seen with a different digest")]
    ConflictingPrePrepare { block: BlockNumber, view: View },
    #[error("new-view certificate for view {view} failed verification: {reason}")]
    InvalidNewView { view: View, reason: String },
}

/// Errors raised by the State-Transfer Manager (spec.md §4.4).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateTransferError {
    #[error("commit certificate in response for epoch {0} failed verification")]
    InvalidCertificate(EpochNumber),
    #[error("response for epoch {0} is missing blocks covered by its certificate")]
    IncompleteResponse(EpochNumber),
    #[error("no responder available in the weak quorum")]
    NoResponder,
}
