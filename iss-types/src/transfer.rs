// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Block-transfer request/response pair exchanged by the State-Transfer
//! Manager (spec.md §4.4). Unlike `ConsensusMessage`, these are not part of
//! the bit-exact wire envelope specified in spec.md §6 (that section scopes
//! "wire-format details" to the PBFT message envelope only); they are
//! ordinary `bcs`-serialized values, the same way `consensus-core::commit_syncer`
//! exchanges `CommitRange`/`GetLatestCommitRequest` outside the block wire
//! format.

use serde::{Deserialize, Serialize};

use iss_config::PeerId;

use crate::epoch::EpochNumber;
use crate::message::{CommitCertificate, OrderedBlock};

#[derive(Clone, Serialize, Deserialize)]
pub struct BlockTransferRequest {
    pub from_epoch: EpochNumber,
    pub requester: PeerId,
}

/// One completed epoch's blocks plus the commit certificate anchoring its
/// last block (spec.md §4.4). Self-authenticating: a recipient that
/// independently knows epoch `epoch`'s topology can verify `commit_certificate`
/// without trusting the sender.
#[derive(Clone, Serialize, Deserialize)]
pub struct BlockTransferResponse {
    pub epoch: EpochNumber,
    pub blocks: Vec<OrderedBlock>,
    pub commit_certificate: CommitCertificate,
}
