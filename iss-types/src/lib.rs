// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wire types for the ISS consensus core: block/epoch metadata, the PBFT
//! message envelope and its tagged payload variants, and the bit-exact
//! wire encoding (spec.md §3, §6).

mod digest;
mod epoch;
mod errors;
mod message;
mod transfer;
pub mod wire;

pub use digest::PayloadDigest;
pub use epoch::{BlockMetadata, BlockNumber, EpochInfo, EpochNumber, Segment, View};
pub use errors::ParseError;
pub use message::{
    Commit, CommitCertificate, CompletedEpoch, ConsensusMessage, NewView, OrderedBlock,
    OrderedBlockForOutput, PbftMessageKind, PbftPayload, PbftPayloadApi, PrePrepare, Prepare,
    PreparedCertificate, Provenance, UnverifiedMessage, VerifiedMessage, ViewChange,
};
pub use transfer::{BlockTransferRequest, BlockTransferResponse};
