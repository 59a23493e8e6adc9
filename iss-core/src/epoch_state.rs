// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Epoch State (spec.md §4.3): aggregates the Segment Modules running for
//! one epoch, tracks which block numbers have completed, and routes
//! locally-created payloads to the segment that owns them. Unlike the
//! Consensus Module, Segment Modules and the State-Transfer Manager, this
//! is plain data owned by the Consensus actor rather than an actor of its
//! own (spec.md §9 names only those three as actors).

use std::collections::BTreeSet;

use bytes::Bytes;

use iss_types::{BlockNumber, ConsensusMessage, EpochInfo, Segment};

use crate::errors::ConsensusError;
use crate::segment::SegmentMessage;
use crate::actor::ActorHandle;

pub struct EpochState {
    info: EpochInfo,
    segments: Vec<Segment>,
    handles: Vec<ActorHandle<SegmentMessage>>,
    completed: BTreeSet<BlockNumber>,
    last_block_commits: Vec<ConsensusMessage>,
}

impl EpochState {
    pub fn new(info: EpochInfo, segments: Vec<Segment>, handles: Vec<ActorHandle<SegmentMessage>>) -> Self {
        Self {
            info,
            segments,
            handles,
            completed: BTreeSet::new(),
            last_block_commits: Vec::new(),
        }
    }

    pub fn info(&self) -> &EpochInfo {
        &self.info
    }

    fn segment_handle(&self, block: BlockNumber) -> Option<&ActorHandle<SegmentMessage>> {
        self.segments
            .iter()
            .position(|s| s.owns(block))
            .map(|i| &self.handles[i])
    }

    /// Routes a verified PBFT message to the segment that owns its block
    /// (spec.md §4.1 dispatch table, last row).
    pub async fn deliver(&self, block: BlockNumber, message: SegmentMessage) -> Result<(), ConsensusError> {
        let handle = self.segment_handle(block).ok_or(ConsensusError::BlockOutOfRange {
            epoch: self.info.number,
            block,
        })?;
        handle.tell(message).await.ok();
        Ok(())
    }

    /// Routes a locally-created payload to the segment owning `block`
    /// (spec.md §4.3 `proposalCreated`).
    pub async fn propose(&self, block: BlockNumber, payload: Bytes) -> Result<(), ConsensusError> {
        self.deliver(block, SegmentMessage::Propose { block, payload }).await
    }

    /// Records a block reported by a Segment Module. Returns `true` once
    /// every block of the epoch has completed (spec.md §4.3 "signals epoch
    /// completion when `|completed| = length`").
    pub fn record_block_ordered(&mut self, block: BlockNumber, commits: &[ConsensusMessage]) -> bool {
        self.completed.insert(block);
        if self.is_last_block(block) {
            self.last_block_commits = commits.to_vec();
        }
        self.is_complete()
    }

    pub fn is_last_block(&self, block: BlockNumber) -> bool {
        block + 1 == self.info.start_block + self.info.length
    }

    pub fn is_complete(&self) -> bool {
        self.completed.len() as u64 == self.info.length
    }

    pub fn completed_blocks(&self) -> Vec<BlockNumber> {
        self.completed.iter().copied().collect()
    }

    pub fn last_block_commits(&self) -> Vec<ConsensusMessage> {
        self.last_block_commits.clone()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn handles(&self) -> &[ActorHandle<SegmentMessage>] {
        &self.handles
    }

    /// Marks blocks already decided before this run, read back from a
    /// persisted `EpochInProgress` (spec.md §4.2 "In-progress recovery").
    /// Does not reconstruct `last_block_commits`: `EpochInProgress` carries
    /// only completed block numbers and messages for incomplete blocks, not
    /// the last block's commit set, so a node that crashes after deciding
    /// the epoch's final block but before `CompleteEpochStored` persists an
    /// empty commit list for it (see DESIGN.md).
    pub fn mark_recovered(&mut self, completed_blocks: &[BlockNumber]) {
        for &block in completed_blocks {
            self.completed.insert(block);
        }
    }
}
