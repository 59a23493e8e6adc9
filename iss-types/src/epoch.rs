// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use iss_config::{PeerId, TimestampMicros};

/// Epoch number; Genesis is epoch 0.
pub type EpochNumber = u64;

/// A block slot number, unique within an epoch and, together with the
/// epoch number, unique across all history.
pub type BlockNumber = u64;

/// View number used by PBFT within a segment to rotate leaders on failure.
pub type View = u64;

/// (epoch number, start block number, length, activation time).
///
/// Invariant: `epoch(k+1).start = epoch(k).start + epoch(k).length`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochInfo {
    pub number: EpochNumber,
    pub start_block: BlockNumber,
    pub length: u64,
    pub activation_time: TimestampMicros,
}

impl EpochInfo {
    /// The Genesis epoch: number 0, no blocks, empty topology activation.
    pub fn genesis() -> Self {
        Self {
            number: 0,
            start_block: 0,
            length: 0,
            activation_time: 0,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.number == 0
    }

    /// The half-open range of block slots `[start, start+length)` this
    /// epoch owns.
    pub fn block_range(&self) -> std::ops::Range<BlockNumber> {
        self.start_block..(self.start_block + self.length)
    }

    pub fn contains_block(&self, block: BlockNumber) -> bool {
        self.block_range().contains(&block)
    }

    pub fn next(&self, next_length: u64, activation_time: TimestampMicros) -> EpochInfo {
        EpochInfo {
            number: self.number + 1,
            start_block: self.start_block + self.length,
            length: next_length,
            activation_time,
        }
    }
}

/// A contiguous subset of block slots within an epoch assigned to a single
/// original leader. Segments partition `[epoch.start, epoch.start+epoch.length)`.
///
/// Not `Copy`: `blocks` is a `Range`, which stdlib deliberately keeps
/// non-`Copy` since it implements `Iterator` (iterating a copy would silently
/// diverge from iterating the original).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub epoch: EpochNumber,
    pub original_leader: PeerId,
    pub blocks: std::ops::Range<BlockNumber>,
}

impl Segment {
    pub fn owns(&self, block: BlockNumber) -> bool {
        self.blocks.contains(&block)
    }
}

/// Unique identifier of a block before it is decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub epoch: EpochNumber,
    pub block: BlockNumber,
}

impl BlockMetadata {
    pub fn new(epoch: EpochNumber, block: BlockNumber) -> Self {
        Self { epoch, block }
    }
}
