// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Segment Module (spec.md §4.2): runs one instance of PBFT per segment
//! owned by each leader.

mod actor;
mod core;

pub use actor::{SegmentActor, SegmentMessage};
pub use core::{Effect, SegmentCore, SlotPhase};
