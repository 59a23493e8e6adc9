// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Ordered queue of verified PBFT messages whose epoch number exceeds the
//! local current epoch (spec.md §3 "Future-Message Queue", §4.1).

use std::collections::VecDeque;

use iss_types::{EpochNumber, VerifiedMessage};

#[derive(Default)]
pub struct FutureMessageQueue {
    messages: VecDeque<VerifiedMessage>,
}

impl FutureMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: VerifiedMessage) {
        self.messages.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drains messages whose epoch is now `<= current_epoch` (they became
    /// actionable, or are stale and about to be discarded by the caller),
    /// leaving messages for epochs still ahead in the queue. Called on
    /// every epoch advance (spec.md §4.1).
    pub fn drain_ready(&mut self, current_epoch: EpochNumber) -> Vec<VerifiedMessage> {
        let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.messages)
            .into_iter()
            .partition(|m| m.inner().metadata.epoch <= current_epoch);
        self.messages = pending.into();
        ready
    }
}
