// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The ISS consensus core: an epoch-structured PBFT-based ordering protocol
//! with integrated catch-up (state transfer), view change, and
//! epoch-boundary topology reconfiguration. Persistent storage, transport,
//! authentication and configuration loading are out of scope and consumed
//! as `Arc<dyn _>` collaborators through `interfaces`.

mod actor;
mod admin;
mod catchup;
mod consensus;
mod context;
mod epoch_state;
mod errors;
mod future_queue;
mod interfaces;
mod leader_schedule;
mod metrics;
mod segment;
mod state_transfer;
mod validator;

pub use actor::{reply_channel, spawn, spawn_with_self, Actor, ActorHandle, ActorShutdown};
pub use admin::AdminSnapshot;
pub use catchup::CatchupDetector;
pub use consensus::{ConsensusActor, ConsensusEvent, ConsensusHandle};
pub use context::Context;
pub use epoch_state::EpochState;
pub use errors::{ConsensusError, SegmentError, StateTransferError, ValidatorError};
pub use future_queue::FutureMessageQueue;
pub use interfaces::{
    AdminProbe, BlockStore, CryptoProvider, EpochInProgress, EpochStore, EpochTopologyHistory,
    Network, OutputSink, StateTransferTransport, StorageError,
};
pub use leader_schedule::{leader_for_view, segment_for_block, segments_for_epoch};
pub use metrics::{monitored_scope, Metrics, MonitoredScope};
pub use segment::{Effect, SegmentActor, SegmentCore, SegmentMessage, SlotPhase};
pub use state_transfer::{StateTransferActor, StateTransferMessage, StateTransferOutcome};
pub use validator::MessageValidator;
