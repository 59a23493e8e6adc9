// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Peer identity, ordering topology and operational parameters shared by
//! every component of the ISS consensus core.

mod crypto;
mod parameters;
mod topology;

pub use crypto::{PeerKeyPair, PeerPrivateKey, PeerPublicKey};
pub use parameters::Parameters;
pub use topology::{now_micros, Membership, OrderingTopology, PeerId, PeerIdentity, TimestampMicros};
