// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Key types used to identify and authenticate peers.
//!
//! Mirrors `consensus-config::crypto`: a single alias point so the rest of
//! the crate never names a concrete scheme directly.

use fastcrypto::{ed25519, traits::KeyPair as _};
use serde::{Deserialize, Serialize};

/// The verification key bound to a peer identity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerPublicKey(ed25519::Ed25519PublicKey);

pub struct PeerPrivateKey(ed25519::Ed25519PrivateKey);

pub struct PeerKeyPair(ed25519::Ed25519KeyPair);

impl PeerPublicKey {
    pub fn new(key: ed25519::Ed25519PublicKey) -> Self {
        Self(key)
    }

    pub fn into_inner(self) -> ed25519::Ed25519PublicKey {
        self.0
    }

    pub fn inner(&self) -> &ed25519::Ed25519PublicKey {
        &self.0
    }
}

impl PeerKeyPair {
    pub fn new(keypair: ed25519::Ed25519KeyPair) -> Self {
        Self(keypair)
    }

    pub fn generate<R: rand::Rng + fastcrypto::traits::AllowedRng>(rng: &mut R) -> Self {
        Self(ed25519::Ed25519KeyPair::generate(rng))
    }

    pub fn public(&self) -> PeerPublicKey {
        PeerPublicKey(self.0.public().clone())
    }

    pub fn private(self) -> PeerPrivateKey {
        PeerPrivateKey(self.0.copy().private())
    }
}

impl Clone for PeerKeyPair {
    fn clone(&self) -> Self {
        Self(self.0.copy())
    }
}
