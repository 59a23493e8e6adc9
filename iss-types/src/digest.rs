// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::hash::{Hash, Hasher};

use fastcrypto::hash::{Digest, HashFunction};
use serde::{Deserialize, Serialize};

const DIGEST_LENGTH: usize = 32;

/// Digest of a PBFT payload (the pre-prepared proposal). Computed with the
/// same hash-then-sign pattern as `consensus-core::block::BlockDigest`.
#[derive(Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct PayloadDigest([u8; DIGEST_LENGTH]);

impl PayloadDigest {
    pub fn new(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn of(payload: &[u8]) -> Self {
        let mut hasher = fastcrypto::hash::Blake2b256::new();
        hasher.update(payload);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
        &self.0
    }
}

impl Hash for PayloadDigest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(&self.0[..8]);
    }
}

impl From<PayloadDigest> for Digest<DIGEST_LENGTH> {
    fn from(d: PayloadDigest) -> Self {
        Digest::new(d.0)
    }
}

impl fmt::Debug for PayloadDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, self.0)
        )
    }
}
