// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Parses wire-format consensus messages and verifies their signatures
//! (spec.md §4.6). The validator is pure with respect to node state: it
//! only consults the crypto provider bound to the message's claimed
//! epoch, the same way `consensus-core::block_verifier::SignedBlockVerifier`
//! only consults `Context` and never mutates it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use iss_config::now_micros;
use iss_types::{wire, ConsensusMessage, EpochNumber, UnverifiedMessage, VerifiedMessage};

use crate::errors::ValidatorError;
use crate::interfaces::CryptoProvider;
use crate::metrics::Metrics;

pub struct MessageValidator {
    /// A distinct crypto provider per epoch (spec.md §6: "keys may change
    /// across epochs").
    providers: DashMap<EpochNumber, Arc<dyn CryptoProvider>>,
    metrics: Arc<Metrics>,
    /// Messages timestamped further than this into the future (relative to
    /// our own clock) are rejected (spec.md §4.6 "forward clock drift").
    max_forward_time_drift: Duration,
}

impl MessageValidator {
    pub fn new(metrics: Arc<Metrics>, max_forward_time_drift: Duration) -> Self {
        Self {
            providers: DashMap::new(),
            metrics,
            max_forward_time_drift,
        }
    }

    /// Binds the crypto provider to verify messages claiming to be from
    /// `epoch`. Called when the Consensus Module installs a new epoch
    /// (spec.md §4.1 `NewEpochTopology`).
    pub fn bind_epoch(&self, epoch: EpochNumber, provider: Arc<dyn CryptoProvider>) {
        self.providers.insert(epoch, provider);
    }

    /// Drops providers for epochs that can no longer be referenced by a
    /// live message, bounding memory growth.
    pub fn forget_epochs_before(&self, epoch: EpochNumber) {
        self.providers.retain(|&e, _| e >= epoch);
    }

    /// Parses the wire bytes into a `ConsensusMessage`, then verifies its
    /// signature against the sender's key for its claimed epoch. Parse
    /// failures and signature failures both result in the message being
    /// dropped with a non-compliance metric (spec.md §4.6, §7); the
    /// metric is labeled by violation kind, and for signature failures
    /// also by (sender, epoch, view, block).
    pub async fn parse_and_verify(
        &self,
        bytes: &[u8],
    ) -> Result<VerifiedMessage, ValidatorError> {
        let message = match wire::decode(bytes) {
            Ok(m) => m,
            Err(e) => {
                self.metrics
                    .non_compliance_total
                    .with_label_values(&["malformed"])
                    .inc();
                return Err(ValidatorError::Malformed(e));
            }
        };
        self.verify(message).await
    }

    /// Verifies a message that was already parsed (e.g. re-delivered by
    /// the Consensus Module after an unverified message was parsed once
    /// and needs signature checking, spec.md §4.1).
    pub async fn verify(
        &self,
        message: ConsensusMessage,
    ) -> Result<VerifiedMessage, ValidatorError> {
        let epoch = message.metadata.epoch;
        let provider = self
            .providers
            .get(&epoch)
            .map(|e| e.value().clone())
            .ok_or(ValidatorError::UnknownEpoch(epoch))?;

        let max_timestamp = now_micros().saturating_add(self.max_forward_time_drift.as_micros() as u64);
        if message.timestamp > max_timestamp {
            self.metrics
                .non_compliance_total
                .with_label_values(&["future_timestamp"])
                .inc();
            return Err(ValidatorError::ForwardClockDrift {
                sender: message.sender,
                timestamp: message.timestamp,
            });
        }

        let signable = message.signable_bytes();
        if provider
            .verify(&signable, &message.signature, message.sender)
            .await
            .is_err()
        {
            self.metrics
                .non_compliance_total
                .with_label_values(&["invalid_signature"])
                .inc();
            tracing::debug!(
                sender = %message.sender,
                epoch,
                view = message.view,
                block = message.metadata.block,
                "dropping message with invalid signature"
            );
            return Err(ValidatorError::InvalidSignature {
                sender: message.sender,
                epoch,
            });
        }

        Ok(VerifiedMessage::new_verified(message))
    }

    /// Re-verifies an unverified message received from within the node
    /// itself (spec.md §4.1: "on an unverified PBFT message, the
    /// validator is invoked; on success the verified message is
    /// re-delivered to self").
    pub async fn verify_unverified(
        &self,
        message: UnverifiedMessage,
    ) -> Result<VerifiedMessage, ValidatorError> {
        self.verify(message.0).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use iss_config::PeerId;
    use iss_types::{BlockMetadata, Commit, PayloadDigest, PbftPayload};

    struct AlwaysOk;
    #[async_trait]
    impl CryptoProvider for AlwaysOk {
        async fn sign(&self, bytes: &[u8]) -> Vec<u8> {
            bytes.to_vec()
        }
        async fn verify(&self, _bytes: &[u8], _sig: &[u8], _peer: PeerId) -> Result<(), ()> {
            Ok(())
        }
    }

    struct AlwaysFail;
    #[async_trait]
    impl CryptoProvider for AlwaysFail {
        async fn sign(&self, bytes: &[u8]) -> Vec<u8> {
            bytes.to_vec()
        }
        async fn verify(&self, _bytes: &[u8], _sig: &[u8], _peer: PeerId) -> Result<(), ()> {
            Err(())
        }
    }

    fn sample_message(epoch: u64) -> ConsensusMessage {
        ConsensusMessage {
            metadata: BlockMetadata { epoch, block: 0 },
            view: 0,
            sender: PeerId(0),
            timestamp: 0,
            payload: PbftPayload::Commit(Commit {
                digest: PayloadDigest::of(b"x"),
            }),
            signature: bytes::Bytes::from_static(b"sig"),
        }
    }

    #[tokio::test]
    async fn unknown_epoch_is_rejected() {
        let validator = MessageValidator::new(Arc::new(Metrics::new_for_test()), Duration::from_millis(500));
        let err = validator.verify(sample_message(3)).await.unwrap_err();
        assert_eq!(err, ValidatorError::UnknownEpoch(3));
    }

    #[tokio::test]
    async fn valid_signature_is_accepted() {
        let validator = MessageValidator::new(Arc::new(Metrics::new_for_test()), Duration::from_millis(500));
        validator.bind_epoch(3, Arc::new(AlwaysOk));
        assert!(validator.verify(sample_message(3)).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_signature_is_rejected() {
        let validator = MessageValidator::new(Arc::new(Metrics::new_for_test()), Duration::from_millis(500));
        validator.bind_epoch(3, Arc::new(AlwaysFail));
        let err = validator.verify(sample_message(3)).await.unwrap_err();
        assert_eq!(
            err,
            ValidatorError::InvalidSignature {
                sender: PeerId(0),
                epoch: 3
            }
        );
    }

    #[tokio::test]
    async fn future_timestamp_beyond_drift_is_rejected() {
        let validator = MessageValidator::new(Arc::new(Metrics::new_for_test()), Duration::from_millis(500));
        validator.bind_epoch(3, Arc::new(AlwaysOk));
        let mut message = sample_message(3);
        message.timestamp = iss_config::now_micros() + Duration::from_secs(60).as_micros() as u64;
        let err = validator.verify(message).await.unwrap_err();
        assert!(matches!(err, ValidatorError::ForwardClockDrift { .. }));
    }

    #[tokio::test]
    async fn malformed_bytes_are_rejected() {
        let validator = MessageValidator::new(Arc::new(Metrics::new_for_test()), Duration::from_millis(500));
        let err = validator.parse_and_verify(&[]).await.unwrap_err();
        assert!(matches!(err, ValidatorError::Malformed(_)));
    }
}
