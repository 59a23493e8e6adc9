// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Metrics owned by `Context`, mirroring `consensus-core::context::Context`'s
//! `pub metrics: Arc<Metrics>` field. The teacher layers `prometheus` behind
//! the internal `mysten-metrics` crate (workspace-only, unavailable outside
//! the Sui monorepo); we register directly against `prometheus::Registry`
//! instead (spec.md's "ambient stack" per SPEC_FULL.md §6).

use std::time::Instant;

use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_with_registry, IntCounterVec,
    IntGauge, Registry,
};

pub struct Metrics {
    /// Non-compliance events, labeled by violation kind (spec.md §4.1, §4.6).
    pub non_compliance_total: IntCounterVec,
    /// Blocks delivered to the output sink, labeled by provenance.
    pub blocks_ordered_total: IntCounterVec,
    /// View changes triggered, labeled by segment original leader.
    pub view_changes_total: IntCounterVec,
    /// Number of times the catch-up detector switched the node into
    /// catch-up behavior.
    pub catchups_triggered_total: IntCounterVec,
    /// Current epoch number this peer is processing.
    pub current_epoch: IntGauge,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            non_compliance_total: register_int_counter_vec_with_registry!(
                "iss_non_compliance_total",
                "Non-compliance metric emitted when a message is dropped",
                &["kind"],
                registry,
            )
            .unwrap(),
            blocks_ordered_total: register_int_counter_vec_with_registry!(
                "iss_blocks_ordered_total",
                "Blocks emitted to the output sink",
                &["provenance"],
                registry,
            )
            .unwrap(),
            view_changes_total: register_int_counter_vec_with_registry!(
                "iss_view_changes_total",
                "View changes triggered per segment",
                &["original_leader"],
                registry,
            )
            .unwrap(),
            catchups_triggered_total: register_int_counter_vec_with_registry!(
                "iss_catchups_triggered_total",
                "Times the catch-up detector switched this node into catch-up behavior",
                &["reason"],
                registry,
            )
            .unwrap(),
            current_epoch: register_int_gauge_with_registry!(
                "iss_current_epoch",
                "Epoch number currently being processed",
                registry,
            )
            .unwrap(),
        }
    }

    #[cfg(test)]
    pub fn new_for_test() -> Self {
        Self::new(&Registry::new())
    }
}

/// RAII span+timer, the local equivalent of `mysten_metrics::monitored_scope`.
/// Logs at `trace` level when dropped; kept deliberately minimal since we
/// do not have the internal crate's histogram wiring available.
pub struct MonitoredScope {
    name: &'static str,
    start: Instant,
}

pub fn monitored_scope(name: &'static str) -> MonitoredScope {
    MonitoredScope {
        name,
        start: Instant::now(),
    }
}

impl Drop for MonitoredScope {
    fn drop(&mut self) {
        tracing::trace!(scope = self.name, elapsed = ?self.start.elapsed(), "scope done");
    }
}
