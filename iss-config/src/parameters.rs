// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Operational configuration of a consensus peer.
///
/// All fields should tolerate inconsistencies among peers, without
/// affecting safety of the protocol. NOTE: default values should make
/// sense, so most operators should not need to specify any field.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Parameters {
    /// Initial per-slot view-change timeout; doubled on each successive
    /// view change within the same block (spec.md §4.2).
    #[serde(default = "Parameters::default_view_change_timeout")]
    pub view_change_timeout: Duration,

    /// Threshold `K` of epochs a peer may lag behind before the catch-up
    /// detector triggers (spec.md §4.5). Must be `>= 2`.
    #[serde(default = "Parameters::default_catchup_threshold_epochs")]
    pub catchup_threshold_epochs: u64,

    /// Maximum forward time drift allowed for received messages.
    #[serde(default = "Parameters::default_max_forward_time_drift")]
    pub max_forward_time_drift: Duration,

    /// Number of blocks in each epoch after Genesis. Spec.md leaves the
    /// source of this value unspecified (the Output Sink returns only
    /// topology and crypto, not a length); this is the Open Question
    /// decision recorded in DESIGN.md: treat it as an operator-configured
    /// parameter like the others in this struct.
    #[serde(default = "Parameters::default_epoch_length")]
    pub epoch_length: u64,
}

impl Parameters {
    pub fn default_view_change_timeout() -> Duration {
        Duration::from_millis(1000)
    }

    pub fn default_catchup_threshold_epochs() -> u64 {
        2
    }

    pub fn default_max_forward_time_drift() -> Duration {
        Duration::from_millis(500)
    }

    pub fn default_epoch_length() -> u64 {
        100
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            view_change_timeout: Parameters::default_view_change_timeout(),
            catchup_threshold_epochs: Parameters::default_catchup_threshold_epochs(),
            max_forward_time_drift: Parameters::default_max_forward_time_drift(),
            epoch_length: Parameters::default_epoch_length(),
        }
    }
}
