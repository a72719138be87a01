// SPDX-License-Identifier: MIT OR Apache-2.0
//! Usage statistics counters.

use serde::{Deserialize, Serialize};

/// Per-skill usage counters, updated after each terminal invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    /// Total terminal invocations (any outcome).
    pub total_calls: u64,
    /// Invocations that completed successfully.
    pub successful_calls: u64,
    /// Fraction of successful invocations, `0.0` when never called.
    pub success_rate: f64,
    /// Monotone popularity counter.
    pub popularity: u64,
}

impl UsageStats {
    /// Fold one terminal invocation outcome into the counters.
    pub fn record_outcome(&mut self, success: bool) {
        self.total_calls += 1;
        if success {
            self.successful_calls += 1;
        }
        self.success_rate = self.successful_calls as f64 / self.total_calls as f64;
        self.popularity += 1;
    }
}
