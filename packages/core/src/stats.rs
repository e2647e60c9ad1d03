//! Consumer statistics.

use serde::{Deserialize, Serialize};

/// Running counters for a consumer since it started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerStats {
    /// Poll cycles that reached the broker successfully.
    pub polls: u64,
    /// Job references received across all batches.
    pub received: u64,
    /// Jobs whose pipeline completed.
    pub succeeded: u64,
    /// Jobs that failed at some stage (including empty payloads).
    pub failed: u64,
    /// Messages deleted from the broker.
    pub acknowledged: u64,
    /// Delete calls that failed.
    pub ack_failures: u64,
    /// Poll cycles that failed to reach the broker.
    pub poll_errors: u64,
    /// Worker tasks that panicked instead of producing an outcome.
    pub panicked: u64,
}

impl ConsumerStats {
    /// Jobs that reached a terminal outcome.
    pub fn processed(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.succeeded as f64 / total as f64) * 100.0)
        }
    }
}
