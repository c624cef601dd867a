//! Queue configuration and statistics for the in-process broker.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for queue behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Deliveries a subscriber may hold before acknowledging or rejecting.
    pub prefetch: usize,
    /// Unacknowledged deliveries older than this are redelivered (seconds).
    pub visibility_timeout_secs: u64,
    /// Deliveries after which a message is dead-lettered instead of redelivered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_deliveries: Option<u32>,
    /// Maximum number of messages that can wait in the queue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefetch: 16,
            visibility_timeout_secs: 30,
            max_deliveries: None,
            max_queue_size: None,
        }
    }
}

impl QueueConfig {
    /// Visibility timeout as a duration.
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

/// Statistics for a queue's current state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    /// Messages waiting for delivery.
    pub pending: u64,
    /// Messages delivered but not yet acknowledged or rejected.
    pub in_flight: u64,
    /// Messages acknowledged (since start).
    pub acknowledged: u64,
    /// Messages rejected (since start).
    pub rejected: u64,
    /// Deliveries returned to the queue for redelivery (since start).
    pub redelivered: u64,
}

impl QueueStats {
    /// Messages not yet settled (pending + in flight).
    pub fn active(&self) -> u64 {
        self.pending + self.in_flight
    }
}
