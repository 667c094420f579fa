//! Queue-level snapshot state

use serde::{Deserialize, Serialize};

use crate::cluster::Queue;

/// Snapshot state for one submission queue.
///
/// The deserved/allocated/request vectors a fairness policy derives for a
/// queue are per-session working state and live with that policy, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueInfo {
    /// Queue name
    pub name: String,
    /// Relative weight used when dividing the cluster between queues
    pub weight: u32,
}

impl QueueInfo {
    pub fn new(queue: &Queue) -> Self {
        Self {
            name: queue.name.clone(),
            weight: queue.weight,
        }
    }
}
