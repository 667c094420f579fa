//! Cluster lifecycle events consumed by the cache

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use batchlet_core::{Node, Pod, PodGroup, PriorityClass, Queue};

use crate::cache::SchedulerCache;

/// A lifecycle event delivered by the orchestrator's informer subsystem.
///
/// Events are consumed by a single loop, which gives a total order per
/// object key: a snapshot always reflects a consistent prefix of the event
/// stream.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    PodAdded(Pod),
    PodUpdated(Pod),
    PodDeleted(Pod),
    NodeAdded(Node),
    NodeUpdated(Node),
    NodeDeleted(String),
    PodGroupAdded(PodGroup),
    PodGroupUpdated(PodGroup),
    PodGroupDeleted(PodGroup),
    QueueAdded(Queue),
    QueueDeleted(String),
    PriorityClassAdded(PriorityClass),
    PriorityClassDeleted(String),
}

/// Consume events from `rx` and fold them into the cache until the channel
/// closes
pub async fn run_event_loop(cache: Arc<SchedulerCache>, mut rx: mpsc::Receiver<ClusterEvent>) {
    while let Some(event) = rx.recv().await {
        debug!(?event, "Applying cluster event");
        cache.apply_event(event).await;
    }
    debug!("Event source closed");
}
