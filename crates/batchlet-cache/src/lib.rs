//! batchlet-cache: Cluster cache and binding dispatch
//!
//! Consumes lifecycle events for pods, pod groups, nodes, queues, and
//! priority classes; maintains the canonical cluster state; snapshots it
//! for scheduling sessions; and drives committed decisions to the external
//! orchestrator.

pub mod binder;
pub mod cache;
pub mod events;

pub use binder::*;
pub use cache::*;
pub use events::*;
