//! batchlet-scheduler: The scheduling session engine
//!
//! Per cycle: the cache snapshots the cluster, a session opens over the
//! snapshot with the configured plugin tiers, the actions run in order
//! (allocation, preemption, backfill), and the session's committed
//! statements flow back to the cache for binding.

pub mod actions;
pub mod framework;
pub mod plugins;
pub mod scheduler;

pub use framework::{Plugin, PluginBuilder, PluginRegistry, Session, SessionState, Statement};
pub use scheduler::Scheduler;
