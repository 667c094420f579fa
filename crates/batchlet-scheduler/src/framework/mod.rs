//! The tiered plugin framework
//!
//! Plugins inject policy into a session as a set of optional callbacks; a
//! plugin supplies only the callbacks it cares about and the framework
//! composes them across tiers. Composition rules:
//!
//! - Ordering callbacks combine lexicographically across tiers: the first
//!   non-equal answer wins, earlier tiers first, plugin order within a tier.
//! - Node scores are summed within a tier and tier-weighted across tiers.
//! - Predicates combine as a short-circuiting AND; the first failure's
//!   reason is returned.
//! - Job readiness and queue overuse combine as AND over the plugins that
//!   answer.
//! - Victim filtering composes by intersection: the candidate set only
//!   shrinks as it flows through the plugins.

mod session;
mod statement;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use batchlet_core::{
    BatchletError, BatchletResult, JobInfo, NodeInfo, PluginConfig, QueueInfo, TaskId, TaskInfo,
};

pub use session::{Session, SessionState};
pub use statement::Statement;

/// A policy plugin.
///
/// Every callback has an identity default; a plugin overrides the subset it
/// supplies. The mutating hooks (`on_allocate`, `on_evict`) fire for every
/// session operation, including rollbacks, so plugin state tracks the
/// session exactly.
pub trait Plugin: Send + Sync {
    /// Registered plugin name
    fn name(&self) -> &'static str;

    /// Precompute per-session state from the freshly cloned snapshot
    fn on_session_open(&mut self, _state: &SessionState) {}

    /// Total order on jobs for admission sequencing
    fn job_order(&self, _a: &JobInfo, _b: &JobInfo) -> Option<Ordering> {
        None
    }

    /// Order of tasks within a job
    fn task_order(&self, _a: &TaskInfo, _b: &TaskInfo) -> Option<Ordering> {
        None
    }

    /// Ranking score of a node for a task; higher is better
    fn node_score(&self, _task: &TaskInfo, _node: &NodeInfo) -> Option<f64> {
        None
    }

    /// Hard feasibility check of a task against a node
    fn predicate(&self, _task: &TaskInfo, _node: &NodeInfo) -> Option<BatchletResult<()>> {
        None
    }

    /// Gang admission predicate
    fn job_ready(&self, _job: &JobInfo) -> Option<bool> {
        None
    }

    /// Quota check for a queue
    fn overused(&self, _queue: &QueueInfo) -> Option<bool> {
        None
    }

    /// Filter the admissible victim set for a preemptor
    fn preemptable(
        &self,
        _state: &SessionState,
        _preemptor: &TaskInfo,
        _victims: &[&TaskInfo],
    ) -> Option<Vec<TaskId>> {
        None
    }

    /// A task was placed (or a rollback re-placed it)
    fn on_allocate(&mut self, _task: &TaskInfo) {}

    /// A task was evicted (or a rollback un-placed it)
    fn on_evict(&mut self, _task: &TaskInfo) {}
}

/// Constructor for a plugin, from its configured arguments
pub type PluginBuilder = fn(&BTreeMap<String, String>) -> Box<dyn Plugin>;

/// Registry of plugin builders by name.
///
/// Populated at startup and frozen before the first session opens.
#[derive(Default)]
pub struct PluginRegistry {
    builders: BTreeMap<String, PluginBuilder>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a builder under a name; later registrations win
    pub fn register(&mut self, name: &str, builder: PluginBuilder) {
        self.builders.insert(name.to_string(), builder);
    }

    /// Whether a plugin name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// Instantiate a configured plugin
    pub fn build(&self, config: &PluginConfig) -> BatchletResult<Box<dyn Plugin>> {
        match self.builders.get(&config.name) {
            Some(builder) => Ok(builder(&config.arguments)),
            None => Err(BatchletError::Config(format!(
                "unknown plugin: {}",
                config.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopPlugin;

    impl Plugin for NoopPlugin {
        fn name(&self) -> &'static str {
            "noop"
        }
    }

    fn noop(_args: &BTreeMap<String, String>) -> Box<dyn Plugin> {
        Box::new(NoopPlugin)
    }

    #[test]
    fn test_registry_build() {
        let mut registry = PluginRegistry::new();
        registry.register("noop", noop);
        assert!(registry.contains("noop"));

        let plugin = registry.build(&PluginConfig::new("noop")).unwrap();
        assert_eq!(plugin.name(), "noop");
    }

    #[test]
    fn test_unknown_plugin_is_config_error() {
        let registry = PluginRegistry::new();
        let result = registry.build(&PluginConfig::new("missing"));
        assert!(matches!(result, Err(BatchletError::Config(_))));
    }
}
