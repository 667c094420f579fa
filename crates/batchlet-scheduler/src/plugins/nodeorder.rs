//! Balanced resource allocation scoring

use std::collections::BTreeMap;

use batchlet_core::{NodeInfo, TaskInfo};

use crate::framework::Plugin;

const MAX_NODE_SCORE: f64 = 100.0;

/// Scores nodes by how balanced CPU and memory utilization would be after
/// placing the task; skew between the two fractions is penalized.
pub struct NodeOrderPlugin;

/// Plugin builder
pub fn new(_arguments: &BTreeMap<String, String>) -> Box<dyn Plugin> {
    Box::new(NodeOrderPlugin)
}

fn balanced_allocation_score(task: &TaskInfo, node: &NodeInfo) -> f64 {
    if node.allocatable.milli_cpu <= 0.0 || node.allocatable.memory <= 0.0 {
        return 0.0;
    }
    let cpu_fraction =
        ((node.used.milli_cpu + task.resreq.milli_cpu) / node.allocatable.milli_cpu).min(1.0);
    let memory_fraction =
        ((node.used.memory + task.resreq.memory) / node.allocatable.memory).min(1.0);
    (1.0 - (cpu_fraction - memory_fraction).abs()) * MAX_NODE_SCORE
}

impl Plugin for NodeOrderPlugin {
    fn name(&self) -> &'static str {
        "nodeorder"
    }

    fn node_score(&self, task: &TaskInfo, node: &NodeInfo) -> Option<f64> {
        Some(balanced_allocation_score(task, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchlet_core::{Node, Pod, Resource};

    fn task(milli_cpu: f64, memory: f64) -> TaskInfo {
        let pod = Pod::new("ns1", "p1", Resource::new(milli_cpu, memory));
        TaskInfo::from_pod(&pod, "ns1/pg1".to_string(), 0)
    }

    #[test]
    fn test_balanced_placement_scores_highest() {
        let plugin = NodeOrderPlugin;
        let node = NodeInfo::new(&Node::new("n1", Resource::new(4000.0, 4096.0)));

        // Equal fractions on both dimensions: perfect balance.
        let balanced = plugin.node_score(&task(2000.0, 2048.0), &node).unwrap();
        assert_eq!(balanced, MAX_NODE_SCORE);

        // CPU-heavy request skews the node.
        let skewed = plugin.node_score(&task(4000.0, 0.0), &node).unwrap();
        assert!(skewed < balanced);
    }

    #[test]
    fn test_zero_capacity_scores_zero() {
        let plugin = NodeOrderPlugin;
        let node = NodeInfo::new(&Node::new("n1", Resource::new(4000.0, 0.0)));
        assert_eq!(plugin.node_score(&task(1000.0, 0.0), &node), Some(0.0));
    }
}
